//! XML Node representation
//!
//! Uses NodeId (u32) for compact node references into the arena.
//! Attributes are nodes too, linked from their owner element, so that
//! bindings and model item state can address them like elements.

use super::strings::NameId;

/// Compact node identifier (index into arena)
pub type NodeId = u32;

/// Type of XML node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Tree root
    Document,
    /// Element node
    Element,
    /// Attribute node (parent is the owner element)
    Attribute,
    /// Text content
    Text,
    /// CDATA section
    CData,
    /// Comment
    Comment,
    /// Processing instruction
    ProcessingInstruction,
}

/// An XML node in the arena
#[derive(Debug, Clone)]
pub struct XmlNode {
    /// Type of this node
    pub kind: NodeKind,
    /// Parent node (owner element for attributes, None for tree roots and detached nodes)
    pub parent: Option<NodeId>,
    /// First child node
    pub first_child: Option<NodeId>,
    /// Last child node
    pub last_child: Option<NodeId>,
    /// Previous sibling
    pub prev_sibling: Option<NodeId>,
    /// Next sibling
    pub next_sibling: Option<NodeId>,
    /// Local name (elements, attributes) or target (processing instructions)
    pub local_id: NameId,
    /// Namespace prefix, or 0
    pub prefix_id: NameId,
    /// Namespace URI, or 0
    pub namespace_id: NameId,
    /// Character data: text, attribute value, comment or PI data
    pub value: String,
    /// Attribute nodes in declaration order (elements only)
    pub attributes: Vec<NodeId>,
}

impl XmlNode {
    fn blank(kind: NodeKind) -> Self {
        XmlNode {
            kind,
            parent: None,
            first_child: None,
            last_child: None,
            prev_sibling: None,
            next_sibling: None,
            local_id: 0,
            prefix_id: 0,
            namespace_id: 0,
            value: String::new(),
            attributes: Vec::new(),
        }
    }

    /// Create a new tree root
    pub fn document() -> Self {
        Self::blank(NodeKind::Document)
    }

    /// Create a new element node
    pub fn element(local_id: NameId, prefix_id: NameId, namespace_id: NameId) -> Self {
        XmlNode {
            local_id,
            prefix_id,
            namespace_id,
            ..Self::blank(NodeKind::Element)
        }
    }

    /// Create an attribute node
    pub fn attribute(
        local_id: NameId,
        prefix_id: NameId,
        namespace_id: NameId,
        value: String,
    ) -> Self {
        XmlNode {
            local_id,
            prefix_id,
            namespace_id,
            value,
            ..Self::blank(NodeKind::Attribute)
        }
    }

    /// Create a character data node (text, CDATA or comment)
    pub fn character_data(kind: NodeKind, value: String) -> Self {
        XmlNode {
            value,
            ..Self::blank(kind)
        }
    }

    /// Create a processing instruction node
    pub fn processing_instruction(target_id: NameId, data: String) -> Self {
        XmlNode {
            local_id: target_id,
            value: data,
            ..Self::blank(NodeKind::ProcessingInstruction)
        }
    }

    /// Check if this is an element node
    #[inline]
    pub fn is_element(&self) -> bool {
        self.kind == NodeKind::Element
    }

    /// Check if this is an attribute node
    #[inline]
    pub fn is_attribute(&self) -> bool {
        self.kind == NodeKind::Attribute
    }

    /// Text or CDATA
    #[inline]
    pub fn is_text(&self) -> bool {
        matches!(self.kind, NodeKind::Text | NodeKind::CData)
    }

    /// Check if this node has children
    #[inline]
    pub fn has_children(&self) -> bool {
        self.first_child.is_some()
    }
}
