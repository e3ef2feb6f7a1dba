//! DOM Module - Mutable arena XML trees
//!
//! Implements the tree the engine drives:
//! - Arena allocation for nodes, several trees per arena
//! - NodeId (u32) indices that stay stable across mutation
//! - String interning for names and namespace URIs
//! - Attributes as first-class nodes
//! - quick-xml based parsing and serialization

pub mod document;
pub mod namespace;
pub mod node;
pub mod strings;

use thiserror::Error;

pub use document::{Fragment, XmlDocument};
pub use namespace::split_qname;
pub use node::{NodeId, NodeKind, XmlNode};
pub use strings::{NameId, StringPool};

/// Errors raised while building, mutating or writing trees
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DomError {
    /// Input is not well-formed XML
    #[error("XML parse error at byte {position}: {message}")]
    Parse {
        /// Byte offset in the input where the failing event started
        position: u64,
        /// Underlying reason
        message: String,
    },

    /// An element was required
    #[error("node {0} is not an element")]
    NotAnElement(NodeId),

    /// The node id is not allocated or has no parent where one is required
    #[error("unknown or detached node {0}")]
    UnknownNode(NodeId),

    /// Writing XML failed
    #[error("XML serialization error: {0}")]
    Serialize(String),
}

/// Result type for DOM operations
pub type Result<T> = std::result::Result<T, DomError>;

/// Read access used by the XPath engine
pub trait DocumentAccess {
    /// Get a node by ID
    fn get_node(&self, id: NodeId) -> Option<&XmlNode>;

    /// Get the node kind
    fn kind_of(&self, id: NodeId) -> Option<NodeKind> {
        self.get_node(id).map(|n| n.kind)
    }

    /// Parent node (owner element for attributes)
    fn parent_of(&self, id: NodeId) -> Option<NodeId>;

    /// Topmost ancestor of a node (the tree's document node when attached)
    fn root_of(&self, id: NodeId) -> NodeId;

    /// Qualified node name
    fn node_name(&self, id: NodeId) -> String;

    /// Local name (without prefix)
    fn node_local_name(&self, id: NodeId) -> Option<&str>;

    /// Namespace URI, empty when none
    fn node_namespace(&self, id: NodeId) -> Option<&str>;

    /// Attribute nodes of an element
    fn attributes_of(&self, id: NodeId) -> &[NodeId];

    /// Children - returns collected Vec for trait object compatibility
    fn children_vec(&self, id: NodeId) -> Vec<NodeId>;

    /// Descendants in document order - returns collected Vec
    fn descendants_vec(&self, id: NodeId) -> Vec<NodeId>;

    /// XPath string-value of a node
    fn string_value(&self, id: NodeId) -> String;

    /// Sort key for document order
    fn document_order(&self, id: NodeId) -> u64;

    /// Resolve a namespace prefix in scope at `context`
    fn namespace_for_prefix(&self, context: NodeId, prefix: &str) -> Option<&str>;

    /// Element with a matching `id` attribute in the tree containing `context`
    fn element_with_id(&self, context: NodeId, id: &str) -> Option<NodeId>;
}
