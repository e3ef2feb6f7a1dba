//! XPath Axes Implementation
//!
//! All 13 XPath 1.0 axes:
//! - child, parent, self
//! - descendant, descendant-or-self
//! - ancestor, ancestor-or-self
//! - following, following-sibling
//! - preceding, preceding-sibling
//! - attribute, namespace
//!
//! Forward axes return nodes in document order, reverse axes nearest first,
//! so the index in the result is the proximity position.
//! Namespace nodes are not materialized: the namespace axis is always empty
//! and namespace declarations never appear on the attribute axis.

use super::compiler::CompiledNodeTest;
use super::parser::Axis;
use crate::dom::namespace::ns;
use crate::dom::{DocumentAccess, NodeId, NodeKind};

/// Navigate along an axis from a context node
pub fn navigate(doc: &dyn DocumentAccess, context: NodeId, axis: Axis) -> Vec<NodeId> {
    match axis {
        Axis::Child => doc.children_vec(context),
        Axis::Descendant => doc.descendants_vec(context),
        Axis::DescendantOrSelf => descendant_or_self_axis(doc, context),
        Axis::Parent => doc.parent_of(context).into_iter().collect(),
        Axis::Ancestor => ancestor_axis(doc, context),
        Axis::AncestorOrSelf => ancestor_or_self_axis(doc, context),
        Axis::FollowingSibling => following_sibling_axis(doc, context),
        Axis::PrecedingSibling => preceding_sibling_axis(doc, context),
        Axis::Following => following_axis(doc, context),
        Axis::Preceding => preceding_axis(doc, context),
        Axis::Self_ => vec![context],
        Axis::Attribute => attribute_axis(doc, context),
        Axis::Namespace => Vec::new(),
    }
}

fn is_attribute(doc: &dyn DocumentAccess, id: NodeId) -> bool {
    doc.kind_of(id) == Some(NodeKind::Attribute)
}

fn next_sibling(doc: &dyn DocumentAccess, id: NodeId) -> Option<NodeId> {
    doc.get_node(id).and_then(|n| n.next_sibling)
}

fn prev_sibling(doc: &dyn DocumentAccess, id: NodeId) -> Option<NodeId> {
    doc.get_node(id).and_then(|n| n.prev_sibling)
}

/// descendant-or-self:: axis - context node plus all descendants
fn descendant_or_self_axis(doc: &dyn DocumentAccess, context: NodeId) -> Vec<NodeId> {
    let descendants = doc.descendants_vec(context);
    let mut result = Vec::with_capacity(1 + descendants.len());
    result.push(context);
    result.extend(descendants);
    result
}

/// ancestor:: axis - parent, grandparent, ... up to the tree root
fn ancestor_axis(doc: &dyn DocumentAccess, context: NodeId) -> Vec<NodeId> {
    let mut result = Vec::new();
    let mut current = context;

    while let Some(parent) = doc.parent_of(current) {
        result.push(parent);
        current = parent;
    }

    result
}

fn ancestor_or_self_axis(doc: &dyn DocumentAccess, context: NodeId) -> Vec<NodeId> {
    let mut result = vec![context];
    result.extend(ancestor_axis(doc, context));
    result
}

/// following-sibling:: axis (empty for attributes)
fn following_sibling_axis(doc: &dyn DocumentAccess, context: NodeId) -> Vec<NodeId> {
    let mut result = Vec::new();
    if is_attribute(doc, context) {
        return result;
    }

    let mut sibling = next_sibling(doc, context);
    while let Some(sib_id) = sibling {
        result.push(sib_id);
        sibling = next_sibling(doc, sib_id);
    }

    result
}

/// preceding-sibling:: axis, nearest first (empty for attributes)
fn preceding_sibling_axis(doc: &dyn DocumentAccess, context: NodeId) -> Vec<NodeId> {
    let mut result = Vec::new();
    if is_attribute(doc, context) {
        return result;
    }

    let mut sibling = prev_sibling(doc, context);
    while let Some(sib_id) = sibling {
        result.push(sib_id);
        sibling = prev_sibling(doc, sib_id);
    }

    result
}

/// following:: axis - everything after the context in document order,
/// descendants excluded
fn following_axis(doc: &dyn DocumentAccess, context: NodeId) -> Vec<NodeId> {
    let mut result = Vec::new();

    // An attribute is followed by its owner's content
    let mut current = context;
    if is_attribute(doc, context) {
        if let Some(owner) = doc.parent_of(context) {
            result.extend(doc.descendants_vec(owner));
            current = owner;
        }
    }

    loop {
        let mut sibling = next_sibling(doc, current);
        while let Some(sib_id) = sibling {
            result.push(sib_id);
            result.extend(doc.descendants_vec(sib_id));
            sibling = next_sibling(doc, sib_id);
        }
        match doc.parent_of(current) {
            Some(parent) => current = parent,
            None => break,
        }
    }

    result
}

/// preceding:: axis - everything before the context, ancestors excluded,
/// nearest first
fn preceding_axis(doc: &dyn DocumentAccess, context: NodeId) -> Vec<NodeId> {
    let mut result = Vec::new();

    let mut current = context;
    if is_attribute(doc, context) {
        match doc.parent_of(context) {
            Some(owner) => current = owner,
            None => return result,
        }
    }

    loop {
        let mut sibling = prev_sibling(doc, current);
        while let Some(sib_id) = sibling {
            let mut subtree = doc.descendants_vec(sib_id);
            subtree.reverse();
            result.extend(subtree);
            result.push(sib_id);
            sibling = prev_sibling(doc, sib_id);
        }
        match doc.parent_of(current) {
            Some(parent) => current = parent,
            None => break,
        }
    }

    result
}

/// attribute:: axis - attribute nodes, namespace declarations excluded
fn attribute_axis(doc: &dyn DocumentAccess, context: NodeId) -> Vec<NodeId> {
    doc.attributes_of(context)
        .iter()
        .copied()
        .filter(|&a| doc.node_namespace(a) != Some(ns::XMLNS))
        .collect()
}

/// Check if a node matches a node test
///
/// `namespaces` is the element whose in-scope declarations resolve
/// prefixes; an unbound prefix matches nothing.
pub fn matches_node_test(
    doc: &dyn DocumentAccess,
    node_id: NodeId,
    axis: Axis,
    node_test: &CompiledNodeTest,
    namespaces: NodeId,
) -> bool {
    let Some(kind) = doc.kind_of(node_id) else {
        return false;
    };
    let principal = if axis == Axis::Attribute {
        NodeKind::Attribute
    } else {
        NodeKind::Element
    };

    match node_test {
        CompiledNodeTest::Any => kind == principal,
        // unprefixed names select only nodes in no namespace
        CompiledNodeTest::Name(name) => {
            kind == principal
                && doc.node_local_name(node_id) == Some(name.as_str())
                && doc.node_namespace(node_id).is_none_or(str::is_empty)
        }
        CompiledNodeTest::QName(prefix, local) => {
            if kind != principal || doc.node_local_name(node_id) != Some(local.as_str()) {
                return false;
            }
            match doc.namespace_for_prefix(namespaces, prefix) {
                Some(uri) => doc.node_namespace(node_id) == Some(uri),
                None => false,
            }
        }
        CompiledNodeTest::NamespaceWildcard(prefix) => {
            if kind != principal {
                return false;
            }
            match doc.namespace_for_prefix(namespaces, prefix) {
                Some(uri) => doc.node_namespace(node_id) == Some(uri),
                None => false,
            }
        }
        CompiledNodeTest::Node => true,
        CompiledNodeTest::Text => kind == NodeKind::Text || kind == NodeKind::CData,
        CompiledNodeTest::Comment => kind == NodeKind::Comment,
        CompiledNodeTest::ProcessingInstruction(target) => {
            if kind != NodeKind::ProcessingInstruction {
                return false;
            }
            match target {
                Some(expected) => doc.node_local_name(node_id) == Some(expected.as_str()),
                None => true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::XmlDocument;

    fn sample() -> (XmlDocument, NodeId) {
        let doc = XmlDocument::parse(r#"<root xmlns:p="urn:p" k="v"><a><b/></a><c/><p:d/></root>"#).unwrap();
        let root = doc.document_element(doc.roots()[0]).unwrap();
        (doc, root)
    }

    #[test]
    fn test_child_axis() {
        let (doc, root) = sample();
        assert_eq!(navigate(&doc, root, Axis::Child).len(), 3);
    }

    #[test]
    fn test_descendant_axis() {
        let (doc, root) = sample();
        assert_eq!(navigate(&doc, root, Axis::Descendant).len(), 4); // a, b, c, p:d
    }

    #[test]
    fn test_ancestor_axis() {
        let (doc, root) = sample();
        let a = doc.child_elements(root).next().unwrap();
        let b = doc.child_elements(a).next().unwrap();
        let ancestors = navigate(&doc, b, Axis::Ancestor);
        assert_eq!(ancestors, vec![a, root, doc.roots()[0]]);
    }

    #[test]
    fn test_attribute_axis_skips_declarations() {
        let (doc, root) = sample();
        let attrs = navigate(&doc, root, Axis::Attribute);
        assert_eq!(attrs.len(), 1);
        assert_eq!(doc.node_local_name(attrs[0]), Some("k"));
        assert!(matches_node_test(&doc, attrs[0], Axis::Attribute, &CompiledNodeTest::Any, root));
        assert!(!matches_node_test(&doc, attrs[0], Axis::Child, &CompiledNodeTest::Any, root));
    }

    #[test]
    fn test_preceding_is_reverse_document_order() {
        let (doc, root) = sample();
        let kids: Vec<_> = doc.child_elements(root).collect();
        let b = doc.child_elements(kids[0]).next().unwrap();
        assert_eq!(navigate(&doc, kids[1], Axis::Preceding), vec![b, kids[0]]);
        assert_eq!(navigate(&doc, b, Axis::Following), vec![kids[1], kids[2]]);
    }

    #[test]
    fn test_qname_test_resolves_prefix() {
        let (doc, root) = sample();
        let d = doc.child_elements(root).nth(2).unwrap();
        let test = CompiledNodeTest::QName("p".to_string(), "d".to_string());
        assert!(matches_node_test(&doc, d, Axis::Child, &test, root));
        let unbound = CompiledNodeTest::QName("q".to_string(), "d".to_string());
        assert!(!matches_node_test(&doc, d, Axis::Child, &unbound, root));
        let local = CompiledNodeTest::Name("d".to_string());
        assert!(!matches_node_test(&doc, d, Axis::Child, &local, root));
        let c = doc.child_elements(root).nth(1).unwrap();
        let plain = CompiledNodeTest::Name("c".to_string());
        assert!(matches_node_test(&doc, c, Axis::Child, &plain, root));
    }
}
