//! Model item state
//!
//! A side table keyed by node id holds the computed properties and pending
//! mutations of every instance node that has any. Nodes without an entry
//! take the defaults: type `xsd:string`, writable, optional, relevant,
//! constraint satisfied and valid.
//!
//! `readonly` and `relevant` are inherited: a node is read-only when it or
//! any ancestor is, and relevant only when it and every ancestor are.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ns;
use crate::dom::{DocumentAccess, NodeId, NodeKind, XmlDocument};

/// Expanded name of a model item type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemType {
    pub namespace: String,
    pub local: String,
}

impl ItemType {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        ItemType {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    pub fn xsd(local: &str) -> Self {
        Self::new(ns::XSD, local)
    }
}

impl Default for ItemType {
    fn default() -> Self {
        Self::xsd("string")
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace.as_str() {
            "" => f.write_str(&self.local),
            ns::XSD => write!(f, "xsd:{}", self.local),
            other => write!(f, "{{{other}}}{}", self.local),
        }
    }
}

/// Notifications waiting for the next refresh of the owning model
///
/// Each slot holds the direction of the last transition. A transition in
/// the opposite direction empties the slot instead of queuing its inverse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingNotifications {
    pub value_changed: bool,
    /// `Some(true)` is `xforms-valid`, `Some(false)` is `xforms-invalid`
    pub valid: Option<bool>,
    /// `Some(true)` is `xforms-readonly`, `Some(false)` is `xforms-readwrite`
    pub read_only: Option<bool>,
    /// `Some(true)` is `xforms-required`, `Some(false)` is `xforms-optional`
    pub required: Option<bool>,
    /// `Some(true)` is `xforms-enabled`, `Some(false)` is `xforms-disabled`
    pub relevant: Option<bool>,
}

impl PendingNotifications {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Record a transition to `now`
    pub fn transition(slot: &mut Option<bool>, now: bool) {
        *slot = match *slot {
            Some(previous) if previous != now => None,
            _ => Some(now),
        };
    }
}

/// Stored state of one instance node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelItemState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_type: Option<ItemType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevant: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
    /// A `calculate` bind targets the node, which makes it read-only
    pub calculated: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    /// XML text that replaces the node's children
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_contents: Option<String>,
    pub clear: bool,

    /// Per-instance sequence number behind the unique id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique: Option<u32>,
    pub pending: PendingNotifications,
}

impl ModelItemState {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Whether any raw mutation is queued
    pub fn has_mutation(&self) -> bool {
        self.clear || self.new_contents.is_some() || self.new_value.is_some()
    }

    /// Forget everything a bind pass computes
    pub fn reset_properties(&mut self) {
        self.item_type = None;
        self.read_only = None;
        self.required = None;
        self.relevant = None;
        self.constraint = None;
        self.calculated = false;
    }
}

/// Model item states keyed by node id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemTable {
    items: BTreeMap<NodeId, ModelItemState>,
}

impl ItemTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: NodeId) -> Option<&ModelItemState> {
        self.items.get(&node)
    }

    /// State for `node`, created with defaults on first access
    pub fn entry(&mut self, node: NodeId) -> &mut ModelItemState {
        self.items.entry(node).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &ModelItemState)> {
        self.items.iter().map(|(&n, s)| (n, s))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (NodeId, &mut ModelItemState)> {
        self.items.iter_mut().map(|(&n, s)| (n, s))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop entries that hold only defaults or belong to unreachable nodes
    pub fn prune(&mut self, xml: &XmlDocument) {
        self.items
            .retain(|&node, state| !state.is_default() && xml.is_attached(node));
    }

    /// Non-default entries, for persistence
    pub fn to_map(&self) -> BTreeMap<NodeId, ModelItemState> {
        self.items
            .iter()
            .filter(|(_, s)| !s.is_default())
            .map(|(&n, s)| (n, s.clone()))
            .collect()
    }

    pub fn from_map(items: BTreeMap<NodeId, ModelItemState>) -> Self {
        ItemTable { items }
    }

    // =========================================================================
    // Effective properties
    // =========================================================================

    /// Current value of a node
    ///
    /// A queued new value wins. Elements with element children have no value.
    pub fn value(&self, xml: &XmlDocument, node: NodeId) -> Option<String> {
        if let Some(pending) = self.get(node).and_then(|s| s.new_value.as_ref()) {
            return Some(pending.clone());
        }
        match xml.kind(node)? {
            NodeKind::Attribute => xml.get_node(node).map(|n| n.value.clone()),
            NodeKind::Element => {
                if xml.child_elements(node).next().is_some() {
                    None
                } else {
                    Some(xml.string_value(node))
                }
            }
            NodeKind::Text | NodeKind::CData => Some(xml.string_value(node)),
            _ => None,
        }
    }

    pub fn item_type(&self, node: NodeId) -> ItemType {
        self.get(node)
            .and_then(|s| s.item_type.clone())
            .unwrap_or_default()
    }

    /// True when the node or any ancestor is read-only or calculated
    pub fn is_read_only(&self, xml: &XmlDocument, node: NodeId) -> bool {
        self.self_and_ancestors(xml, node).any(|n| {
            self.get(n)
                .is_some_and(|s| s.read_only == Some(true) || s.calculated)
        })
    }

    /// True when neither the node nor any ancestor is non-relevant
    pub fn is_relevant(&self, xml: &XmlDocument, node: NodeId) -> bool {
        !self
            .self_and_ancestors(xml, node)
            .any(|n| self.get(n).is_some_and(|s| s.relevant == Some(false)))
    }

    pub fn is_required(&self, node: NodeId) -> bool {
        self.get(node).and_then(|s| s.required).unwrap_or(false)
    }

    pub fn constraint(&self, node: NodeId) -> bool {
        self.get(node).and_then(|s| s.constraint).unwrap_or(true)
    }

    pub fn is_valid(&self, node: NodeId) -> bool {
        self.get(node).and_then(|s| s.valid).unwrap_or(true)
    }

    fn self_and_ancestors<'a>(&'a self, xml: &'a XmlDocument, node: NodeId) -> impl Iterator<Item = NodeId> + 'a {
        std::iter::successors(Some(node), move |&n| xml.parent_of(n))
    }
}

/// Snapshot of one model item handed to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelItemView {
    pub node: NodeId,
    /// `{instance-id}${n}`
    pub id: String,
    pub value: Option<String>,
    pub item_type: ItemType,
    pub read_only: bool,
    pub required: bool,
    pub relevant: bool,
    pub constraint: bool,
    pub valid: bool,
}

/// Elements and attributes of a tree in document order, namespace declarations excluded
pub fn item_nodes(xml: &XmlDocument, root: NodeId) -> Vec<NodeId> {
    let mut nodes = Vec::new();
    for node in std::iter::once(root).chain(xml.descendants(root)) {
        if xml.kind(node) != Some(NodeKind::Element) {
            continue;
        }
        nodes.push(node);
        nodes.extend(
            xml.attributes_of(node)
                .iter()
                .copied()
                .filter(|&a| xml.node_namespace(a) != Some(crate::dom::namespace::ns::XMLNS)),
        );
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (XmlDocument, NodeId, NodeId, NodeId) {
        let xml = XmlDocument::parse(r#"<data><a x="1"><b>text</b></a></data>"#).unwrap();
        let data = xml.document_element(xml.roots()[0]).unwrap();
        let a = xml.child_elements(data).next().unwrap();
        let b = xml.child_elements(a).next().unwrap();
        (xml, data, a, b)
    }

    #[test]
    fn test_defaults() {
        let (xml, _, _, b) = sample();
        let items = ItemTable::new();
        assert_eq!(items.item_type(b), ItemType::xsd("string"));
        assert!(!items.is_read_only(&xml, b));
        assert!(items.is_relevant(&xml, b));
        assert!(!items.is_required(b));
        assert!(items.constraint(b));
        assert!(items.is_valid(b));
    }

    #[test]
    fn test_inheritance() {
        let (xml, data, a, b) = sample();
        let mut items = ItemTable::new();
        items.entry(data).relevant = Some(false);
        items.entry(a).read_only = Some(true);
        assert!(!items.is_relevant(&xml, b));
        assert!(items.is_read_only(&xml, b));
        assert!(!items.is_read_only(&xml, data));

        items.entry(data).relevant = None;
        items.entry(b).relevant = Some(true);
        assert!(items.is_relevant(&xml, b));
    }

    #[test]
    fn test_calculated_is_read_only() {
        let (xml, _, _, b) = sample();
        let mut items = ItemTable::new();
        items.entry(b).calculated = true;
        assert!(items.is_read_only(&xml, b));
    }

    #[test]
    fn test_value_rules() {
        let (xml, _, a, b) = sample();
        let mut items = ItemTable::new();
        assert_eq!(items.value(&xml, a), None);
        assert_eq!(items.value(&xml, b).as_deref(), Some("text"));
        let x = xml.attribute_node(a, "x").unwrap();
        assert_eq!(items.value(&xml, x).as_deref(), Some("1"));

        items.entry(b).new_value = Some("pending".to_string());
        assert_eq!(items.value(&xml, b).as_deref(), Some("pending"));
    }

    #[test]
    fn test_transition_cancels() {
        let mut slot = None;
        PendingNotifications::transition(&mut slot, false);
        assert_eq!(slot, Some(false));
        PendingNotifications::transition(&mut slot, true);
        assert_eq!(slot, None);
        PendingNotifications::transition(&mut slot, true);
        assert_eq!(slot, Some(true));
    }

    #[test]
    fn test_item_nodes_skip_namespace_declarations() {
        let xml = XmlDocument::parse(r#"<d xmlns:p="urn:p" p:k="v"><e/></d>"#).unwrap();
        let nodes = item_nodes(&xml, xml.roots()[0]);
        assert_eq!(nodes.len(), 3);
    }

    #[test]
    fn test_to_map_skips_defaults() {
        let mut items = ItemTable::new();
        items.entry(3);
        items.entry(4).required = Some(true);
        let map = items.to_map();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&4));
    }
}
