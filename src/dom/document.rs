//! Mutable arena document
//!
//! One arena holds several independent trees, each rooted at a `Document`
//! node: the host form is parsed first and every XForms instance gets its
//! own tree. Node ids are never reused, so a removed node simply becomes
//! unreachable from any registered root.
//!
//! Document order is tracked with a lazily rebuilt order table which every
//! mutation invalidates.

use std::cell::RefCell;

use quick_xml::escape::unescape;
use quick_xml::events::{BytesCData, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::namespace::{ns, split_qname, NamespaceResolver};
use super::node::{NodeId, NodeKind, XmlNode};
use super::strings::StringPool;
use super::{DocumentAccess, DomError, Result};

/// Owned copy of a subtree, used to move content between arenas
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Node the copy was taken from
    pub source: NodeId,
    pub kind: NodeKind,
    pub prefix: String,
    pub local: String,
    pub namespace: String,
    pub value: String,
    pub attributes: Vec<Fragment>,
    pub children: Vec<Fragment>,
}

/// Arena of XML trees
#[derive(Debug)]
pub struct XmlDocument {
    nodes: Vec<XmlNode>,
    strings: StringPool,
    roots: Vec<NodeId>,
    order: RefCell<Option<Vec<u64>>>,
}

impl Default for XmlDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlDocument {
    /// Create an empty arena with no trees
    pub fn new() -> Self {
        XmlDocument {
            nodes: Vec::with_capacity(256),
            strings: StringPool::new(),
            roots: Vec::new(),
            order: RefCell::new(None),
        }
    }

    /// Parse `text` as the first tree of a fresh arena
    pub fn parse(text: &str) -> Result<Self> {
        let mut doc = Self::new();
        doc.parse_tree(text)?;
        Ok(doc)
    }

    /// Parse `text` into a new tree and return its document node
    ///
    /// On failure no tree is registered.
    pub fn parse_tree(&mut self, text: &str) -> Result<NodeId> {
        let root = self.alloc(XmlNode::document());
        self.parse_into(root, text)?;
        self.roots.push(root);
        Ok(root)
    }

    /// Parse `text` as content for `scope`, returning detached top-level nodes
    ///
    /// Namespace prefixes in scope at `scope` are visible to the fragment.
    pub fn parse_fragment(&mut self, scope: Option<NodeId>, text: &str) -> Result<Vec<NodeId>> {
        let holder = self.alloc(XmlNode::document());
        if let Some(scope) = scope {
            for (prefix, uri) in self.in_scope_namespaces(scope) {
                let qname = if prefix.is_empty() {
                    "xmlns".to_string()
                } else {
                    format!("xmlns:{prefix}")
                };
                self.push_attribute(holder, &qname, &uri);
            }
        }
        self.parse_into(holder, text)?;
        let children = self.children_vec(holder);
        for &child in &children {
            self.detach(child);
        }
        Ok(children)
    }

    fn parse_into(&mut self, container: NodeId, text: &str) -> Result<()> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(false);

        let mut resolver = NamespaceResolver::new(&mut self.strings);
        // xmlns attributes on a fragment holder seed the outer scope
        let seeded: Vec<(String, String)> = self
            .attributes_of(container)
            .iter()
            .filter_map(|&a| self.namespace_declaration(a))
            .collect();
        for (prefix, uri) in seeded {
            let prefix_id = self.strings.intern(&prefix);
            let uri_id = self.strings.intern(&uri);
            resolver.declare(prefix_id, uri_id);
        }

        let mut stack: Vec<NodeId> = vec![container];
        loop {
            let position = reader.buffer_position() as u64;
            let parse_error = |message: String| DomError::Parse { position, message };
            let event = reader.read_event().map_err(|e| parse_error(e.to_string()))?;
            let parent = *stack.last().unwrap_or(&container);
            match event {
                Event::Start(e) => {
                    let id = self.open_element(&e, parent, &mut resolver, position)?;
                    stack.push(id);
                }
                Event::Empty(e) => {
                    self.open_element(&e, parent, &mut resolver, position)?;
                    resolver.pop_scope();
                }
                Event::End(_) => {
                    if stack.len() <= 1 {
                        return Err(parse_error("unexpected end tag".to_string()));
                    }
                    stack.pop();
                    resolver.pop_scope();
                }
                Event::Text(e) => {
                    let text = e.xml_content().map_err(|e| parse_error(e.to_string()))?;
                    self.append_character_data(parent, NodeKind::Text, &text);
                }
                Event::GeneralRef(e) => {
                    let name = std::str::from_utf8(&e).map_err(|e| parse_error(e.to_string()))?;
                    let text = unescape(&format!("&{name};"))
                        .map_err(|e| parse_error(e.to_string()))?
                        .into_owned();
                    self.append_character_data(parent, NodeKind::Text, &text);
                }
                Event::CData(e) => {
                    let raw = e.into_inner();
                    let text = std::str::from_utf8(&raw).map_err(|e| parse_error(e.to_string()))?;
                    self.append_character_data(parent, NodeKind::CData, text);
                }
                Event::Comment(e) => {
                    let text = std::str::from_utf8(&e).map_err(|e| parse_error(e.to_string()))?;
                    let id = self.alloc(XmlNode::character_data(NodeKind::Comment, text.to_string()));
                    self.link_child(parent, id);
                }
                Event::PI(e) => {
                    let raw = std::str::from_utf8(&e).map_err(|e| parse_error(e.to_string()))?;
                    let (target, data) = match raw.find(char::is_whitespace) {
                        Some(pos) => (&raw[..pos], raw[pos..].trim_start()),
                        None => (raw, ""),
                    };
                    let target_id = self.strings.intern(target);
                    let id = self.alloc(XmlNode::processing_instruction(target_id, data.to_string()));
                    self.link_child(parent, id);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if stack.len() > 1 {
            return Err(DomError::Parse {
                position: reader.buffer_position() as u64,
                message: "unexpected end of input inside an element".to_string(),
            });
        }
        Ok(())
    }

    fn open_element(
        &mut self,
        start: &BytesStart<'_>,
        parent: NodeId,
        resolver: &mut NamespaceResolver,
        position: u64,
    ) -> Result<NodeId> {
        let parse_error = |message: String| DomError::Parse { position, message };
        let qname = std::str::from_utf8(start.name().as_ref())
            .map_err(|e| parse_error(e.to_string()))?
            .to_string();

        resolver.push_scope();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| parse_error(e.to_string()))?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|e| parse_error(e.to_string()))?
                .to_string();
            let raw = std::str::from_utf8(&attr.value).map_err(|e| parse_error(e.to_string()))?;
            let value = unescape(raw).map_err(|e| parse_error(e.to_string()))?.into_owned();
            if key == "xmlns" {
                let uri_id = self.strings.intern(&value);
                resolver.declare_default(uri_id);
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                let prefix_id = self.strings.intern(prefix);
                let uri_id = self.strings.intern(&value);
                resolver.declare(prefix_id, uri_id);
            }
            attributes.push((key, value));
        }

        let (prefix, local) = split_qname(&qname);
        let prefix_id = self.strings.intern(prefix);
        let local_id = self.strings.intern(local);
        let namespace_id = if prefix.is_empty() {
            resolver.resolve_default()
        } else {
            resolver
                .resolve(prefix_id)
                .ok_or_else(|| parse_error(format!("undeclared prefix '{prefix}'")))?
        };

        let id = self.alloc(XmlNode::element(local_id, prefix_id, namespace_id));
        self.link_child(parent, id);

        for (key, value) in attributes {
            let (prefix, local) = split_qname(&key);
            let namespace_id = if key == "xmlns" || prefix == "xmlns" {
                self.strings.intern(ns::XMLNS)
            } else if prefix.is_empty() {
                0
            } else {
                let prefix_id = self.strings.intern(prefix);
                resolver
                    .resolve(prefix_id)
                    .ok_or_else(|| parse_error(format!("undeclared prefix '{prefix}'")))?
            };
            let prefix_id = self.strings.intern(prefix);
            let local_id = self.strings.intern(local);
            let attr = self.alloc(XmlNode::attribute(local_id, prefix_id, namespace_id, value));
            self.attach_attribute(id, attr);
        }
        Ok(id)
    }

    // =========================================================================
    // Arena bookkeeping
    // =========================================================================

    fn alloc(&mut self, node: XmlNode) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(node);
        self.invalidate_order();
        id
    }

    #[inline]
    fn invalidate_order(&mut self) {
        *self.order.get_mut() = None;
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut XmlNode> {
        self.nodes.get_mut(id as usize).ok_or(DomError::UnknownNode(id))
    }

    /// Link `child` as the last child of `parent`
    fn link_child(&mut self, parent: NodeId, child: NodeId) {
        let last = self.nodes[parent as usize].last_child;
        {
            let node = &mut self.nodes[child as usize];
            node.parent = Some(parent);
            node.prev_sibling = last;
            node.next_sibling = None;
        }
        match last {
            Some(last) => self.nodes[last as usize].next_sibling = Some(child),
            None => self.nodes[parent as usize].first_child = Some(child),
        }
        self.nodes[parent as usize].last_child = Some(child);
        self.invalidate_order();
    }

    fn attach_attribute(&mut self, element: NodeId, attr: NodeId) {
        self.nodes[attr as usize].parent = Some(element);
        self.nodes[element as usize].attributes.push(attr);
        self.invalidate_order();
    }

    fn push_attribute(&mut self, element: NodeId, qname: &str, value: &str) -> NodeId {
        let (prefix, local) = split_qname(qname);
        let namespace_id = if qname == "xmlns" || prefix == "xmlns" {
            self.strings.intern(ns::XMLNS)
        } else if prefix.is_empty() {
            0
        } else {
            let uri = self.lookup_namespace(element, prefix).unwrap_or("").to_string();
            self.strings.intern(&uri)
        };
        let prefix_id = self.strings.intern(prefix);
        let local_id = self.strings.intern(local);
        let attr = self.alloc(XmlNode::attribute(local_id, prefix_id, namespace_id, value.to_string()));
        self.attach_attribute(element, attr);
        attr
    }

    /// Append character data, merging with a trailing node of the same kind
    fn append_character_data(&mut self, parent: NodeId, kind: NodeKind, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(last) = self.nodes[parent as usize].last_child {
            let node = &mut self.nodes[last as usize];
            if node.kind == kind {
                node.value.push_str(text);
                return;
            }
        }
        let id = self.alloc(XmlNode::character_data(kind, text.to_string()));
        self.link_child(parent, id);
    }

    // =========================================================================
    // Trees
    // =========================================================================

    /// Registered tree roots, host tree first
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Create an empty tree and return its document node
    pub fn new_tree(&mut self) -> NodeId {
        let root = self.alloc(XmlNode::document());
        self.roots.push(root);
        root
    }

    /// Unregister a tree; its nodes become unreachable
    pub fn drop_tree(&mut self, root: NodeId) {
        self.roots.retain(|&r| r != root);
        self.invalidate_order();
    }

    /// Total number of allocated nodes, reachable or not
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Shared name pool
    pub fn strings(&self) -> &StringPool {
        &self.strings
    }

    /// First element child of a tree root
    pub fn document_element(&self, root: NodeId) -> Option<NodeId> {
        self.children(root).find(|&c| self.kind(c) == Some(NodeKind::Element))
    }

    /// Whether `id` is reachable from a registered root
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.nodes.get(id as usize).is_some() && self.roots.contains(&self.root_of(id))
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Iterate over child nodes
    pub fn children(&self, id: NodeId) -> ChildIter<'_> {
        ChildIter {
            doc: self,
            next: self.get_node(id).and_then(|n| n.first_child),
        }
    }

    /// Iterate over descendants in document order (attributes excluded, self excluded)
    pub fn descendants(&self, id: NodeId) -> DescendantIter<'_> {
        let mut iter = DescendantIter {
            doc: self,
            stack: Vec::new(),
        };
        iter.push_children(id);
        iter
    }

    /// Child elements only
    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .filter(move |&c| self.kind(c) == Some(NodeKind::Element))
    }

    /// Node kind, if the node exists
    #[inline]
    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.get_node(id).map(|n| n.kind)
    }

    /// Qualified name as written (`prefix:local`)
    pub fn qualified_name(&self, id: NodeId) -> String {
        let Some(node) = self.get_node(id) else {
            return String::new();
        };
        let local = self.strings.get_or_empty(node.local_id);
        match self.strings.get_or_empty(node.prefix_id) {
            "" => local.to_string(),
            prefix => format!("{prefix}:{local}"),
        }
    }

    /// Whether an element or attribute has the given expanded name
    pub fn has_name(&self, id: NodeId, namespace: &str, local: &str) -> bool {
        self.node_namespace(id) == Some(namespace) && self.node_local_name(id) == Some(local)
    }

    /// Find a non-namespaced attribute by local name
    pub fn attribute_node(&self, element: NodeId, local: &str) -> Option<NodeId> {
        self.attributes_of(element).iter().copied().find(|&a| {
            self.get_node(a)
                .is_some_and(|n| n.namespace_id == 0 && self.strings.get_or_empty(n.local_id) == local)
        })
    }

    /// Find an attribute by expanded name
    pub fn attribute_node_ns(&self, element: NodeId, namespace: &str, local: &str) -> Option<NodeId> {
        self.attributes_of(element)
            .iter()
            .copied()
            .find(|&a| self.has_name(a, namespace, local))
    }

    /// Value of a non-namespaced attribute
    pub fn attribute(&self, element: NodeId, local: &str) -> Option<&str> {
        let attr = self.attribute_node(element, local)?;
        self.get_node(attr).map(|n| n.value.as_str())
    }

    /// Value of a namespaced attribute
    pub fn attribute_ns(&self, element: NodeId, namespace: &str, local: &str) -> Option<&str> {
        let attr = self.attribute_node_ns(element, namespace, local)?;
        self.get_node(attr).map(|n| n.value.as_str())
    }

    /// Find the element with the given `id` attribute in the tree rooted at `root`
    pub fn element_by_id(&self, root: NodeId, id: &str) -> Option<NodeId> {
        self.descendants(root)
            .find(|&n| self.kind(n) == Some(NodeKind::Element) && self.attribute(n, "id") == Some(id))
    }

    /// Whether `ancestor` is a proper ancestor of `node`
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.parent_of(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent_of(id);
        }
        false
    }

    /// Ancestors from the parent upwards
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut current = self.parent_of(id);
        while let Some(node) = current {
            result.push(node);
            current = self.parent_of(node);
        }
        result
    }

    fn namespace_declaration(&self, attr: NodeId) -> Option<(String, String)> {
        let node = self.get_node(attr)?;
        if self.strings.get_or_empty(node.namespace_id) != ns::XMLNS {
            return None;
        }
        let prefix = if node.prefix_id == 0 {
            String::new()
        } else {
            self.strings.get_or_empty(node.local_id).to_string()
        };
        Some((prefix, node.value.clone()))
    }

    /// Resolve `prefix` at `node` by walking the ancestors' declarations
    ///
    /// An empty prefix looks up the default namespace; `Some("")` means the
    /// default namespace was explicitly undeclared.
    pub fn lookup_namespace(&self, node: NodeId, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(ns::XML);
        }
        let mut current = Some(node);
        while let Some(id) = current {
            let n = self.get_node(id)?;
            if n.kind == NodeKind::Element {
                for &attr in &n.attributes {
                    let a = &self.nodes[attr as usize];
                    if self.strings.get_or_empty(a.namespace_id) != ns::XMLNS {
                        continue;
                    }
                    let declared = if a.prefix_id == 0 {
                        ""
                    } else {
                        self.strings.get_or_empty(a.local_id)
                    };
                    if declared == prefix {
                        return Some(a.value.as_str());
                    }
                }
            }
            current = n.parent;
        }
        None
    }

    /// All namespace declarations in scope at `node`, outermost first
    pub fn in_scope_namespaces(&self, node: NodeId) -> Vec<(String, String)> {
        let mut chain = self.ancestors(node);
        chain.reverse();
        chain.push(node);
        let mut result: Vec<(String, String)> = Vec::new();
        for id in chain {
            for &attr in self.attributes_of(id) {
                if let Some((prefix, uri)) = self.namespace_declaration(attr) {
                    result.retain(|(p, _)| *p != prefix);
                    result.push((prefix, uri));
                }
            }
        }
        result
    }

    /// Position of a node in document order across all trees
    ///
    /// Unreachable nodes sort last.
    pub fn order_key(&self, id: NodeId) -> u64 {
        if self.order.borrow().is_none() {
            let table = self.build_order();
            *self.order.borrow_mut() = Some(table);
        }
        self.order
            .borrow()
            .as_ref()
            .and_then(|t| t.get(id as usize).copied())
            .unwrap_or(u64::MAX)
    }

    fn build_order(&self) -> Vec<u64> {
        let mut table = vec![u64::MAX; self.nodes.len()];
        let mut seq = 0u64;
        for &root in &self.roots {
            let mut stack = vec![root];
            while let Some(id) = stack.pop() {
                table[id as usize] = seq;
                seq += 1;
                let node = &self.nodes[id as usize];
                for &attr in &node.attributes {
                    table[attr as usize] = seq;
                    seq += 1;
                }
                let mut child = node.last_child;
                while let Some(c) = child {
                    stack.push(c);
                    child = self.nodes[c as usize].prev_sibling;
                }
            }
        }
        table
    }

    /// Sort node ids into document order and drop duplicates
    pub fn sort_document_order(&self, nodes: &mut Vec<NodeId>) {
        nodes.sort_by_key(|&n| self.order_key(n));
        nodes.dedup();
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Unlink a node from its parent (or owner element, for attributes)
    pub fn detach(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(id as usize) else {
            return;
        };
        let (parent, prev, next, kind) = (node.parent, node.prev_sibling, node.next_sibling, node.kind);
        let Some(parent) = parent else {
            return;
        };

        if kind == NodeKind::Attribute {
            self.nodes[parent as usize].attributes.retain(|&a| a != id);
        } else {
            match prev {
                Some(p) => self.nodes[p as usize].next_sibling = next,
                None => self.nodes[parent as usize].first_child = next,
            }
            match next {
                Some(n) => self.nodes[n as usize].prev_sibling = prev,
                None => self.nodes[parent as usize].last_child = prev,
            }
        }
        let node = &mut self.nodes[id as usize];
        node.parent = None;
        node.prev_sibling = None;
        node.next_sibling = None;
        self.invalidate_order();
    }

    /// Append `child` (detaching it first) as the last child of `parent`
    ///
    /// Text merges into a trailing text node of the same kind.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.detach(child);
        let kind = self.nodes.get(child as usize).ok_or(DomError::UnknownNode(child))?.kind;
        if self.get_node(parent).is_none() {
            return Err(DomError::UnknownNode(parent));
        }
        if kind == NodeKind::Attribute {
            self.attach_attribute(parent, child);
            return Ok(());
        }
        if matches!(kind, NodeKind::Text | NodeKind::CData) {
            if let Some(last) = self.nodes[parent as usize].last_child {
                if self.nodes[last as usize].kind == kind {
                    let text = std::mem::take(&mut self.nodes[child as usize].value);
                    self.nodes[last as usize].value.push_str(&text);
                    return Ok(());
                }
            }
        }
        self.link_child(parent, child);
        Ok(())
    }

    /// Put `replacement` where `old` is and detach `old`
    pub fn replace_node(&mut self, old: NodeId, replacement: NodeId) -> Result<()> {
        let parent = self
            .get_node(old)
            .ok_or(DomError::UnknownNode(old))?
            .parent
            .ok_or(DomError::UnknownNode(old))?;
        self.detach(replacement);
        let prev = self.nodes[old as usize].prev_sibling;
        let next = self.nodes[old as usize].next_sibling;
        {
            let node = self.node_mut(replacement)?;
            node.parent = Some(parent);
            node.prev_sibling = prev;
            node.next_sibling = next;
        }
        match prev {
            Some(p) => self.nodes[p as usize].next_sibling = Some(replacement),
            None => self.nodes[parent as usize].first_child = Some(replacement),
        }
        match next {
            Some(n) => self.nodes[n as usize].prev_sibling = Some(replacement),
            None => self.nodes[parent as usize].last_child = Some(replacement),
        }
        let node = &mut self.nodes[old as usize];
        node.parent = None;
        node.prev_sibling = None;
        node.next_sibling = None;
        self.invalidate_order();
        Ok(())
    }

    /// Detach every child of `id` (attributes are kept)
    pub fn remove_children(&mut self, id: NodeId) {
        let children: Vec<NodeId> = self.children(id).collect();
        for child in children {
            self.detach(child);
        }
    }

    /// Replace the character content of a node
    ///
    /// Elements and tree roots lose all children and gain a single text node
    /// (none when `text` is empty); other kinds have their value replaced.
    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<()> {
        let kind = self.get_node(id).ok_or(DomError::UnknownNode(id))?.kind;
        match kind {
            NodeKind::Element | NodeKind::Document => {
                self.remove_children(id);
                self.append_character_data(id, NodeKind::Text, text);
            }
            _ => {
                self.node_mut(id)?.value = text.to_string();
            }
        }
        Ok(())
    }

    /// Set (or create) a non-namespaced or prefixed attribute, returning its node
    pub fn set_attribute(&mut self, element: NodeId, qname: &str, value: &str) -> Result<NodeId> {
        if self.kind(element) != Some(NodeKind::Element) {
            return Err(DomError::NotAnElement(element));
        }
        let existing = self
            .attributes_of(element)
            .iter()
            .copied()
            .find(|&a| self.qualified_name(a) == qname);
        match existing {
            Some(attr) => {
                self.node_mut(attr)?.value = value.to_string();
                Ok(attr)
            }
            None => Ok(self.push_attribute(element, qname, value)),
        }
    }

    // =========================================================================
    // Copying
    // =========================================================================

    /// Take an owned copy of a subtree
    pub fn snapshot(&self, id: NodeId) -> Option<Fragment> {
        self.snapshot_filtered(id, &|_| true)
    }

    /// Take an owned copy of a subtree, skipping nodes for which `keep` is false
    ///
    /// Namespace declarations the copy relies on but inherits from outside
    /// the subtree are added to the top element.
    pub fn snapshot_filtered(&self, id: NodeId, keep: &dyn Fn(NodeId) -> bool) -> Option<Fragment> {
        if !keep(id) {
            return None;
        }
        let mut fragment = self.snapshot_node(id, keep)?;
        if fragment.kind == NodeKind::Element {
            let mut needed = Vec::new();
            collect_undeclared(&fragment, &mut Vec::new(), &mut needed);
            let declarations: Vec<Fragment> = needed
                .into_iter()
                .map(|(prefix, uri)| Fragment {
                    source: id,
                    kind: NodeKind::Attribute,
                    prefix: if prefix.is_empty() { String::new() } else { "xmlns".to_string() },
                    local: if prefix.is_empty() { "xmlns".to_string() } else { prefix },
                    namespace: ns::XMLNS.to_string(),
                    value: uri,
                    attributes: Vec::new(),
                    children: Vec::new(),
                })
                .collect();
            fragment.attributes.splice(0..0, declarations);
        }
        Some(fragment)
    }

    fn snapshot_node(&self, id: NodeId, keep: &dyn Fn(NodeId) -> bool) -> Option<Fragment> {
        let node = self.get_node(id)?;
        let attributes = node
            .attributes
            .iter()
            .filter(|&&a| keep(a))
            .filter_map(|&a| self.snapshot_node(a, keep))
            .collect();
        let children = self
            .children(id)
            .filter(|&c| keep(c))
            .filter_map(|c| self.snapshot_node(c, keep))
            .collect();
        Some(Fragment {
            source: id,
            kind: node.kind,
            prefix: self.strings.get_or_empty(node.prefix_id).to_string(),
            local: self.strings.get_or_empty(node.local_id).to_string(),
            namespace: self.strings.get_or_empty(node.namespace_id).to_string(),
            value: node.value.clone(),
            attributes,
            children,
        })
    }

    /// Materialize a fragment, appending it to `parent` when given
    ///
    /// Allocation follows parse order (node, attributes, children), and every
    /// `(source, new)` pair is recorded in `map`.
    pub fn build(
        &mut self,
        fragment: &Fragment,
        parent: Option<NodeId>,
        map: &mut Vec<(NodeId, NodeId)>,
    ) -> NodeId {
        let prefix_id = self.strings.intern(&fragment.prefix);
        let local_id = self.strings.intern(&fragment.local);
        let namespace_id = self.strings.intern(&fragment.namespace);
        let node = match fragment.kind {
            NodeKind::Document => XmlNode::document(),
            NodeKind::Element => XmlNode::element(local_id, prefix_id, namespace_id),
            NodeKind::Attribute => {
                XmlNode::attribute(local_id, prefix_id, namespace_id, fragment.value.clone())
            }
            NodeKind::ProcessingInstruction => {
                XmlNode::processing_instruction(local_id, fragment.value.clone())
            }
            kind => XmlNode::character_data(kind, fragment.value.clone()),
        };
        let id = self.alloc(node);
        map.push((fragment.source, id));
        if let Some(parent) = parent {
            match fragment.kind {
                NodeKind::Attribute => self.attach_attribute(parent, id),
                _ => self.link_child(parent, id),
            }
        }
        for attr in &fragment.attributes {
            self.build(attr, Some(id), map);
        }
        for child in &fragment.children {
            if matches!(child.kind, NodeKind::Text | NodeKind::CData) {
                if let Some(last) = self.nodes[id as usize].last_child {
                    if self.nodes[last as usize].kind == child.kind {
                        self.nodes[last as usize].value.push_str(&child.value);
                        map.push((child.source, last));
                        continue;
                    }
                }
            }
            self.build(child, Some(id), map);
        }
        id
    }

    /// Copy a subtree of `src` under `parent` in this arena
    pub fn import(&mut self, src: &XmlDocument, node: NodeId, parent: NodeId) -> Result<NodeId> {
        let fragment = src.snapshot(node).ok_or(DomError::UnknownNode(node))?;
        let mut map = Vec::new();
        Ok(self.build(&fragment, Some(parent), &mut map))
    }

    /// Copy a subtree into a fresh single-tree arena, filtering nodes
    ///
    /// Returns the arena and the `(original, copy)` id pairs.
    pub fn clone_subtree(
        &self,
        id: NodeId,
        keep: &dyn Fn(NodeId) -> bool,
    ) -> Option<(XmlDocument, Vec<(NodeId, NodeId)>)> {
        let mut copy = XmlDocument::new();
        let root = copy.new_tree();
        let mut map = Vec::new();
        if self.kind(id)? == NodeKind::Document {
            map.push((id, root));
            for child in self.children(id).filter(|&c| keep(c)) {
                let fragment = self.snapshot_filtered(child, keep)?;
                copy.build(&fragment, Some(root), &mut map);
            }
        } else {
            let fragment = self.snapshot_filtered(id, keep)?;
            copy.build(&fragment, Some(root), &mut map);
        }
        Some((copy, map))
    }

    /// Rebuild every registered tree in parse order
    ///
    /// The returned remap is indexed by old node id. Serializing the compacted
    /// trees and parsing them back in root order reproduces identical ids.
    pub fn compact(&self) -> (XmlDocument, Vec<Option<NodeId>>) {
        let mut copy = XmlDocument::new();
        let mut remap = vec![None; self.nodes.len()];
        for &root in &self.roots {
            if let Some(fragment) = self.snapshot_node(root, &|_| true) {
                let mut map = Vec::new();
                let new_root = copy.build(&fragment, None, &mut map);
                copy.roots.push(new_root);
                for (old, new) in map {
                    remap[old as usize] = Some(new);
                }
            }
        }
        (copy, remap)
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    /// Serialize a node and its subtree without an XML declaration
    pub fn serialize(&self, id: NodeId) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        self.write_node(&mut writer, id)?;
        String::from_utf8(writer.into_inner()).map_err(|e| DomError::Serialize(e.to_string()))
    }

    fn write_node(&self, writer: &mut Writer<Vec<u8>>, id: NodeId) -> Result<()> {
        let node = self.get_node(id).ok_or(DomError::UnknownNode(id))?;
        match node.kind {
            NodeKind::Document => {
                for child in self.children(id) {
                    self.write_node(writer, child)?;
                }
            }
            NodeKind::Element => {
                let name = self.qualified_name(id);
                let mut start = BytesStart::new(name.as_str());
                for &attr in &node.attributes {
                    let attr_name = self.qualified_name(attr);
                    start.push_attribute((attr_name.as_str(), self.nodes[attr as usize].value.as_str()));
                }
                if node.has_children() {
                    writer.write_event(Event::Start(start)).map_err(write_error)?;
                    for child in self.children(id) {
                        self.write_node(writer, child)?;
                    }
                    writer
                        .write_event(Event::End(BytesEnd::new(name.as_str())))
                        .map_err(write_error)?;
                } else {
                    writer.write_event(Event::Empty(start)).map_err(write_error)?;
                }
            }
            NodeKind::Attribute => {
                return Err(DomError::Serialize(format!("attribute {id} has no standalone form")));
            }
            NodeKind::Text => {
                writer
                    .write_event(Event::Text(BytesText::new(&node.value)))
                    .map_err(write_error)?;
            }
            NodeKind::CData => {
                writer
                    .write_event(Event::CData(BytesCData::new(node.value.as_str())))
                    .map_err(write_error)?;
            }
            NodeKind::Comment => {
                writer
                    .write_event(Event::Comment(BytesText::from_escaped(node.value.as_str())))
                    .map_err(write_error)?;
            }
            NodeKind::ProcessingInstruction => {
                let target = self.strings.get_or_empty(node.local_id);
                let content = if node.value.is_empty() {
                    target.to_string()
                } else {
                    format!("{target} {}", node.value)
                };
                writer
                    .write_event(Event::PI(BytesPI::new(content.as_str())))
                    .map_err(write_error)?;
            }
        }
        Ok(())
    }
}

fn write_error<E: std::fmt::Display>(e: E) -> DomError {
    DomError::Serialize(e.to_string())
}

/// Collect `(prefix, uri)` pairs used in `fragment` but not declared inside it
fn collect_undeclared(
    fragment: &Fragment,
    scope: &mut Vec<(String, String)>,
    needed: &mut Vec<(String, String)>,
) {
    if fragment.kind != NodeKind::Element {
        return;
    }
    let depth = scope.len();
    for attr in &fragment.attributes {
        if attr.namespace == ns::XMLNS {
            let prefix = if attr.prefix.is_empty() { String::new() } else { attr.local.clone() };
            scope.push((prefix, attr.value.clone()));
        }
    }

    let mut require = |prefix: &str, uri: &str, scope: &Vec<(String, String)>| {
        if prefix == "xml" || prefix == "xmlns" {
            return;
        }
        let bound = scope
            .iter()
            .rev()
            .find(|(p, _)| p == prefix)
            .map(|(_, u)| u.as_str())
            .or_else(|| needed.iter().find(|(p, _)| p == prefix).map(|(_, u)| u.as_str()))
            .unwrap_or("");
        if bound != uri && !needed.iter().any(|(p, _)| p == prefix) {
            needed.push((prefix.to_string(), uri.to_string()));
        }
    };
    require(&fragment.prefix, &fragment.namespace, scope);
    for attr in &fragment.attributes {
        if !attr.prefix.is_empty() && attr.namespace != ns::XMLNS {
            require(&attr.prefix, &attr.namespace, scope);
        }
    }

    for child in &fragment.children {
        collect_undeclared(child, scope, needed);
    }
    scope.truncate(depth);
}

/// Iterator over child nodes
pub struct ChildIter<'d> {
    doc: &'d XmlDocument,
    next: Option<NodeId>,
}

impl<'d> Iterator for ChildIter<'d> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.doc.get_node(current).and_then(|n| n.next_sibling);
        Some(current)
    }
}

/// Iterator over descendant nodes (depth-first, document order)
pub struct DescendantIter<'d> {
    doc: &'d XmlDocument,
    stack: Vec<NodeId>,
}

impl<'d> DescendantIter<'d> {
    fn push_children(&mut self, id: NodeId) {
        // Reverse order so the first child pops first
        let mut child = self.doc.get_node(id).and_then(|n| n.last_child);
        while let Some(c) = child {
            self.stack.push(c);
            child = self.doc.get_node(c).and_then(|n| n.prev_sibling);
        }
    }
}

impl<'d> Iterator for DescendantIter<'d> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.stack.pop()?;
        self.push_children(current);
        Some(current)
    }
}

// =============================================================================
// DocumentAccess implementation
// =============================================================================

impl DocumentAccess for XmlDocument {
    fn get_node(&self, id: NodeId) -> Option<&XmlNode> {
        self.nodes.get(id as usize)
    }

    fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.get_node(id).and_then(|n| n.parent)
    }

    fn root_of(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.parent_of(current) {
            current = parent;
        }
        current
    }

    fn node_name(&self, id: NodeId) -> String {
        self.qualified_name(id)
    }

    fn node_local_name(&self, id: NodeId) -> Option<&str> {
        self.get_node(id).and_then(|n| self.strings.get(n.local_id))
    }

    fn node_namespace(&self, id: NodeId) -> Option<&str> {
        self.get_node(id).and_then(|n| self.strings.get(n.namespace_id))
    }

    fn attributes_of(&self, id: NodeId) -> &[NodeId] {
        self.get_node(id).map(|n| n.attributes.as_slice()).unwrap_or(&[])
    }

    fn children_vec(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id).collect()
    }

    fn descendants_vec(&self, id: NodeId) -> Vec<NodeId> {
        self.descendants(id).collect()
    }

    fn string_value(&self, id: NodeId) -> String {
        let Some(node) = self.get_node(id) else {
            return String::new();
        };
        match node.kind {
            NodeKind::Document | NodeKind::Element => self
                .descendants(id)
                .filter_map(|d| self.get_node(d))
                .filter(|n| n.is_text())
                .map(|n| n.value.as_str())
                .collect(),
            _ => node.value.clone(),
        }
    }

    fn document_order(&self, id: NodeId) -> u64 {
        self.order_key(id)
    }

    fn namespace_for_prefix(&self, context: NodeId, prefix: &str) -> Option<&str> {
        self.lookup_namespace(context, prefix)
    }

    fn element_with_id(&self, context: NodeId, id: &str) -> Option<NodeId> {
        self.element_by_id(self.root_of(context), id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORM: &str = r#"<form xmlns:xf="http://www.w3.org/2002/xforms"><xf:model id="m"><xf:instance><data xmlns="">a &amp; b<item n="1"/></data></xf:instance></xf:model></form>"#;

    #[test]
    fn test_parse_decodes_references() {
        let doc = XmlDocument::parse(r#"<a v="x &lt; &#65;&#x42;">&amp;&#67;&gt;</a>"#).unwrap();
        let a = doc.document_element(doc.roots()[0]).unwrap();
        assert_eq!(doc.attribute(a, "v"), Some("x < AB"));
        assert_eq!(doc.string_value(a), "&C>");
        assert_eq!(doc.children(a).count(), 1);
    }

    #[test]
    fn test_parse_rejects_unknown_references() {
        assert!(matches!(XmlDocument::parse(r#"<a v="&nbsp;"/>"#), Err(DomError::Parse { .. })));
        assert!(matches!(XmlDocument::parse("<a>&nbsp;</a>"), Err(DomError::Parse { .. })));
        assert!(matches!(XmlDocument::parse(r#"<a v="a & b"/>"#), Err(DomError::Parse { .. })));
    }

    #[test]
    fn test_parse_names_and_namespaces() {
        let doc = XmlDocument::parse(FORM).unwrap();
        let root = doc.roots()[0];
        let form = doc.document_element(root).unwrap();
        let model = doc.child_elements(form).next().unwrap();
        assert!(doc.has_name(model, "http://www.w3.org/2002/xforms", "model"));
        assert_eq!(doc.qualified_name(model), "xf:model");
        assert_eq!(doc.attribute(model, "id"), Some("m"));
        assert_eq!(doc.lookup_namespace(model, "xf"), Some("http://www.w3.org/2002/xforms"));
    }

    #[test]
    fn test_references_merge_into_one_text_node() {
        let doc = XmlDocument::parse("<a>x &lt; y</a>").unwrap();
        let a = doc.document_element(doc.roots()[0]).unwrap();
        assert_eq!(doc.children(a).count(), 1);
        assert_eq!(doc.string_value(a), "x < y");
    }

    #[test]
    fn test_parse_error_reports_position() {
        let err = XmlDocument::parse("<a><b></a>").unwrap_err();
        assert!(matches!(err, DomError::Parse { .. }));
        assert!(XmlDocument::parse("<a>").is_err());
        assert!(XmlDocument::parse("<p:a/>").is_err());
    }

    #[test]
    fn test_serialize_escapes() {
        let doc = XmlDocument::parse(r#"<a k="&quot;1&quot;">x &amp; y</a>"#).unwrap();
        let text = doc.serialize(doc.roots()[0]).unwrap();
        let reparsed = XmlDocument::parse(&text).unwrap();
        let a = reparsed.document_element(reparsed.roots()[0]).unwrap();
        assert_eq!(reparsed.attribute(a, "k"), Some("\"1\""));
        assert_eq!(reparsed.string_value(a), "x & y");
    }

    #[test]
    fn test_set_text_and_detach() {
        let mut doc = XmlDocument::parse("<a><b/>text</a>").unwrap();
        let a = doc.document_element(doc.roots()[0]).unwrap();
        let b = doc.child_elements(a).next().unwrap();
        doc.set_text(a, "new").unwrap();
        assert!(!doc.is_attached(b));
        assert_eq!(doc.string_value(a), "new");
        doc.set_text(a, "").unwrap();
        assert!(doc.children(a).next().is_none());
    }

    #[test]
    fn test_set_attribute_creates_and_updates() {
        let mut doc = XmlDocument::parse("<a/>").unwrap();
        let a = doc.document_element(doc.roots()[0]).unwrap();
        let id1 = doc.set_attribute(a, "id", "x").unwrap();
        let id2 = doc.set_attribute(a, "id", "y").unwrap();
        assert_eq!(id1, id2);
        assert_eq!(doc.attribute(a, "id"), Some("y"));
    }

    #[test]
    fn test_snapshot_adds_inherited_declarations() {
        let doc = XmlDocument::parse(
            r#"<r xmlns:my="urn:my"><my:data my:flag="1"><my:v/></my:data></r>"#,
        )
        .unwrap();
        let r = doc.document_element(doc.roots()[0]).unwrap();
        let data = doc.child_elements(r).next().unwrap();
        let (copy, _) = doc.clone_subtree(data, &|_| true).unwrap();
        let text = copy.serialize(copy.roots()[0]).unwrap();
        assert_eq!(text, r#"<my:data xmlns:my="urn:my" my:flag="1"><my:v/></my:data>"#);
    }

    #[test]
    fn test_clone_subtree_filters_and_maps() {
        let doc = XmlDocument::parse("<a><keep/><drop/></a>").unwrap();
        let a = doc.document_element(doc.roots()[0]).unwrap();
        let drop = doc.child_elements(a).nth(1).unwrap();
        let (copy, map) = doc.clone_subtree(a, &|n| n != drop).unwrap();
        assert_eq!(copy.serialize(copy.roots()[0]).unwrap(), "<a><keep/></a>");
        assert!(map.iter().any(|&(old, _)| old == a));
        assert!(!map.iter().any(|&(old, _)| old == drop));
    }

    #[test]
    fn test_compact_matches_reparse() {
        let mut doc = XmlDocument::parse("<a><b/><c x='1'>t</c></a>").unwrap();
        let a = doc.document_element(doc.roots()[0]).unwrap();
        let b = doc.child_elements(a).next().unwrap();
        doc.detach(b);
        doc.set_text(b, "gone").unwrap();
        let inserted = doc.parse_fragment(Some(a), "<d/>more").unwrap();
        for node in inserted {
            doc.append_child(a, node).unwrap();
        }
        doc.parse_tree("<second/>").unwrap();

        let (compacted, remap) = doc.compact();
        assert!(remap[b as usize].is_none());

        let mut reparsed = XmlDocument::new();
        for &root in compacted.roots() {
            reparsed.parse_tree(&compacted.serialize(root).unwrap()).unwrap();
        }
        assert_eq!(reparsed.node_count(), compacted.node_count());
        for id in 0..compacted.node_count() as NodeId {
            assert_eq!(reparsed.kind(id), compacted.kind(id));
            assert_eq!(reparsed.qualified_name(id), compacted.qualified_name(id));
        }
    }

    #[test]
    fn test_document_order_after_mutation() {
        let mut doc = XmlDocument::parse("<a><b/></a>").unwrap();
        let a = doc.document_element(doc.roots()[0]).unwrap();
        let b = doc.child_elements(a).next().unwrap();
        let first = doc.parse_fragment(Some(a), "<z/>").unwrap()[0];
        doc.replace_node(b, first).unwrap();
        doc.append_child(a, b).unwrap();
        assert!(doc.order_key(first) < doc.order_key(b));
        let mut nodes = vec![b, first, b];
        doc.sort_document_order(&mut nodes);
        assert_eq!(nodes, vec![first, b]);
    }
}
