//! Namespace Resolution
//!
//! Stack-based namespace resolver used while building trees. Lookups on an
//! already built tree walk the `xmlns` attributes of the ancestors instead
//! (see `XmlDocument::lookup_namespace`), because mutation can move nodes
//! between scopes after parsing.

use super::strings::{NameId, StringPool};

/// Well-known namespace URIs
pub mod ns {
    pub const XML: &str = "http://www.w3.org/XML/1998/namespace";
    pub const XMLNS: &str = "http://www.w3.org/2000/xmlns/";
}

/// Namespace binding (prefix -> URI)
#[derive(Debug, Clone)]
struct NsBinding {
    prefix_id: NameId,
    uri_id: NameId,
    depth: u16,
}

/// Stack-based namespace resolver
#[derive(Debug)]
pub struct NamespaceResolver {
    bindings: Vec<NsBinding>,
    depth: u16,
    xml_prefix_id: NameId,
    xmlns_prefix_id: NameId,
}

impl NamespaceResolver {
    /// Create a resolver with the `xml` and `xmlns` prefixes pre-bound
    pub fn new(strings: &mut StringPool) -> Self {
        let xml_prefix_id = strings.intern("xml");
        let xmlns_prefix_id = strings.intern("xmlns");
        let xml_uri_id = strings.intern(ns::XML);
        let xmlns_uri_id = strings.intern(ns::XMLNS);

        let mut resolver = NamespaceResolver {
            bindings: Vec::with_capacity(16),
            depth: 0,
            xml_prefix_id,
            xmlns_prefix_id,
        };
        resolver.bindings.push(NsBinding {
            prefix_id: xml_prefix_id,
            uri_id: xml_uri_id,
            depth: 0,
        });
        resolver.bindings.push(NsBinding {
            prefix_id: xmlns_prefix_id,
            uri_id: xmlns_uri_id,
            depth: 0,
        });
        resolver
    }

    /// Enter a new element scope
    pub fn push_scope(&mut self) {
        self.depth += 1;
    }

    /// Leave an element scope, removing any bindings declared in it
    pub fn pop_scope(&mut self) {
        while let Some(binding) = self.bindings.last() {
            if binding.depth < self.depth {
                break;
            }
            self.bindings.pop();
        }
        self.depth = self.depth.saturating_sub(1);
    }

    /// Declare a namespace binding for the current scope
    pub fn declare(&mut self, prefix_id: NameId, uri_id: NameId) {
        if prefix_id == self.xml_prefix_id || prefix_id == self.xmlns_prefix_id {
            return;
        }
        self.bindings.push(NsBinding {
            prefix_id,
            uri_id,
            depth: self.depth,
        });
    }

    /// Declare the default namespace for the current scope (0 undeclares it)
    pub fn declare_default(&mut self, uri_id: NameId) {
        self.declare(0, uri_id);
    }

    /// Resolve a prefix to a namespace URI id
    pub fn resolve(&self, prefix_id: NameId) -> Option<NameId> {
        self.bindings
            .iter()
            .rev()
            .find(|binding| binding.prefix_id == prefix_id)
            .map(|binding| binding.uri_id)
    }

    /// Resolve the default namespace, 0 meaning "no namespace"
    pub fn resolve_default(&self) -> NameId {
        self.resolve(0).unwrap_or(0)
    }

    /// Whether a prefix is the reserved `xmlns` prefix
    #[inline]
    pub fn is_xmlns_prefix(&self, prefix_id: NameId) -> bool {
        prefix_id == self.xmlns_prefix_id
    }
}

/// Split a qualified name into `(prefix, local)`; the prefix is empty when absent
pub fn split_qname(qname: &str) -> (&str, &str) {
    match memchr::memchr(b':', qname.as_bytes()) {
        Some(pos) => (&qname[..pos], &qname[pos + 1..]),
        None => ("", qname),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_namespaces() {
        let mut strings = StringPool::new();
        let resolver = NamespaceResolver::new(&mut strings);
        let xml_id = strings.intern("xml");
        assert!(resolver.resolve(xml_id).is_some());
    }

    #[test]
    fn test_scope_pop() {
        let mut strings = StringPool::new();
        let mut resolver = NamespaceResolver::new(&mut strings);
        let prefix = strings.intern("xf");
        let uri = strings.intern("http://www.w3.org/2002/xforms");

        resolver.push_scope();
        resolver.declare(prefix, uri);
        assert_eq!(resolver.resolve(prefix), Some(uri));

        resolver.pop_scope();
        assert_eq!(resolver.resolve(prefix), None);
    }

    #[test]
    fn test_default_undeclared() {
        let mut strings = StringPool::new();
        let mut resolver = NamespaceResolver::new(&mut strings);
        let uri = strings.intern("http://example.com/a");

        resolver.push_scope();
        resolver.declare_default(uri);
        resolver.push_scope();
        resolver.declare_default(0);
        assert_eq!(resolver.resolve_default(), 0);
        resolver.pop_scope();
        assert_eq!(resolver.resolve_default(), uri);
    }

    #[test]
    fn test_split_qname() {
        assert_eq!(split_qname("xf:instance"), ("xf", "instance"));
        assert_eq!(split_qname("data"), ("", "data"));
    }
}
