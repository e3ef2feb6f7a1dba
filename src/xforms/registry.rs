//! Qualified-name to element-kind registry
//!
//! The set of XForms elements the engine gives behaviour to is closed, so
//! structural scans look names up here instead of discovering types at run
//! time.

use std::collections::HashMap;

use serde::Serialize;

use super::ns;

/// Every element the engine attaches behaviour to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElementKind {
    Model,
    Instance,
    Bind,
    Submission,
    Group,

    Input,
    Secret,
    TextArea,
    Output,
    Select,
    Select1,
    Range,
    Upload,
    Trigger,
    Submit,

    Method,
    Resource,
    Header,
    Name,
    Value,

    Action,
    SetValue,
    Send,
    Dispatch,
    Rebuild,
    Recalculate,
    Revalidate,
    Refresh,

    Listener,
}

impl ElementKind {
    /// Form controls, each with a single-node binding
    pub fn is_control(self) -> bool {
        matches!(
            self,
            ElementKind::Input
                | ElementKind::Secret
                | ElementKind::TextArea
                | ElementKind::Output
                | ElementKind::Select
                | ElementKind::Select1
                | ElementKind::Range
                | ElementKind::Upload
                | ElementKind::Trigger
                | ElementKind::Submit
        )
    }

    pub fn is_action(self) -> bool {
        matches!(
            self,
            ElementKind::Action
                | ElementKind::SetValue
                | ElementKind::Send
                | ElementKind::Dispatch
                | ElementKind::Rebuild
                | ElementKind::Recalculate
                | ElementKind::Revalidate
                | ElementKind::Refresh
        )
    }

    /// Elements whose binding becomes the evaluation context of their descendants
    pub fn is_context_scope(self) -> bool {
        self.is_control()
            || matches!(
                self,
                ElementKind::Model | ElementKind::Bind | ElementKind::Group | ElementKind::Submission
            )
    }

    /// Elements whose binding is refreshed with the controls
    pub fn is_ui_bound(self) -> bool {
        self.is_control() || self == ElementKind::Group
    }

    /// Whether the binding attribute is `nodeset` rather than `ref`
    pub fn uses_nodeset(self) -> bool {
        self == ElementKind::Bind
    }
}

/// Lookup table from `(namespace, local-name)` to [`ElementKind`]
#[derive(Debug, Clone)]
pub struct Registry {
    entries: HashMap<String, HashMap<String, ElementKind>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}

impl Registry {
    /// An empty registry
    pub fn new() -> Self {
        Registry {
            entries: HashMap::new(),
        }
    }

    /// Every XForms element plus `ev:listener`
    pub fn standard() -> Self {
        use ElementKind::*;
        let mut registry = Self::new();
        for (local, kind) in [
            ("model", Model),
            ("instance", Instance),
            ("bind", Bind),
            ("submission", Submission),
            ("group", Group),
            ("input", Input),
            ("secret", Secret),
            ("textarea", TextArea),
            ("output", Output),
            ("select", Select),
            ("select1", Select1),
            ("range", Range),
            ("upload", Upload),
            ("trigger", Trigger),
            ("submit", Submit),
            ("method", Method),
            ("resource", Resource),
            ("header", Header),
            ("name", Name),
            ("value", Value),
            ("action", Action),
            ("setvalue", SetValue),
            ("send", Send),
            ("dispatch", Dispatch),
            ("rebuild", Rebuild),
            ("recalculate", Recalculate),
            ("revalidate", Revalidate),
            ("refresh", Refresh),
        ] {
            registry.register(ns::XFORMS, local, kind);
        }
        registry.register(ns::EVENTS, "listener", Listener);
        registry
    }

    pub fn register(&mut self, namespace: &str, local: &str, kind: ElementKind) {
        self.entries
            .entry(namespace.to_string())
            .or_default()
            .insert(local.to_string(), kind);
    }

    pub fn lookup(&self, namespace: &str, local: &str) -> Option<ElementKind> {
        self.entries.get(namespace)?.get(local).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_lookup() {
        let registry = Registry::standard();
        assert_eq!(registry.lookup(ns::XFORMS, "model"), Some(ElementKind::Model));
        assert_eq!(registry.lookup(ns::XFORMS, "select1"), Some(ElementKind::Select1));
        assert_eq!(registry.lookup(ns::EVENTS, "listener"), Some(ElementKind::Listener));
        assert_eq!(registry.lookup("", "model"), None);
        assert_eq!(registry.lookup(ns::XFORMS, "repeat"), None);
    }

    #[test]
    fn test_kind_classes() {
        assert!(ElementKind::Input.is_control());
        assert!(ElementKind::Input.is_context_scope());
        assert!(ElementKind::Group.is_context_scope());
        assert!(!ElementKind::Group.is_control());
        assert!(ElementKind::SetValue.is_action());
        assert!(!ElementKind::Listener.is_context_scope());
        assert!(ElementKind::Bind.uses_nodeset());
    }
}
