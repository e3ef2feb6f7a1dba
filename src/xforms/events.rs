//! Notifications and XML Events listeners
//!
//! Every notification goes to the host's [`NotificationSink`] first. The
//! [`ListenerTable`] then yields the handlers registered for it so the
//! engine can queue them; no handler runs inside dispatch.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use super::ns;
use crate::dom::{DocumentAccess, NodeId, XmlDocument};
use crate::error::SubmitErrorKind;

/// Notification names
pub mod names {
    pub const MODEL_CONSTRUCT: &str = "xforms-model-construct";
    pub const MODEL_CONSTRUCT_DONE: &str = "xforms-model-construct-done";
    pub const READY: &str = "xforms-ready";

    pub const VALUE_CHANGED: &str = "xforms-value-changed";
    pub const VALID: &str = "xforms-valid";
    pub const INVALID: &str = "xforms-invalid";
    pub const READONLY: &str = "xforms-readonly";
    pub const READWRITE: &str = "xforms-readwrite";
    pub const REQUIRED: &str = "xforms-required";
    pub const OPTIONAL: &str = "xforms-optional";
    pub const ENABLED: &str = "xforms-enabled";
    pub const DISABLED: &str = "xforms-disabled";

    pub const SUBMIT: &str = "xforms-submit";
    pub const SUBMIT_DONE: &str = "xforms-submit-done";
    pub const SUBMIT_ERROR: &str = "xforms-submit-error";

    pub const BINDING_EXCEPTION: &str = "xforms-binding-exception";
    pub const COMPUTE_EXCEPTION: &str = "xforms-compute-exception";
    pub const LINK_EXCEPTION: &str = "xforms-link-exception";
    pub const VERSION_EXCEPTION: &str = "xforms-version-exception";
}

/// A named lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub name: String,
    pub target: NodeId,
    /// `id` attribute of the target, when it has one
    pub target_id: Option<String>,
    /// Set on `xforms-submit-error`
    pub error_type: Option<SubmitErrorKind>,
    pub message: Option<String>,
}

impl Notification {
    pub fn new(name: impl Into<String>, target: NodeId) -> Self {
        Notification {
            name: name.into(),
            target,
            target_id: None,
            error_type: None,
            message: None,
        }
    }

    pub fn with_error(mut self, kind: SubmitErrorKind) -> Self {
        self.error_type = Some(kind);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Receives every notification the engine dispatches
pub trait NotificationSink {
    fn notify(&self, notification: &Notification);
}

/// Sink that records notifications; clones share the same log
#[derive(Debug, Clone, Default)]
pub struct NotificationLog {
    entries: Rc<RefCell<Vec<Notification>>>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Notification> {
        self.entries.borrow().clone()
    }

    /// How many notifications named `name` were recorded
    pub fn count(&self, name: &str) -> usize {
        self.entries.borrow().iter().filter(|n| n.name == name).count()
    }

    /// Names recorded for `target`, in order
    pub fn names_for(&self, target: NodeId) -> Vec<String> {
        self.entries
            .borrow()
            .iter()
            .filter(|n| n.target == target)
            .map(|n| n.name.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

impl NotificationSink for NotificationLog {
    fn notify(&self, notification: &Notification) {
        self.entries.borrow_mut().push(notification.clone());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Capture,
    Default,
}

/// One XML Events registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    /// Element that declared the registration
    pub element: NodeId,
    pub event: String,
    pub observer: NodeId,
    pub handler: NodeId,
    pub phase: Phase,
    pub stop_propagation: bool,
}

impl Listener {
    /// Read the `ev:*` attributes of `element`
    ///
    /// Plain elements use the namespaced attributes; `ev:listener` also
    /// accepts them unprefixed. Returns `None` when no event is named or a
    /// referenced observer or handler does not exist.
    pub fn from_element(xml: &XmlDocument, element: NodeId, is_listener_element: bool) -> Option<Self> {
        let attr = |local: &str| {
            xml.attribute_ns(element, ns::EVENTS, local).or_else(|| {
                if is_listener_element {
                    xml.attribute(element, local)
                } else {
                    None
                }
            })
        };
        let event = attr("event")?.trim().to_string();
        if event.is_empty() {
            return None;
        }
        let root = xml.root_of(element);
        let lookup = |reference: &str| {
            let id = reference.trim().trim_start_matches('#');
            xml.element_by_id(root, id)
        };

        let observer_attr = attr("observer");
        let handler_attr = attr("handler");
        let (observer, handler) = match (observer_attr, handler_attr) {
            (Some(o), Some(h)) => (lookup(o)?, lookup(h)?),
            (Some(o), None) => (lookup(o)?, element),
            (None, Some(h)) => (element, lookup(h)?),
            (None, None) => (xml.parent_of(element)?, element),
        };
        let phase = match attr("phase") {
            Some("capture") => Phase::Capture,
            _ => Phase::Default,
        };
        Some(Listener {
            element,
            event,
            observer,
            handler,
            phase,
            stop_propagation: attr("propagate") == Some("stop"),
        })
    }
}

/// All listener registrations of a document
#[derive(Debug, Clone, Default)]
pub struct ListenerTable {
    listeners: Vec<Listener>,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration; a repeated element replaces its earlier entry
    pub fn register(&mut self, listener: Listener) {
        self.listeners.retain(|l| l.element != listener.element);
        self.listeners.push(listener);
    }

    pub fn retain(&mut self, keep: impl Fn(&Listener) -> bool) {
        self.listeners.retain(|l| keep(l));
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Handlers for `event` targeted at `target`, in firing order
    ///
    /// Capture listeners fire from the root down to the target's parent,
    /// then default-phase listeners on the target and on each ancestor up
    /// to the root. A listener with `propagate="stop"` ends the walk after
    /// the other listeners on the same observer.
    pub fn handlers(&self, xml: &XmlDocument, target: NodeId, event: &str) -> Vec<NodeId> {
        let mut path = xml.ancestors(target);
        path.reverse();

        let mut handlers = Vec::new();
        for &observer in &path {
            if self.fire(observer, event, Phase::Capture, &mut handlers) {
                return handlers;
            }
        }
        if self.fire(target, event, Phase::Default, &mut handlers) {
            return handlers;
        }
        for &observer in path.iter().rev() {
            if self.fire(observer, event, Phase::Default, &mut handlers) {
                break;
            }
        }
        handlers
    }

    /// Collect handlers on one observer; true when propagation stops
    fn fire(&self, observer: NodeId, event: &str, phase: Phase, handlers: &mut Vec<NodeId>) -> bool {
        let mut stop = false;
        for listener in self
            .listeners
            .iter()
            .filter(|l| l.observer == observer && l.phase == phase && l.event == event)
        {
            handlers.push(listener.handler);
            stop |= listener.stop_propagation;
        }
        stop
    }
}
