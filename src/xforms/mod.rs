//! XForms processing model
//!
//! Element registry, evaluation contexts, model item state, binding
//! resolution, the model state machine, submissions, actions and events.
//! Everything here operates on a [`FormDocument`](crate::engine::FormDocument).

pub mod actions;
pub mod binding;
pub mod context;
pub mod datatypes;
pub mod events;
pub mod functions;
pub mod item;
pub mod model;
pub mod registry;
pub mod submission;

pub use binding::{Binding, BindingException};
pub use context::EvaluationContext;
pub use events::{Notification, NotificationLog, NotificationSink};
pub use item::{ItemType, ModelItemState, ModelItemView};
pub use model::{DeferredFlags, ModelStage};
pub use registry::{ElementKind, Registry};
pub use submission::SubmitOutcome;

/// Well-known namespace URIs
pub mod ns {
    pub const XFORMS: &str = "http://www.w3.org/2002/xforms";
    pub const XSD: &str = "http://www.w3.org/2001/XMLSchema";
    pub const EVENTS: &str = "http://www.w3.org/2001/xml-events";
}
