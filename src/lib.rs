//! nxforms - XForms processing engine
//!
//! Layers, bottom up:
//! - `dom`: arena XML trees addressed by `NodeId`
//! - `xpath`: XPath 1.0 compiler and evaluator over the arena
//! - `xforms`: models, bindings, model item state, actions, events, submissions
//! - `engine`: the invoke loop, host API and persisted state
//!
//! The engine performs no I/O. Instance loads and submissions go through the
//! collaborators in [`host`].
//!
//! ```no_run
//! use nxforms::{Engine, NotificationLog};
//!
//! let log = NotificationLog::new();
//! let mut engine = Engine::builder()
//!     .sink(log.clone())
//!     .load(r#"<html xmlns:xf="http://www.w3.org/2002/xforms">
//!         <xf:model><xf:instance><data><name/></data></xf:instance></xf:model>
//!         <xf:input id="name" ref="name"/>
//!     </html>"#)?;
//! let input = engine.element_by_id("name").unwrap();
//! engine.set_value(input, "Ada")?;
//! engine.invoke()?;
//! # Ok::<(), nxforms::EngineError>(())
//! ```

pub mod config;
pub mod dom;
pub mod engine;
pub mod error;
pub mod host;
pub mod xforms;
pub mod xpath;

pub use config::EngineConfig;
pub use dom::{NodeId, XmlDocument};
pub use engine::{ControlView, Engine, EngineBuilder, EngineState, Module};
pub use error::{EngineError, FatalError, SubmitError, SubmitErrorKind};
pub use host::{
    Priority, ResourceResolver, SubmissionProcessor, SubmissionRequest, SubmissionResponse,
};
pub use xforms::{ModelItemView, Notification, NotificationLog, NotificationSink, SubmitOutcome};
