//! Error taxonomy for the engine
//!
//! Each layer has its own enum: [`DomError`](crate::dom::DomError) for
//! trees, [`XPathError`](crate::xpath::XPathError) for expressions, and the
//! types below for the processing model. [`EngineError`] is what host calls
//! return.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dom::DomError;
use crate::xpath::XPathError;

/// Unrecoverable document errors
///
/// Recording one marks the document failed; every later `invoke` is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[non_exhaustive]
pub enum FatalError {
    /// A model declares a version this engine does not accept
    #[error("model '{element}' declares unsupported version '{version}'")]
    Version {
        /// Id of the model element
        element: String,
        /// The declared version list
        version: String,
    },

    /// Instance data could not be fetched or parsed
    #[error("cannot load '{uri}' for '{element}': {reason}")]
    Link {
        /// Id of the instance element
        element: String,
        /// The URI as written
        uri: String,
        /// Underlying reason
        reason: String,
    },

    /// A deferred-update loop exceeded its iteration ceiling
    #[error("{phase} did not converge after {iterations} iterations")]
    NonConvergent {
        /// Phase or loop name (`rebuild`, `recalculate`, `invoke`, ...)
        phase: String,
        /// The ceiling that was hit
        iterations: u32,
    },
}

/// Reason a submission failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmitErrorKind {
    /// The same submission element is already being processed
    SubmissionInProgress,
    /// The binding selected nothing usable, or pruning removed everything
    NoData,
    /// A submitted node is invalid or a required node is empty
    ValidationError,
    /// The response body is not well-formed XML
    ParseError,
    /// No resource URI, no transport, or the transport failed
    ResourceError,
    /// The replacement target is missing or belongs to another model
    TargetError,
    /// Any other failure, including a missing method
    Unspecified,
}

impl SubmitErrorKind {
    /// Error-type string carried by `xforms-submit-error`
    pub fn as_str(self) -> &'static str {
        match self {
            SubmitErrorKind::SubmissionInProgress => "submission-in-progress",
            SubmitErrorKind::NoData => "no-data",
            SubmitErrorKind::ValidationError => "validation-error",
            SubmitErrorKind::ParseError => "parse-error",
            SubmitErrorKind::ResourceError => "resource-error",
            SubmitErrorKind::TargetError => "target-error",
            SubmitErrorKind::Unspecified => "unspecified",
        }
    }
}

impl std::fmt::Display for SubmitErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed submission
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("submission failed ({kind}): {message}")]
pub struct SubmitError {
    pub kind: SubmitErrorKind,
    pub message: String,
}

impl SubmitError {
    pub fn new(kind: SubmitErrorKind, message: impl Into<String>) -> Self {
        SubmitError {
            kind,
            message: message.into(),
        }
    }
}

/// Error returned from host-facing engine calls
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error(transparent)]
    Dom(#[from] DomError),

    #[error(transparent)]
    XPath(#[from] XPathError),

    #[error(transparent)]
    Fatal(#[from] FatalError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// The document is in the failed state
    #[error("document has failed and must be reloaded")]
    Failed,

    /// No element with the given id, or the node is not a registered element
    #[error("unknown element '{0}'")]
    UnknownElement(String),

    /// Persisted state is inconsistent or cannot be encoded
    #[error("invalid engine state: {0}")]
    State(String),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_error_display() {
        let err = SubmitError::new(SubmitErrorKind::ValidationError, "node 'a' is required");
        assert_eq!(err.to_string(), "submission failed (validation-error): node 'a' is required");
    }

    #[test]
    fn test_engine_error_wraps_layers() {
        let err: EngineError = FatalError::NonConvergent {
            phase: "recalculate".to_string(),
            iterations: 128,
        }
        .into();
        assert_eq!(err.to_string(), "recalculate did not converge after 128 iterations");
    }
}
