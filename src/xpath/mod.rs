//! XPath 1.0 Engine
//!
//! Full XPath 1.0 implementation with:
//! - All 13 axes over the arena DOM, attributes included
//! - The core function library plus an injectable [`FunctionResolver`]
//! - Compiled expression caching

pub mod axes;
pub mod cache;
pub mod compiler;
pub mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod value;

use thiserror::Error;

pub use cache::ExpressionCache;
pub use compiler::{compile, CompiledExpr};
pub use eval::{evaluate, evaluate_compiled, EvalContext, FunctionResolver, NoFunctions};
pub use value::XPathValue;

/// Errors raised while compiling or evaluating an expression
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum XPathError {
    /// The expression text does not match the XPath grammar
    #[error("XPath syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },

    /// No library knows the function
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// Wrong number of arguments
    #[error("{function}() expects {expected} argument(s), got {found}")]
    Arity {
        function: String,
        expected: String,
        found: usize,
    },

    /// An operand had the wrong type (for example a number where a node-set is required)
    #[error("XPath type error: {0}")]
    Type(String),
}

/// Result type for XPath operations
pub type Result<T> = std::result::Result<T, XPathError>;
