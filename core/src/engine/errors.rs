//! Evaluator error types

use thiserror::Error;

use super::parser::ParseError;

/// Errors raised while parsing or evaluating a script
///
/// Names mirror the ECMAScript error constructors so messages read the way
/// workflow authors expect.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("SyntaxError: {0}")]
    Syntax(String),

    #[error("ReferenceError: {0} is not defined")]
    Reference(String),

    #[error("TypeError: {0}")]
    Type(String),

    #[error("RangeError: {0}")]
    Range(String),

    /// Raised by a native function
    #[error("Error: {0}")]
    Thrown(String),

    /// Abort the current workflow step but let the run continue
    #[error("step aborted: {0}")]
    StepAborted(String),
}

impl EvalError {
    pub fn type_error(msg: impl Into<String>) -> Self {
        EvalError::Type(msg.into())
    }

    pub fn thrown(msg: impl Into<String>) -> Self {
        EvalError::Thrown(msg.into())
    }
}

impl From<ParseError> for EvalError {
    fn from(err: ParseError) -> Self {
        EvalError::Syntax(err.to_string())
    }
}

pub type EvalResult<T> = Result<T, EvalError>;
