//! Error types for the dynamic SQL engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DynSqlError {
    /// Malformed template text. Raised at parse time only; a successfully
    /// parsed template can never fail to parse again.
    #[error("parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    /// A referenced rule, macro or include fragment could not be found at
    /// build time.
    #[error("resolution error: {0}")]
    Resolution(String),

    /// The expression evaluator rejected an expression.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// A named type handler or declared value type could not be resolved.
    #[error("type binding error: {0}")]
    TypeBinding(String),
}

impl DynSqlError {
    /// Create a parse error at the given position.
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution(message.into())
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation(message.into())
    }

    pub fn type_binding(message: impl Into<String>) -> Self {
        Self::TypeBinding(message.into())
    }
}

pub type DynSqlResult<T> = Result<T, DynSqlError>;
