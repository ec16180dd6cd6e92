//! Error types for arbor-expression
//!
//! Uses thiserror for the error enum; codes follow the `EXPR:*` scheme.

use arbor_schema::SchemaError;
use thiserror::Error;

/// Expression construction, compilation and evaluation errors
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    /// Textual path could not be parsed
    #[error("Path parse error: {message}")]
    ParseError { message: String },

    /// Evaluation error
    #[error("Expression evaluation error: {message}")]
    EvalError { message: String },

    /// Type mismatch error
    #[error("Type error: expected {expected}, found {actual}")]
    TypeError { expected: String, actual: String },

    /// Division by zero
    #[error("Division by zero")]
    DivisionByZero,

    /// Assignment target is not a writable accessor chain
    #[error("Invalid assignment target: {message}")]
    InvalidTarget { message: String },

    /// A loop variable was referenced outside its loop
    #[error("Loop #{id} is not bound at this point")]
    UnboundLoop { id: String },

    /// A lambda parameter was referenced outside its lambda
    #[error("Parameter p{id} is not bound at this point")]
    UnboundParameter { id: String },

    /// Procedure reads a root no input was supplied for
    #[error("No input of type '{type_name}' was supplied")]
    MissingInput { type_name: String },

    /// Canonical slot without a closure value
    #[error("Closure slot {index} is not populated")]
    UnresolvedSlot { index: usize },

    /// Recursion limit reached while evaluating
    #[error("Maximum recursion depth ({limit}) exceeded")]
    RecursionLimit { limit: usize },

    /// Schema lookup failed
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl ExpressionError {
    /// Get error code for categorization
    pub fn code(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "EXPR:PARSE",
            Self::EvalError { .. } => "EXPR:EVAL",
            Self::TypeError { .. } => "EXPR:TYPE",
            Self::DivisionByZero => "EXPR:DIV_ZERO",
            Self::InvalidTarget { .. } => "EXPR:INVALID_TARGET",
            Self::UnboundLoop { .. } => "EXPR:UNBOUND_LOOP",
            Self::UnboundParameter { .. } => "EXPR:UNBOUND_PARAM",
            Self::MissingInput { .. } => "EXPR:MISSING_INPUT",
            Self::UnresolvedSlot { .. } => "EXPR:UNRESOLVED_SLOT",
            Self::RecursionLimit { .. } => "EXPR:RECURSION_LIMIT",
            Self::Schema(_) => "EXPR:SCHEMA",
        }
    }

    /// Create a parse error
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
        }
    }

    /// Create an evaluation error
    pub fn eval_error(message: impl Into<String>) -> Self {
        Self::EvalError {
            message: message.into(),
        }
    }

    /// Create a type error
    pub fn type_error(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeError {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an invalid target error
    pub fn invalid_target(message: impl Into<String>) -> Self {
        Self::InvalidTarget {
            message: message.into(),
        }
    }

    /// Create a missing input error
    pub fn missing_input(type_name: impl Into<String>) -> Self {
        Self::MissingInput {
            type_name: type_name.into(),
        }
    }
}

/// Result type for expression operations
pub type ExpressionResult<T> = Result<T, ExpressionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ExpressionError::parse_error("x").code(), "EXPR:PARSE");
        assert_eq!(ExpressionError::DivisionByZero.code(), "EXPR:DIV_ZERO");
        assert_eq!(
            ExpressionError::missing_input("Order").code(),
            "EXPR:MISSING_INPUT"
        );
    }

    #[test]
    fn test_display() {
        let err = ExpressionError::type_error("number", "string");
        assert_eq!(err.to_string(), "Type error: expected number, found string");
    }

    #[test]
    fn test_schema_errors_convert() {
        let err: ExpressionError = SchemaError::not_an_array("Order").into();
        assert_eq!(err.code(), "EXPR:SCHEMA");
        assert_eq!(err.to_string(), "type 'Order' is not an array type");
    }
}
