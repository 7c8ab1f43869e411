//! Error types for polyglot-optimizer

use crate::schema::SchemaError;
use thiserror::Error;

/// The result type for optimizer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reading SQL or optimizing a tree
#[derive(Debug, Error)]
pub enum Error {
    /// Error during tokenization
    #[error("Tokenization error at line {line}, column {column}: {message}")]
    Tokenize {
        message: String,
        line: usize,
        column: usize,
    },

    /// Error during parsing
    #[error("Parse error: {0}")]
    Parse(String),

    /// A table or column the optimizer needs is missing from the schema
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A rewrite precondition does not hold
    #[error("Optimize error: {0}")]
    Optimize(String),
}

impl Error {
    /// Create a tokenization error
    pub fn tokenize(message: impl Into<String>, line: usize, column: usize) -> Self {
        Error::Tokenize {
            message: message.into(),
            line,
            column,
        }
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse(message.into())
    }

    /// Create an optimize error
    pub fn optimize(message: impl Into<String>) -> Self {
        Error::Optimize(message.into())
    }

    /// Whether this error came from the schema collaborator
    pub fn is_schema_error(&self) -> bool {
        matches!(self, Error::Schema(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            Error::optimize("Ambiguous columns: a").to_string(),
            "Optimize error: Ambiguous columns: a"
        );
        assert_eq!(
            Error::tokenize("bad", 2, 3).to_string(),
            "Tokenization error at line 2, column 3: bad"
        );
    }

    #[test]
    fn test_schema_error_converts() {
        let err: Error = SchemaError::TableNotFound("x".to_string()).into();
        assert!(err.is_schema_error());
        assert_eq!(err.to_string(), "Table not found: x");
    }
}
