//! Error types for the replist engine.

use thiserror::Error;

/// All possible errors from the replist engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Store errors
    #[error("storage error during {operation}: {cause} (query: {query})")]
    Storage {
        operation: String,
        query: String,
        cause: String,
    },

    // Programming errors
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    // Resolver errors
    #[error("conflict resolver returned {got} decisions for {expected} conflicts")]
    ConflictResolution { expected: usize, got: usize },

    // Decode errors
    #[error("type mismatch for column '{column}': expected {expected}, got {got}")]
    TypeMismatch {
        column: String,
        expected: String,
        got: String,
    },
}

impl Error {
    /// Build a storage error from any displayable cause.
    pub fn storage(
        operation: impl Into<String>,
        query: impl Into<String>,
        cause: impl std::fmt::Display,
    ) -> Self {
        Error::Storage {
            operation: operation.into(),
            query: query.into(),
            cause: cause.to_string(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Error::InvariantViolation(message.into())
    }

    /// Whether this error came from a store rather than from the engine itself.
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage { .. })
    }

    /// Attach a column name to a conversion error raised without one.
    pub(crate) fn in_column(self, name: &str) -> Self {
        match self {
            Error::TypeMismatch {
                column,
                expected,
                got,
            } if column.is_empty() => Error::TypeMismatch {
                column: name.to_string(),
                expected,
                got,
            },
            other => other,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::storage("sqlite query", "SELECT 1", "disk I/O error");
        assert_eq!(
            err.to_string(),
            "storage error during sqlite query: disk I/O error (query: SELECT 1)"
        );

        let err = Error::ConflictResolution {
            expected: 3,
            got: 2,
        };
        assert_eq!(
            err.to_string(),
            "conflict resolver returned 2 decisions for 3 conflicts"
        );

        let err = Error::invariant("record has no primary key");
        assert_eq!(
            err.to_string(),
            "invariant violation: record has no primary key"
        );
    }

    #[test]
    fn in_column_fills_only_missing_names() {
        let err = Error::TypeMismatch {
            column: String::new(),
            expected: "Int".into(),
            got: "Text".into(),
        };
        assert_eq!(
            err.in_column("age"),
            Error::TypeMismatch {
                column: "age".into(),
                expected: "Int".into(),
                got: "Text".into(),
            }
        );

        let named = Error::TypeMismatch {
            column: "name".into(),
            expected: "Text".into(),
            got: "Int".into(),
        };
        assert_eq!(named.clone().in_column("other"), named);
        assert!(!named.is_storage());
    }
}
