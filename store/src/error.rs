//! Unified error handling for the stores.

use crate::config::ConfigError;

/// Store error type.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] replist_engine::Error),

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Result type alias for store setup.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Map a failed statement into the engine's storage error.
pub(crate) fn statement_error(
    operation: &'static str,
    sql: &str,
    err: sqlx::Error,
) -> replist_engine::Error {
    tracing::warn!(operation, error = %err, "Statement failed");
    replist_engine::Error::storage(operation, sql, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_errors_keep_the_query() {
        let err = statement_error("sqlite query", "SELECT nope", sqlx::Error::RowNotFound);
        match err {
            replist_engine::Error::Storage {
                operation, query, ..
            } => {
                assert_eq!(operation, "sqlite query");
                assert_eq!(query, "SELECT nope");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn engine_errors_convert() {
        let err: StoreError = replist_engine::Error::invariant("x").into();
        assert!(matches!(err, StoreError::Engine(_)));
        assert_eq!(err.to_string(), "Engine error: invariant violation: x");
    }
}
