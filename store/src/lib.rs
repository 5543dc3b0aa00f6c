//! Replist Store - SQLite and PostgreSQL executors for the replist engine.
//!
//! [`SqliteStore`] is the local mirror and write buffer; [`PostgresStore`] is
//! the system of record. Both implement [`replist_engine::SqlExecutor`] by
//! blocking on a private tokio runtime, so the engine stays synchronous.

pub mod config;
pub mod db;
pub mod error;
pub mod telemetry;

pub use config::{ConfigError, StoreConfig};
pub use db::{PostgresStore, SqliteStore};
pub use error::{Result, StoreError};
