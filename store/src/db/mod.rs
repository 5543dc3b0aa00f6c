//! sqlx-backed statement executors.
//!
//! The engine is synchronous; each store drives its pool on a private
//! current-thread tokio runtime and blocks on every statement.

mod postgres;
mod runtime;
mod sqlite;

pub use postgres::*;
pub use sqlite::*;
