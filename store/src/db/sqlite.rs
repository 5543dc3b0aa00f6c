//! The local SQLite store.

use super::runtime::Blocking;
use crate::error::{statement_error, Result};
use replist_engine::{Row, SqlExecutor, SqliteCodec, Value, ValueCodec};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _};
use std::str::FromStr;

/// Local mirror backed by an SQLite database.
///
/// Clones share the pool, the runtime and the availability flag.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    blocking: Blocking,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url`.
    pub fn open(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        Self::connect(options, SqlitePoolOptions::new().max_connections(1))
    }

    /// A private in-memory database.
    ///
    /// The pool keeps exactly one connection alive forever, since the
    /// database disappears with its last connection.
    pub fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
        Self::connect(options, pool)
    }

    fn connect(options: SqliteConnectOptions, pool: SqlitePoolOptions) -> Result<Self> {
        let blocking = Blocking::new()?;
        let pool = blocking.block_on(pool.connect_with(options))?;
        tracing::debug!("Opened SQLite store");
        Ok(Self { pool, blocking })
    }

    /// Mark the store reachable or not; shared with every clone.
    pub fn set_available(&self, available: bool) {
        self.blocking.set_available(available);
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn fetch(&self, operation: &'static str, sql: &str) -> replist_engine::Result<Vec<SqliteRow>> {
        tracing::trace!(sql, "sqlite");
        self.blocking
            .block_on(sqlx::query(sql).persistent(false).fetch_all(&self.pool))
            .map_err(|e| statement_error(operation, sql, e))
    }
}

impl SqlExecutor for SqliteStore {
    fn codec(&self) -> &dyn ValueCodec {
        &SqliteCodec
    }

    fn is_available(&self) -> bool {
        self.blocking.is_available()
    }

    fn execute(&self, sql: &str) -> replist_engine::Result<bool> {
        self.fetch("sqlite execute", sql).map(|rows| !rows.is_empty())
    }

    fn query(&self, sql: &str) -> replist_engine::Result<Vec<Row>> {
        self.fetch("sqlite query", sql)?
            .iter()
            .map(|row| to_row(row).map_err(|e| statement_error("sqlite decode", sql, e)))
            .collect()
    }

    fn execute_update(&self, sql: &str) -> replist_engine::Result<Option<u64>> {
        tracing::trace!(sql, "sqlite");
        self.blocking
            .block_on(sqlx::query(sql).persistent(false).execute(&self.pool))
            .map(|done| Some(done.rows_affected()))
            .map_err(|e| statement_error("sqlite update", sql, e))
    }
}

fn to_row(row: &SqliteRow) -> std::result::Result<Row, sqlx::Error> {
    row.columns()
        .iter()
        .map(|column| {
            let value = decode_value(row, column.ordinal())?;
            Ok((column.name().to_string(), value))
        })
        .collect()
}

/// SQLite values are dynamically typed: try each storage class in turn.
fn decode_value(row: &SqliteRow, index: usize) -> std::result::Result<Value, sqlx::Error> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return Ok(v.map_or(Value::Null, Value::Int));
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return Ok(Value::Real(v));
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Ok(Value::Text(v));
    }
    let bytes: Vec<u8> = row.try_get(index)?;
    Ok(Value::Text(String::from_utf8_lossy(&bytes).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_clones_share_one_database() {
        let store = SqliteStore::in_memory().unwrap();
        let clone = store.clone();

        store
            .execute("CREATE TABLE t (_id INTEGER PRIMARY KEY, v TEXT)")
            .unwrap();
        clone
            .execute_update("INSERT INTO t (_id, v) VALUES (1, 'a')")
            .unwrap();

        let rows = store.query("SELECT * FROM t").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("v"), Some(&Value::Text("a".into())));
    }

    #[test]
    fn decodes_each_storage_class() {
        let store = SqliteStore::in_memory().unwrap();
        let rows = store
            .query("SELECT 7 AS i, 2.5 AS r, 'x' AS t, NULL AS n")
            .unwrap();
        let row = &rows[0];
        assert_eq!(row.get("i"), Some(&Value::Int(7)));
        assert_eq!(row.get("r"), Some(&Value::Real(2.5)));
        assert_eq!(row.get("t"), Some(&Value::Text("x".into())));
        assert_eq!(row.get("n"), Some(&Value::Null));
    }

    #[test]
    fn availability_is_shared() {
        let store = SqliteStore::in_memory().unwrap();
        let clone = store.clone();
        assert!(clone.is_available());
        store.set_available(false);
        assert!(!clone.is_available());
    }

    #[test]
    fn failures_become_storage_errors() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store.query("SELECT * FROM missing").unwrap_err();
        assert!(err.is_storage());
        assert!(err.to_string().contains("SELECT * FROM missing"));
    }

    #[test]
    fn returning_clause_yields_rows() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .execute("CREATE TABLE t (_id INTEGER PRIMARY KEY AUTOINCREMENT, v TEXT)")
            .unwrap();
        let rows = store
            .query("INSERT INTO t (v) VALUES ('a') RETURNING _id")
            .unwrap();
        assert_eq!(rows[0].get("_id"), Some(&Value::Int(1)));
        assert_eq!(store.execute_update("DELETE FROM t").unwrap(), Some(1));
    }
}
