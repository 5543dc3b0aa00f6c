//! The remote PostgreSQL store.

use super::runtime::Blocking;
use crate::config::{ConfigError, StoreConfig};
use crate::error::{statement_error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use replist_engine::{PostgresCodec, Row, SqlExecutor, Value, ValueCodec};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row as _, TypeInfo};

/// System of record backed by a PostgreSQL pool.
///
/// Connections are established lazily. An unreachable server yields an
/// unavailable store, so the engine keeps working offline.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    blocking: Blocking,
}

impl PostgresStore {
    /// Connect to `DATABASE_URL` from `config` and probe it once.
    pub fn connect(config: &StoreConfig) -> Result<Self> {
        let url = config
            .remote_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl)?;

        let blocking = Blocking::new()?;
        let pool = {
            let _guard = blocking.enter();
            PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(config.connect_timeout)
                .connect_lazy(url)?
        };

        let store = Self { pool, blocking };
        store.probe();
        Ok(store)
    }

    /// Check the server with `SELECT 1` and record the outcome.
    pub fn probe(&self) -> bool {
        let reachable = match self
            .blocking
            .block_on(sqlx::query("SELECT 1").execute(&self.pool))
        {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "PostgreSQL store unreachable");
                false
            }
        };
        self.blocking.set_available(reachable);
        reachable
    }

    /// Mark the store reachable or not; shared with every clone.
    pub fn set_available(&self, available: bool) {
        self.blocking.set_available(available);
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn fetch(&self, operation: &'static str, sql: &str) -> replist_engine::Result<Vec<PgRow>> {
        tracing::trace!(sql, "postgres");
        self.blocking
            .block_on(sqlx::query(sql).persistent(false).fetch_all(&self.pool))
            .map_err(|e| statement_error(operation, sql, e))
    }
}

impl SqlExecutor for PostgresStore {
    fn codec(&self) -> &dyn ValueCodec {
        &PostgresCodec
    }

    fn is_available(&self) -> bool {
        self.blocking.is_available()
    }

    fn execute(&self, sql: &str) -> replist_engine::Result<bool> {
        self.fetch("postgres execute", sql)
            .map(|rows| !rows.is_empty())
    }

    fn query(&self, sql: &str) -> replist_engine::Result<Vec<Row>> {
        self.fetch("postgres query", sql)?
            .iter()
            .map(|row| to_row(row).map_err(|e| statement_error("postgres decode", sql, e)))
            .collect()
    }

    fn execute_update(&self, sql: &str) -> replist_engine::Result<Option<u64>> {
        tracing::trace!(sql, "postgres");
        self.blocking
            .block_on(sqlx::query(sql).persistent(false).execute(&self.pool))
            .map(|done| Some(done.rows_affected()))
            .map_err(|e| statement_error("postgres update", sql, e))
    }
}

fn to_row(row: &PgRow) -> std::result::Result<Row, sqlx::Error> {
    row.columns()
        .iter()
        .map(|column| {
            let value = decode_value(row, column.ordinal(), column.type_info().name())?;
            Ok((column.name().to_string(), value))
        })
        .collect()
}

fn decode_value(
    row: &PgRow,
    index: usize,
    type_name: &str,
) -> std::result::Result<Value, sqlx::Error> {
    let value = match type_name {
        "INT2" => row
            .try_get::<Option<i16>, _>(index)?
            .map(|v| Value::Int(v.into())),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)?
            .map(|v| Value::Int(v.into())),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| Value::Real(v.into())),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Value::Real),
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(index)?.map(Value::Text)
        }
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(Value::Timestamp),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(|v| Value::Timestamp(v.naive_utc())),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(index)?.map(Value::Date),
        "TIME" => row.try_get::<Option<NaiveTime>, _>(index)?.map(Value::Time),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(index)?
            .map(Value::Json),
        other => {
            return Err(sqlx::Error::ColumnDecode {
                index: index.to_string(),
                source: format!("unsupported column type {other}").into(),
            })
        }
    };
    Ok(value.unwrap_or(Value::Null))
}
