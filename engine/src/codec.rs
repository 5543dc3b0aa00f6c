//! Dialect-specific encoding of values into SQL literals.
//!
//! Each backend gets a [`ValueCodec`] that turns [`Value`]s into literal SQL
//! text, converts raw result values back into the column's declared type and
//! names the column types used in DDL.

use crate::{ColumnType, Result, Value};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// Encoding and decoding rules of one SQL dialect.
pub trait ValueCodec: Send + Sync {
    /// Dialect name, used in logs.
    fn name(&self) -> &'static str;

    /// Encode a value as an SQL literal.
    fn encode(&self, value: &Value) -> String;

    /// Convert a raw result value into the column's declared type.
    fn decode(&self, value: Value, target: ColumnType) -> Result<Value> {
        coerce(value, target)
    }

    /// SQL type used for a column in `CREATE TABLE`.
    fn column_sql(&self, column_type: ColumnType) -> &'static str;

    /// Column definition suffix for the auto-assigned primary key.
    fn primary_key_sql(&self) -> &'static str;
}

/// Codec for the embedded SQLite store.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteCodec;

impl ValueCodec for SqliteCodec {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn encode(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(v) => if *v { "1" } else { "0" }.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Real(v) => encode_real(*v),
            Value::Text(v) => quote(v),
            Value::Timestamp(v) => quote(&v.format(TIMESTAMP_FORMAT).to_string()),
            Value::Date(v) => quote(&v.format(DATE_FORMAT).to_string()),
            Value::Time(v) => quote(&v.format(TIME_FORMAT).to_string()),
            Value::Json(v) => quote(&v.to_string()),
        }
    }

    fn column_sql(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Int => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Bool => "BOOLEAN",
            ColumnType::Text
            | ColumnType::Timestamp
            | ColumnType::Date
            | ColumnType::Time
            | ColumnType::Json => "TEXT",
        }
    }

    fn primary_key_sql(&self) -> &'static str {
        "INTEGER PRIMARY KEY AUTOINCREMENT"
    }
}

/// Codec for the remote PostgreSQL store.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresCodec;

impl ValueCodec for PostgresCodec {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn encode(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(v) => if *v { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Real(v) => encode_real(*v),
            Value::Text(v) => quote(v),
            Value::Timestamp(v) => {
                format!("TIMESTAMP {}", quote(&v.format(TIMESTAMP_FORMAT).to_string()))
            }
            Value::Date(v) => format!("DATE {}", quote(&v.format(DATE_FORMAT).to_string())),
            Value::Time(v) => format!("TIME {}", quote(&v.format(TIME_FORMAT).to_string())),
            Value::Json(v) => format!("{}::jsonb", quote(&v.to_string())),
        }
    }

    fn column_sql(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Int => "BIGINT",
            ColumnType::Real => "DOUBLE PRECISION",
            ColumnType::Text => "TEXT",
            ColumnType::Bool => "BOOLEAN",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Date => "DATE",
            ColumnType::Time => "TIME",
            ColumnType::Json => "JSONB",
        }
    }

    fn primary_key_sql(&self) -> &'static str {
        "SERIAL PRIMARY KEY"
    }
}

/// Quote a string literal, doubling embedded single quotes.
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        if ch == '\'' {
            out.push('\'');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

// NaN and infinities have no portable literal.
fn encode_real(v: f64) -> String {
    if v.is_finite() {
        format!("{v:?}")
    } else {
        "NULL".to_string()
    }
}

/// Convert a raw value into the target column type.
///
/// Text is accepted for every type since SQLite stores temporals and JSON as
/// text and booleans as integers.
pub fn coerce(value: Value, target: ColumnType) -> Result<Value> {
    let expected = target.to_string();
    match (target, value) {
        (_, Value::Null) => Ok(Value::Null),

        (ColumnType::Int, Value::Int(v)) => Ok(Value::Int(v)),
        (ColumnType::Int, Value::Bool(v)) => Ok(Value::Int(i64::from(v))),
        (ColumnType::Int, Value::Real(v)) if v.fract() == 0.0 => Ok(Value::Int(v as i64)),
        (ColumnType::Int, Value::Text(s)) => s
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|_| Value::Text(s).mismatch(&expected)),

        (ColumnType::Real, Value::Real(v)) => Ok(Value::Real(v)),
        (ColumnType::Real, Value::Int(v)) => Ok(Value::Real(v as f64)),
        (ColumnType::Real, Value::Text(s)) => s
            .trim()
            .parse()
            .map(Value::Real)
            .map_err(|_| Value::Text(s).mismatch(&expected)),

        (ColumnType::Bool, Value::Bool(v)) => Ok(Value::Bool(v)),
        (ColumnType::Bool, Value::Int(v)) => Ok(Value::Bool(v != 0)),
        (ColumnType::Bool, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "t" | "true" => Ok(Value::Bool(true)),
            "0" | "f" | "false" => Ok(Value::Bool(false)),
            _ => Err(Value::Text(s).mismatch(&expected)),
        },

        (ColumnType::Text, Value::Text(s)) => Ok(Value::Text(s)),
        (ColumnType::Text, Value::Int(v)) => Ok(Value::Text(v.to_string())),
        (ColumnType::Text, Value::Real(v)) => Ok(Value::Text(v.to_string())),

        (ColumnType::Timestamp, Value::Timestamp(v)) => Ok(Value::Timestamp(v)),
        (ColumnType::Timestamp, Value::Text(s)) => parse_timestamp(&s)
            .map(Value::Timestamp)
            .ok_or_else(|| Value::Text(s).mismatch(&expected)),

        (ColumnType::Date, Value::Date(v)) => Ok(Value::Date(v)),
        (ColumnType::Date, Value::Timestamp(v)) => Ok(Value::Date(v.date())),
        (ColumnType::Date, Value::Text(s)) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
            .map(Value::Date)
            .map_err(|_| Value::Text(s).mismatch(&expected)),

        (ColumnType::Time, Value::Time(v)) => Ok(Value::Time(v)),
        (ColumnType::Time, Value::Text(s)) => NaiveTime::parse_from_str(s.trim(), TIME_FORMAT)
            .map(Value::Time)
            .map_err(|_| Value::Text(s).mismatch(&expected)),

        (ColumnType::Json, Value::Json(v)) => Ok(Value::Json(v)),
        (ColumnType::Json, Value::Text(s)) => serde_json::from_str(&s)
            .map(Value::Json)
            .map_err(|_| Value::Text(s).mismatch(&expected)),

        (_, other) => Err(other.mismatch(&expected)),
    }
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}
