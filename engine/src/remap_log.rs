//! Durable log of primary-key rewrites.
//!
//! Promotion rewrites local ids of one table; rows of other tables that
//! mirror that key must follow, even when their list is not open at the time.
//! Every rewrite is appended to a log in the local store and each table keeps
//! a cursor of how far it has replayed it. A table seen for the first time
//! starts at the end of the log: earlier rewrites predate its rows.

use crate::{query, ColumnType, Error, Result, SqlExecutor, Value};

/// One logged rewrite of `table.column` from `old` to `new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedRemap {
    pub seq: i64,
    pub table: String,
    pub column: String,
    pub old: i32,
    pub new: i32,
}

/// Create the log tables and start a cursor for `table` if it has none.
pub fn open(executor: &dyn SqlExecutor, table: &str) -> Result<()> {
    let codec = executor.codec();
    executor.execute(&query::create_remap_log_table(codec))?;
    executor.execute(&query::create_remap_cursor_table(codec))?;

    if cursor(executor, table)?.is_none() {
        let rows = executor.query(&query::max_remap_seq())?;
        let latest = match rows.first().and_then(|row| row.get("max_seq")) {
            Some(raw) => int(executor, raw.clone())?.unwrap_or(0),
            None => 0,
        };
        executor.execute(&query::upsert_remap_cursor(codec, table, latest))?;
    }
    Ok(())
}

pub fn record(
    executor: &dyn SqlExecutor,
    table: &str,
    column: &str,
    old: i32,
    new: i32,
) -> Result<()> {
    executor.execute_update(&query::insert_remap(executor.codec(), table, column, old, new))?;
    Ok(())
}

pub fn cursor(executor: &dyn SqlExecutor, table: &str) -> Result<Option<i64>> {
    let rows = executor.query(&query::select_remap_cursor(executor.codec(), table))?;
    match rows.first().and_then(|row| row.get("last_seq")) {
        Some(raw) => int(executor, raw.clone()),
        None => Ok(None),
    }
}

/// Entries `table` has not replayed yet, oldest first.
pub fn pending(executor: &dyn SqlExecutor, table: &str) -> Result<Vec<LoggedRemap>> {
    let since = cursor(executor, table)?.unwrap_or(0);
    let rows = executor.query(&query::select_remaps_since(since))?;
    rows.iter()
        .map(|row| {
            let field = |name: &str| -> Result<Value> {
                row.get(name).cloned().ok_or_else(|| {
                    Error::invariant(format!("remap log row without '{name}'"))
                })
            };
            let id = |name: &str| -> Result<i32> {
                let raw = field(name)?;
                executor
                    .codec()
                    .decode(raw, ColumnType::Int)
                    .and_then(Value::decode)
            };
            Ok(LoggedRemap {
                seq: int(executor, field("seq")?)?.unwrap_or(0),
                table: field("table_name")?.decode()?,
                column: field("column_name")?.decode()?,
                old: id("old_id")?,
                new: id("new_id")?,
            })
        })
        .collect()
}

/// Mark everything up to `seq` as replayed by `table`.
pub fn advance(executor: &dyn SqlExecutor, table: &str, seq: i64) -> Result<()> {
    executor.execute(&query::upsert_remap_cursor(executor.codec(), table, seq))?;
    executor.execute_update(&query::prune_remaps())?;
    Ok(())
}

fn int(executor: &dyn SqlExecutor, raw: Value) -> Result<Option<i64>> {
    executor
        .codec()
        .decode(raw, ColumnType::Int)
        .and_then(Value::decode)
}
