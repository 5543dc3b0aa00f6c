//! SQL text builders.
//!
//! Every statement the engine issues is assembled here from a
//! [`TableSchema`] and the target's [`ValueCodec`]. Identifiers come from a
//! validated schema and are emitted unquoted; values always go through the
//! codec.

use crate::{TableSchema, Value, ValueCodec};

/// Table holding per-table synchronization bookkeeping in the local store.
pub const SYNC_STATE_TABLE: &str = "_replist_sync_state";

/// Primary-key rewrites made during promotion, in the order they happened.
pub const REMAP_LOG_TABLE: &str = "_replist_id_remaps";

/// How far each table has replayed the remap log.
pub const REMAP_CURSOR_TABLE: &str = "_replist_remap_cursors";

/// Rows per multi-row upsert statement.
pub const UPSERT_CHUNK: usize = 200;

/// Idempotent `CREATE TABLE` for an entity table.
pub fn create_table<T>(schema: &TableSchema<T>, codec: &dyn ValueCodec) -> String {
    if let Some(custom) = schema.create_sql() {
        return custom.to_string();
    }

    let mut columns = vec![format!(
        "{} {}",
        schema.primary_key(),
        codec.primary_key_sql()
    )];
    for column in schema.columns() {
        let mut def = format!("{} {}", column.name(), codec.column_sql(column.column_type()));
        if column.is_not_null() {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = column.default_sql() {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        columns.push(def);
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        schema.table_name(),
        columns.join(", ")
    )
}

pub fn create_sync_state_table(codec: &dyn ValueCodec) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {SYNC_STATE_TABLE} (\
         table_name TEXT PRIMARY KEY, \
         pending_inserts TEXT NOT NULL, \
         pending_deletes TEXT NOT NULL, \
         pending_edits TEXT NOT NULL, \
         stale {} NOT NULL DEFAULT {})",
        codec.column_sql(crate::ColumnType::Bool),
        codec.encode(&Value::Bool(false)),
    )
}

/// The statement loading a whole table, custom or `ORDER BY` primary key.
pub fn select_all<T>(schema: &TableSchema<T>) -> String {
    match schema.select_sql() {
        Some(custom) => custom.to_string(),
        None => format!(
            "SELECT * FROM {} ORDER BY {}",
            schema.table_name(),
            schema.primary_key()
        ),
    }
}

pub fn select_by_id<T>(schema: &TableSchema<T>, id: i32) -> String {
    format!(
        "SELECT * FROM {} WHERE {} = {id}",
        schema.table_name(),
        schema.primary_key()
    )
}

/// Insert one record and return the key assigned by the store.
pub fn insert_returning<T>(
    schema: &TableSchema<T>,
    codec: &dyn ValueCodec,
    fields: &[(String, Value)],
) -> String {
    if fields.is_empty() {
        return format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
            schema.table_name(),
            schema.primary_key()
        );
    }

    let names: Vec<&str> = fields.iter().map(|(name, _)| name.as_str()).collect();
    let values: Vec<String> = fields.iter().map(|(_, value)| codec.encode(value)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        schema.table_name(),
        names.join(", "),
        values.join(", "),
        schema.primary_key()
    )
}

/// Insert or overwrite one record with an explicit key.
pub fn upsert<T>(
    schema: &TableSchema<T>,
    codec: &dyn ValueCodec,
    id: i32,
    fields: &[(String, Value)],
) -> String {
    let rows = [(id, fields.to_vec())];
    upsert_many(schema, codec, &rows)
        .into_iter()
        .next()
        .unwrap_or_default()
}

/// Multi-row upsert, split into statements of at most [`UPSERT_CHUNK`] rows.
///
/// All rows must carry the same field names in the same order, which
/// [`TableSchema::fields_of`] guarantees.
pub fn upsert_many<T>(
    schema: &TableSchema<T>,
    codec: &dyn ValueCodec,
    rows: &[(i32, Vec<(String, Value)>)],
) -> Vec<String> {
    let Some((_, first)) = rows.first() else {
        return Vec::new();
    };

    let key = schema.primary_key();
    let mut names = vec![key];
    names.extend(first.iter().map(|(name, _)| name.as_str()));

    let on_conflict = if first.is_empty() {
        format!("ON CONFLICT ({key}) DO NOTHING")
    } else {
        let assignments: Vec<String> = first
            .iter()
            .map(|(name, _)| format!("{name} = EXCLUDED.{name}"))
            .collect();
        format!("ON CONFLICT ({key}) DO UPDATE SET {}", assignments.join(", "))
    };

    rows.chunks(UPSERT_CHUNK)
        .map(|chunk| {
            let tuples: Vec<String> = chunk
                .iter()
                .map(|(id, fields)| {
                    let mut values = vec![id.to_string()];
                    values.extend(fields.iter().map(|(_, value)| codec.encode(value)));
                    format!("({})", values.join(", "))
                })
                .collect();
            format!(
                "INSERT INTO {} ({}) VALUES {} {on_conflict}",
                schema.table_name(),
                names.join(", "),
                tuples.join(", ")
            )
        })
        .collect()
}

/// Set one column on every row of `ids`.
pub fn update_column<T>(
    schema: &TableSchema<T>,
    codec: &dyn ValueCodec,
    ids: &[i32],
    column: &str,
    value: &Value,
) -> String {
    format!(
        "UPDATE {} SET {column} = {} WHERE {} IN ({})",
        schema.table_name(),
        codec.encode(value),
        schema.primary_key(),
        id_list(ids)
    )
}

pub fn delete_ids<T>(schema: &TableSchema<T>, ids: &[i32]) -> String {
    format!(
        "DELETE FROM {} WHERE {} IN ({})",
        schema.table_name(),
        schema.primary_key(),
        id_list(ids)
    )
}

pub fn delete_all<T>(schema: &TableSchema<T>) -> String {
    format!("DELETE FROM {}", schema.table_name())
}

/// Move a row to a new primary key.
pub fn rewrite_id<T>(schema: &TableSchema<T>, old: i32, new: i32) -> String {
    format!(
        "UPDATE {} SET {key} = {new} WHERE {key} = {old}",
        schema.table_name(),
        key = schema.primary_key()
    )
}

pub fn max_id<T>(schema: &TableSchema<T>) -> String {
    format!(
        "SELECT MAX({}) AS max_id FROM {}",
        schema.primary_key(),
        schema.table_name()
    )
}

pub fn select_sync_state(codec: &dyn ValueCodec, table: &str) -> String {
    format!(
        "SELECT pending_inserts, pending_deletes, pending_edits, stale \
         FROM {SYNC_STATE_TABLE} WHERE table_name = {}",
        codec.encode(&Value::from(table))
    )
}

pub fn upsert_sync_state(
    codec: &dyn ValueCodec,
    table: &str,
    inserts: &str,
    deletes: &str,
    edits: &str,
    stale: bool,
) -> String {
    format!(
        "INSERT INTO {SYNC_STATE_TABLE} \
         (table_name, pending_inserts, pending_deletes, pending_edits, stale) \
         VALUES ({}, {}, {}, {}, {}) \
         ON CONFLICT (table_name) DO UPDATE SET \
         pending_inserts = EXCLUDED.pending_inserts, \
         pending_deletes = EXCLUDED.pending_deletes, \
         pending_edits = EXCLUDED.pending_edits, \
         stale = EXCLUDED.stale",
        codec.encode(&Value::from(table)),
        codec.encode(&Value::from(inserts)),
        codec.encode(&Value::from(deletes)),
        codec.encode(&Value::from(edits)),
        codec.encode(&Value::Bool(stale)),
    )
}

pub fn create_remap_log_table(codec: &dyn ValueCodec) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {REMAP_LOG_TABLE} (\
         seq {}, \
         table_name TEXT NOT NULL, \
         column_name TEXT NOT NULL, \
         old_id {int} NOT NULL, \
         new_id {int} NOT NULL)",
        codec.primary_key_sql(),
        int = codec.column_sql(crate::ColumnType::Int),
    )
}

pub fn create_remap_cursor_table(codec: &dyn ValueCodec) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {REMAP_CURSOR_TABLE} (\
         table_name TEXT PRIMARY KEY, \
         last_seq {} NOT NULL)",
        codec.column_sql(crate::ColumnType::Int),
    )
}

pub fn insert_remap(
    codec: &dyn ValueCodec,
    table: &str,
    column: &str,
    old: i32,
    new: i32,
) -> String {
    format!(
        "INSERT INTO {REMAP_LOG_TABLE} (table_name, column_name, old_id, new_id) \
         VALUES ({}, {}, {old}, {new})",
        codec.encode(&Value::from(table)),
        codec.encode(&Value::from(column)),
    )
}

pub fn select_remaps_since(seq: i64) -> String {
    format!(
        "SELECT seq, table_name, column_name, old_id, new_id \
         FROM {REMAP_LOG_TABLE} WHERE seq > {seq} ORDER BY seq"
    )
}

pub fn max_remap_seq() -> String {
    format!("SELECT MAX(seq) AS max_seq FROM {REMAP_LOG_TABLE}")
}

pub fn select_remap_cursor(codec: &dyn ValueCodec, table: &str) -> String {
    format!(
        "SELECT last_seq FROM {REMAP_CURSOR_TABLE} WHERE table_name = {}",
        codec.encode(&Value::from(table))
    )
}

pub fn upsert_remap_cursor(codec: &dyn ValueCodec, table: &str, seq: i64) -> String {
    format!(
        "INSERT INTO {REMAP_CURSOR_TABLE} (table_name, last_seq) VALUES ({}, {seq}) \
         ON CONFLICT (table_name) DO UPDATE SET last_seq = EXCLUDED.last_seq",
        codec.encode(&Value::from(table))
    )
}

/// Drop log entries every table has replayed.
pub fn prune_remaps() -> String {
    format!(
        "DELETE FROM {REMAP_LOG_TABLE} \
         WHERE seq <= (SELECT MIN(last_seq) FROM {REMAP_CURSOR_TABLE})"
    )
}

fn id_list(ids: &[i32]) -> String {
    ids.iter()
        .map(i32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
