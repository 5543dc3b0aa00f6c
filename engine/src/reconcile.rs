//! Replica reconciliation between the local mirror and the remote store.
//!
//! The engine owns both executors, the table schema and the table's
//! [`SyncState`]. Mutations go to the remote when it is reachable and are
//! mirrored locally; otherwise they are applied locally and recorded as
//! pending. [`ReconciliationEngine::reconcile`] later pushes the pending work:
//!
//! 0. Replay primary-key rewrites of mirrored tables into this one
//! 1. Delete pending-delete ids on the remote
//! 2. Promote each pending insert to a canonical remote id, rewriting the
//!    local id (ascending order, state persisted after each row)
//! 3. Pair every pending edit with the current remote row as a [`Conflict`],
//!    dropping edits of rows deleted remotely
//! 4. Clear the pending sets and persist, with the mirror marked stale
//! 5. Ask the resolver for one decision per conflict
//! 6. Upsert the decisions and the promoted rows to the remote
//! 7. Replace the local mirror with the remote contents

use crate::{
    query, remap_log, Column, Conflict, ConflictResolver, Entity, Error, LocalWins, Result,
    SqlExecutor, SyncState, TableSchema, Value,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A local id replaced during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdRemap {
    pub old: i32,
    pub new: i32,
}

/// Rows of this table rewritten to follow another table's new primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceUpdate {
    pub column: String,
    pub ids: Vec<i32>,
    pub value: Value,
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport<T> {
    /// The reconciled contents, in select order.
    pub rows: Vec<T>,
    /// Id rewrites, in the order they were applied.
    pub remaps: Vec<IdRemap>,
    /// Number of conflicts handed to the resolver.
    pub conflicts: usize,
    /// Edited ids whose remote row no longer existed.
    pub dropped_edits: Vec<i32>,
    /// Whether the remote was reached.
    pub online: bool,
}

impl<T> SyncReport<T> {
    fn offline(rows: Vec<T>) -> Self {
        Self {
            rows,
            remaps: Vec::new(),
            conflicts: 0,
            dropped_edits: Vec::new(),
            online: false,
        }
    }
}

/// Keeps one table consistent between a local and a remote store.
pub struct ReconciliationEngine<T> {
    schema: TableSchema<T>,
    local: Box<dyn SqlExecutor>,
    remote: Box<dyn SqlExecutor>,
    resolver: Box<dyn ConflictResolver<T>>,
    state: SyncState,
    relocations: Vec<IdRemap>,
}

impl<T: Entity> ReconciliationEngine<T> {
    /// Create an engine for `T`'s own schema.
    pub fn new(
        local: impl SqlExecutor + 'static,
        remote: impl SqlExecutor + 'static,
    ) -> Result<Self> {
        Self::with_schema(T::schema(), local, remote)
    }

    /// Create an engine for an explicit schema.
    ///
    /// Validates the schema, creates the local tables if needed and loads the
    /// persisted sync state.
    pub fn with_schema(
        schema: TableSchema<T>,
        local: impl SqlExecutor + 'static,
        remote: impl SqlExecutor + 'static,
    ) -> Result<Self> {
        schema.validate()?;
        local.execute(&query::create_table(&schema, local.codec()))?;
        let state = SyncState::load(&local, schema.table_name())?;
        remap_log::open(&local, schema.table_name())?;

        debug!(
            table = schema.table_name(),
            local = local.codec().name(),
            remote = remote.codec().name(),
            "Opened reconciliation engine"
        );

        Ok(Self {
            schema,
            local: Box::new(local),
            remote: Box::new(remote),
            resolver: Box::new(LocalWins),
            state,
            relocations: Vec::new(),
        })
    }

    /// Replace the default [`LocalWins`] policy.
    pub fn with_resolver(mut self, resolver: impl ConflictResolver<T> + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn schema(&self) -> &TableSchema<T> {
        &self.schema
    }

    pub fn table_name(&self) -> &str {
        self.schema.table_name()
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn is_online(&self) -> bool {
        self.remote.is_available()
    }

    /// Read the local mirror.
    pub fn load(&self) -> Result<Vec<T>> {
        let rows = self.local.query(&query::select_all(&self.schema))?;
        rows.iter()
            .map(|row| self.schema.from_row(row, self.local.codec()))
            .collect()
    }

    /// Reconcile and return the resulting rows.
    pub fn sync(&mut self) -> Result<Vec<T>> {
        self.reconcile().map(|report| report.rows)
    }

    /// Push pending local work to the remote and re-mirror it.
    ///
    /// When the remote is unreachable the local mirror is returned unchanged
    /// and nothing is persisted.
    pub fn reconcile(&mut self) -> Result<SyncReport<T>> {
        self.apply_remaps()?;
        let mut working = self.load()?;
        let table = self.schema.table_name().to_string();

        if !self.remote.is_available() {
            debug!(table = %table, rows = working.len(), "Remote unavailable, serving local mirror");
            return Ok(SyncReport::offline(working));
        }

        self.remote
            .execute(&query::create_table(&self.schema, self.remote.codec()))?;

        // Deletes
        let deletes: Vec<i32> = self.state.pending_deletes().iter().copied().collect();
        if !deletes.is_empty() {
            self.remote
                .execute_update(&query::delete_ids(&self.schema, &deletes))?;
            debug!(table = %table, count = deletes.len(), "Pushed pending deletes");
        }

        // Inserts
        let mut remaps = Vec::new();
        let mut promoted = Vec::new();
        while let Some(local_id) = self.state.pending_inserts().first().copied() {
            let Some(pos) = self.position(&working, local_id) else {
                warn!(table = %table, id = local_id, "Pending insert has no local row, skipping");
                self.state.remove_insert(local_id);
                self.state.save(self.local.as_ref())?;
                continue;
            };

            let mut record = working.remove(pos);
            let canonical = self.insert_remote(&record)?;

            if canonical != local_id {
                if self.state.is_pending_insert(canonical) {
                    let fresh = self.relocate(&mut working, canonical)?;
                    remaps.push(IdRemap {
                        old: canonical,
                        new: fresh,
                    });
                }
                self.local
                    .execute_update(&query::rewrite_id(&self.schema, local_id, canonical))?;
                self.log_remap(local_id, canonical)?;
                remaps.push(IdRemap {
                    old: local_id,
                    new: canonical,
                });
            }

            self.schema.set_primary_key(&mut record, canonical);
            promoted.push(record);
            self.state.remove_insert(local_id);
            self.state.save(self.local.as_ref())?;
            debug!(table = %table, local_id, canonical, "Promoted pending insert");
        }

        // Edits
        let mut conflicts = Vec::new();
        let mut conflict_ids = Vec::new();
        let mut dropped_edits = Vec::new();
        let edits: Vec<i32> = self.state.pending_edits().iter().copied().collect();
        for id in edits {
            let Some(pos) = self.position(&working, id) else {
                warn!(table = %table, id, "Pending edit has no local row, skipping");
                continue;
            };
            match self.fetch_remote(id)? {
                Some(server) => {
                    conflicts.push(Conflict::new(working[pos].clone(), server));
                    conflict_ids.push(id);
                }
                None => {
                    info!(table = %table, id, "Edited row was deleted remotely, dropping edit");
                    dropped_edits.push(id);
                }
            }
        }

        self.state.clear();
        self.state.set_stale(true);
        self.state.save(self.local.as_ref())?;

        let expected = conflicts.len();
        let mut decisions = if conflicts.is_empty() {
            Vec::new()
        } else {
            self.resolver.resolve(conflicts)
        };
        if decisions.len() != expected {
            return Err(Error::ConflictResolution {
                expected,
                got: decisions.len(),
            });
        }
        for (decision, id) in decisions.iter_mut().zip(&conflict_ids) {
            self.schema.set_primary_key(decision, *id);
        }

        let pushed = self.keyed_fields(
            decisions.iter().chain(promoted.iter()),
            TableSchema::fields_of,
        )?;
        for sql in query::upsert_many(&self.schema, self.remote.codec(), &pushed) {
            self.remote.execute(&sql)?;
        }

        let rows = self.remote.query(&query::select_all(&self.schema))?;
        let fresh: Vec<T> = rows
            .iter()
            .map(|row| self.schema.from_row(row, self.remote.codec()))
            .collect::<Result<_>>()?;
        self.mirror(&fresh)?;

        self.state.set_stale(false);
        self.state.save(self.local.as_ref())?;

        info!(
            table = %table,
            rows = fresh.len(),
            deletes = deletes.len(),
            promoted = promoted.len(),
            conflicts = expected,
            dropped = dropped_edits.len(),
            "Reconciled table"
        );

        Ok(SyncReport {
            rows: fresh,
            remaps,
            conflicts: expected,
            dropped_edits,
            online: true,
        })
    }

    /// Persist a new record and return it with its primary key set.
    ///
    /// Goes straight to the remote when it is reachable and is mirrored with
    /// the values the remote stored. A pending local row holding the id the
    /// remote assigned is moved to a fresh local id first. Offline, the row
    /// gets a local id and is promoted on the next reconciliation.
    pub fn insert(&mut self, record: &T) -> Result<T> {
        let mut stored = record.clone();

        if self.remote.is_available() {
            let id = self.insert_remote(record)?;
            if self.state.is_pending_insert(id) {
                let fresh = self.relocate(&mut [], id)?;
                self.relocations.push(IdRemap { old: id, new: fresh });
            }
            self.schema.set_primary_key(&mut stored, id);
            if let Some(server) = self.fetch_remote(id)? {
                stored = server;
            }
            let fields = self.schema.all_fields_of(&stored);
            self.local
                .execute(&query::upsert(&self.schema, self.local.codec(), id, &fields))?;
            debug!(table = self.schema.table_name(), id, "Inserted row");
            return Ok(stored);
        }

        let sql = query::insert_returning(
            &self.schema,
            self.local.codec(),
            &self.schema.fields_of(record),
        );
        let id = self.returned_id(self.local.as_ref(), &sql)?;
        self.state.record_insert(id);
        self.state.save(self.local.as_ref())?;
        self.schema.set_primary_key(&mut stored, id);
        debug!(table = self.schema.table_name(), id, "Buffered insert locally");
        Ok(stored)
    }

    pub fn insert_all(&mut self, records: &[T]) -> Result<Vec<T>> {
        records.iter().map(|record| self.insert(record)).collect()
    }

    pub fn delete(&mut self, record: &T) -> Result<()> {
        let id = self.schema.require_primary_key(record)?;
        self.delete_ids(&[id])
    }

    pub fn delete_all(&mut self, records: &[T]) -> Result<()> {
        let ids = records
            .iter()
            .map(|record| self.schema.require_primary_key(record))
            .collect::<Result<Vec<_>>>()?;
        self.delete_ids(&ids)
    }

    /// Delete rows by primary key from both stores.
    pub fn delete_ids(&mut self, ids: &[i32]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.local
            .execute_update(&query::delete_ids(&self.schema, ids))?;

        let online = self.remote.is_available();
        let mut remote_ids = Vec::new();
        let mut changed = false;
        for &id in ids {
            if self.state.is_pending_insert(id) {
                self.state.record_delete(id);
                changed = true;
            } else if online {
                remote_ids.push(id);
                changed |= self.state.discard_edit(id);
            } else {
                self.state.record_delete(id);
                changed = true;
            }
        }

        if !remote_ids.is_empty() {
            self.remote
                .execute_update(&query::delete_ids(&self.schema, &remote_ids))?;
        }
        if changed {
            self.state.save(self.local.as_ref())?;
        }

        debug!(
            table = self.schema.table_name(),
            count = ids.len(),
            remote = remote_ids.len(),
            "Deleted rows"
        );
        Ok(())
    }

    /// Set one column of a record in both stores and in `record`.
    ///
    /// Returns the previous value. The record is only modified once the
    /// stores accepted the write.
    pub fn update(&mut self, record: &mut T, column: &str, value: Value) -> Result<Value> {
        let id = self.schema.require_primary_key(record)?;
        let column = self.writable_column(column)?;

        let mut updated = record.clone();
        let old = column.value_of(&updated);
        column.assign(&mut updated, value)?;
        let stored = column.value_of(&updated);
        let name = column.name().to_string();

        self.write_column(&[id], &name, &stored)?;
        *record = updated;
        Ok(old)
    }

    /// Set one column on many rows, by primary key.
    pub fn update_rows(&mut self, ids: &[i32], column: &str, value: &Value) -> Result<()> {
        let name = self.writable_column(column)?.name().to_string();
        self.write_column(ids, &name, value)
    }

    /// Rewrite columns mirroring another table's primary key that still hold
    /// ids the other table has since promoted or relocated.
    ///
    /// Runs at the start of every reconciliation; lists also call it when a
    /// table they mirror was reconciled.
    pub fn apply_remaps(&mut self) -> Result<Vec<ReferenceUpdate>> {
        let table = self.schema.table_name().to_string();
        let entries = remap_log::pending(self.local.as_ref(), &table)?;
        let Some(last) = entries.last().map(|entry| entry.seq) else {
            return Ok(Vec::new());
        };

        let mut rows = self.load()?;
        let mut updates = Vec::new();
        for entry in &entries {
            let old = Value::from(entry.old);
            let new = Value::from(entry.new);
            let matches: Vec<(String, Vec<usize>)> = self
                .schema
                .mirrors()
                .filter(|(column, mirror)| {
                    column.is_insertable()
                        && mirror.table.eq_ignore_ascii_case(&entry.table)
                        && mirror.column.eq_ignore_ascii_case(&entry.column)
                })
                .map(|(column, _)| {
                    let positions = rows
                        .iter()
                        .enumerate()
                        .filter(|(_, row)| column.value_of(row) == old)
                        .map(|(i, _)| i)
                        .collect();
                    (column.name().to_string(), positions)
                })
                .collect();

            for (name, positions) in matches {
                if positions.is_empty() {
                    continue;
                }
                let ids = positions
                    .iter()
                    .map(|&i| self.schema.require_primary_key(&rows[i]))
                    .collect::<Result<Vec<_>>>()?;
                self.update_rows(&ids, &name, &new)?;
                if let Some(column) = self.schema.column(&name) {
                    for &i in &positions {
                        column.assign(&mut rows[i], new.clone())?;
                    }
                }
                debug!(
                    table = %table,
                    column = %name,
                    source = %entry.table,
                    old = entry.old,
                    new = entry.new,
                    rows = ids.len(),
                    "Followed primary key rewrite"
                );
                updates.push(ReferenceUpdate {
                    column: name,
                    ids,
                    value: new.clone(),
                });
            }
        }

        remap_log::advance(self.local.as_ref(), &table, last)?;
        Ok(updates)
    }

    /// Pending local rows moved aside by online inserts since the last call.
    pub fn take_relocations(&mut self) -> Vec<IdRemap> {
        std::mem::take(&mut self.relocations)
    }

    fn writable_column(&self, name: &str) -> Result<&Column<T>> {
        if name.eq_ignore_ascii_case(self.schema.primary_key()) {
            return Err(Error::invariant(format!(
                "primary key of '{}' cannot be updated",
                self.schema.table_name()
            )));
        }
        let column = self.schema.column(name).ok_or_else(|| {
            Error::invariant(format!(
                "unknown column '{name}' in table '{}'",
                self.schema.table_name()
            ))
        })?;
        if !column.is_insertable() {
            return Err(Error::invariant(format!(
                "column '{name}' of '{}' is not insertable",
                self.schema.table_name()
            )));
        }
        Ok(column)
    }

    fn write_column(&mut self, ids: &[i32], column: &str, value: &Value) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.local.execute_update(&query::update_column(
            &self.schema,
            self.local.codec(),
            ids,
            column,
            value,
        ))?;

        // The remote never saw rows still pending insert.
        let shared: Vec<i32> = ids
            .iter()
            .copied()
            .filter(|id| !self.state.is_pending_insert(*id))
            .collect();
        if shared.is_empty() {
            return Ok(());
        }

        if self.remote.is_available() {
            self.remote.execute_update(&query::update_column(
                &self.schema,
                self.remote.codec(),
                &shared,
                column,
                value,
            ))?;
        } else {
            for &id in &shared {
                self.state.record_edit(id);
            }
            self.state.save(self.local.as_ref())?;
        }

        debug!(
            table = self.schema.table_name(),
            column,
            count = ids.len(),
            "Updated column"
        );
        Ok(())
    }

    fn position(&self, rows: &[T], id: i32) -> Option<usize> {
        rows.iter()
            .position(|row| self.schema.primary_key_of(row) == Some(id))
    }

    fn insert_remote(&self, record: &T) -> Result<i32> {
        let sql = query::insert_returning(
            &self.schema,
            self.remote.codec(),
            &self.schema.fields_of(record),
        );
        self.returned_id(self.remote.as_ref(), &sql)
    }

    fn returned_id(&self, executor: &dyn SqlExecutor, sql: &str) -> Result<i32> {
        let key = self.schema.primary_key();
        let rows = executor.query(sql)?;
        let raw = rows
            .first()
            .and_then(|row| row.get(key))
            .cloned()
            .ok_or_else(|| Error::storage("insert", sql, format!("no '{key}' returned")))?;
        executor
            .codec()
            .decode(raw, crate::ColumnType::Int)
            .and_then(Value::decode)
    }

    fn fetch_remote(&self, id: i32) -> Result<Option<T>> {
        let rows = self
            .remote
            .query(&query::select_by_id(&self.schema, id))?;
        rows.first()
            .map(|row| self.schema.from_row(row, self.remote.codec()))
            .transpose()
    }

    /// Move the pending local row `id` out of the way of a canonical id.
    fn relocate(&mut self, working: &mut [T], id: i32) -> Result<i32> {
        let rows = self.local.query(&query::max_id(&self.schema))?;
        let max: Option<i64> = match rows.first().and_then(|row| row.get("max_id")) {
            Some(raw) => self
                .local
                .codec()
                .decode(raw.clone(), crate::ColumnType::Int)
                .and_then(Value::decode)?,
            None => None,
        };
        let fresh = max
            .unwrap_or(0)
            .max(i64::from(id))
            .checked_add(1)
            .and_then(|next| i32::try_from(next).ok())
            .ok_or_else(|| Error::invariant("local id space exhausted"))?;

        self.local
            .execute_update(&query::rewrite_id(&self.schema, id, fresh))?;
        self.state.relocate_insert(id, fresh)?;
        self.state.save(self.local.as_ref())?;
        self.log_remap(id, fresh)?;
        if let Some(pos) = self.position(working, id) {
            self.schema.set_primary_key(&mut working[pos], fresh);
        }

        debug!(table = self.schema.table_name(), id, fresh, "Relocated colliding local row");
        Ok(fresh)
    }

    /// Replace the local mirror with `rows`, every column included.
    fn mirror(&self, rows: &[T]) -> Result<()> {
        self.local.execute_update(&query::delete_all(&self.schema))?;
        let keyed = self.keyed_fields(rows.iter(), TableSchema::all_fields_of)?;
        for sql in query::upsert_many(&self.schema, self.local.codec(), &keyed) {
            self.local.execute(&sql)?;
        }
        Ok(())
    }

    fn keyed_fields<'a>(
        &self,
        rows: impl Iterator<Item = &'a T>,
        fields: fn(&TableSchema<T>, &T) -> Vec<(String, Value)>,
    ) -> Result<Vec<(i32, Vec<(String, Value)>)>> {
        rows.map(|row| {
            let id = self.schema.require_primary_key(row)?;
            Ok((id, fields(&self.schema, row)))
        })
        .collect()
    }

    fn log_remap(&self, old: i32, new: i32) -> Result<()> {
        remap_log::record(
            self.local.as_ref(),
            self.schema.table_name(),
            self.schema.primary_key(),
            old,
            new,
        )
    }
}
