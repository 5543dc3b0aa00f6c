//! Per-table bookkeeping of mutations the remote has not seen yet.
//!
//! The state lives in the local store next to the mirrored rows, so it
//! survives restarts. Id sets are stored as JSON arrays; `BTreeSet` keeps the
//! encoding deterministic and makes promotion run in ascending id order.

use crate::{query, ColumnType, Error, Result, SqlExecutor, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Pending inserts, deletes and edits of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    table: String,
    pending_inserts: BTreeSet<i32>,
    pending_deletes: BTreeSet<i32>,
    pending_edits: BTreeSet<i32>,
    stale: bool,
}

impl SyncState {
    /// A clean state for `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn pending_inserts(&self) -> &BTreeSet<i32> {
        &self.pending_inserts
    }

    pub fn pending_deletes(&self) -> &BTreeSet<i32> {
        &self.pending_deletes
    }

    pub fn pending_edits(&self) -> &BTreeSet<i32> {
        &self.pending_edits
    }

    /// Whether the local mirror may differ from the remote.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn set_stale(&mut self, stale: bool) {
        self.stale = stale;
    }

    pub fn is_pending_insert(&self, id: i32) -> bool {
        self.pending_inserts.contains(&id)
    }

    /// Whether nothing is waiting to be pushed.
    pub fn is_clean(&self) -> bool {
        self.pending_inserts.is_empty()
            && self.pending_deletes.is_empty()
            && self.pending_edits.is_empty()
    }

    /// Track a row created while the remote was unreachable.
    pub fn record_insert(&mut self, id: i32) {
        self.pending_deletes.remove(&id);
        self.pending_edits.remove(&id);
        self.pending_inserts.insert(id);
        self.stale = true;
    }

    /// Track a delete made while the remote was unreachable.
    ///
    /// Returns `true` when the remote must eventually see the delete. A row
    /// that never reached the remote is simply forgotten.
    pub fn record_delete(&mut self, id: i32) -> bool {
        self.stale = true;
        if self.pending_inserts.remove(&id) {
            return false;
        }
        self.pending_edits.remove(&id);
        self.pending_deletes.insert(id);
        true
    }

    /// Track an edit made while the remote was unreachable.
    ///
    /// Edits of rows still pending insert are not tracked: the insert carries
    /// the latest values anyway.
    pub fn record_edit(&mut self, id: i32) -> bool {
        self.stale = true;
        if self.pending_inserts.contains(&id) || self.pending_deletes.contains(&id) {
            return false;
        }
        self.pending_edits.insert(id)
    }

    /// Forget a pending edit superseded by a delete the remote has seen.
    pub fn discard_edit(&mut self, id: i32) -> bool {
        self.pending_edits.remove(&id)
    }

    /// Forget a pending insert once the remote has assigned its key.
    pub fn remove_insert(&mut self, id: i32) -> bool {
        self.pending_inserts.remove(&id)
    }

    /// Move a pending insert to a new local id.
    pub fn relocate_insert(&mut self, old: i32, new: i32) -> Result<()> {
        if !self.pending_inserts.remove(&old) {
            return Err(Error::invariant(format!(
                "cannot relocate {old} in '{}': not a pending insert",
                self.table
            )));
        }
        self.pending_inserts.insert(new);
        Ok(())
    }

    /// Drop every pending id. The stale flag is left to the caller.
    pub fn clear(&mut self) {
        self.pending_inserts.clear();
        self.pending_deletes.clear();
        self.pending_edits.clear();
    }

    /// Check the disjointness invariants.
    pub fn check(&self) -> Result<()> {
        if let Some(id) = self.pending_inserts.intersection(&self.pending_deletes).next() {
            return Err(Error::invariant(format!(
                "id {id} of '{}' is both pending insert and pending delete",
                self.table
            )));
        }
        if let Some(id) = self.pending_inserts.intersection(&self.pending_edits).next() {
            return Err(Error::invariant(format!(
                "id {id} of '{}' is both pending insert and pending edit",
                self.table
            )));
        }
        Ok(())
    }

    /// Load the persisted state of `table`, or a clean one if none exists.
    pub fn load(executor: &dyn SqlExecutor, table: &str) -> Result<Self> {
        let codec = executor.codec();
        executor.execute(&query::create_sync_state_table(codec))?;

        let rows = executor.query(&query::select_sync_state(codec, table))?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(Self::new(table));
        };

        let ids = |column: &str| -> Result<BTreeSet<i32>> {
            let raw = row.get(column).cloned().unwrap_or_default();
            let text: String = codec
                .decode(raw, ColumnType::Text)
                .and_then(Value::decode)
                .map_err(|e| Error::invariant(format!("sync state of '{table}': {e}")))?;
            serde_json::from_str(&text).map_err(|e| {
                Error::invariant(format!("sync state of '{table}' has malformed {column}: {e}"))
            })
        };

        let stale = codec
            .decode(row.get("stale").cloned().unwrap_or_default(), ColumnType::Bool)
            .and_then(Value::decode::<Option<bool>>)
            .map_err(|e| Error::invariant(format!("sync state of '{table}': {e}")))?
            .unwrap_or(false);

        let state = Self {
            table: table.to_string(),
            pending_inserts: ids("pending_inserts")?,
            pending_deletes: ids("pending_deletes")?,
            pending_edits: ids("pending_edits")?,
            stale,
        };
        state.check()?;

        tracing::debug!(
            table,
            inserts = state.pending_inserts.len(),
            deletes = state.pending_deletes.len(),
            edits = state.pending_edits.len(),
            stale = state.stale,
            "Loaded sync state"
        );
        Ok(state)
    }

    /// Persist this state through the local store.
    pub fn save(&self, executor: &dyn SqlExecutor) -> Result<()> {
        self.check()?;
        let encode = |ids: &BTreeSet<i32>| {
            serde_json::to_string(ids).map_err(|e| Error::invariant(e.to_string()))
        };
        let sql = query::upsert_sync_state(
            executor.codec(),
            &self.table,
            &encode(&self.pending_inserts)?,
            &encode(&self.pending_deletes)?,
            &encode(&self.pending_edits)?,
            self.stale,
        );
        executor.execute(&sql)?;
        Ok(())
    }
}
