//! Derived-field propagation between lists.
//!
//! A column declared with [`Column::mirrors`](crate::Column::mirrors) holds a
//! copy of a field of another table, typically its primary key. When that
//! field changes, every row of the dependent list holding the old value is
//! rewritten. Links are single-hop: a rewrite performed by propagation does
//! not trigger further propagation.
//!
//! Primary-key rewrites are not pushed by value: they go through the durable
//! remap log, and [`Registry::follow_remaps`] asks open dependents to replay
//! it. Dependents that are not open replay it when they next reconcile.

use crate::list::Dispatch;
use crate::{Error, Result, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use tracing::debug;

/// A list that can rewrite its mirrored fields.
pub(crate) trait DerivedTarget {
    /// Set `column` to `new` on every row where it equals `old`.
    fn apply_link(&mut self, column: &str, old: &Value, new: &Value) -> Result<usize>;

    /// Replay logged primary-key rewrites of the tables this list mirrors.
    fn apply_remaps(&mut self) -> Result<usize>;

    /// Events raised since the last call, ready to be delivered.
    fn take_events(&mut self) -> Dispatch;
}

/// `target_table.target_column` mirrors `source_table.source_column`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub source_table: String,
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
}

struct Entry {
    target: Weak<RefCell<dyn DerivedTarget>>,
    links: Vec<Link>,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.target.strong_count() > 0
    }
}

/// Table name to live list lookup, shared by every list of one application.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct Registry {
    entries: Rc<RefCell<BTreeMap<String, Entry>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        table: &str,
        links: Vec<Link>,
        target: Weak<RefCell<dyn DerivedTarget>>,
    ) -> Result<()> {
        if let Some(link) = links
            .iter()
            .find(|l| l.source_table.eq_ignore_ascii_case(&l.target_table))
        {
            return Err(Error::invariant(format!(
                "'{}.{}' cannot mirror its own table",
                link.target_table, link.target_column
            )));
        }

        let mut entries = self
            .entries
            .try_borrow_mut()
            .map_err(|_| Error::invariant("registry is busy"))?;
        let key = table.to_ascii_lowercase();
        if entries.get(&key).is_some_and(Entry::is_live) {
            return Err(Error::invariant(format!(
                "a list for table '{table}' is already open"
            )));
        }

        debug!(table, links = links.len(), "Registered list");
        entries.insert(key, Entry { target, links });
        Ok(())
    }

    /// Whether a live list is registered for `table`.
    pub fn is_registered(&self, table: &str) -> bool {
        self.entries
            .borrow()
            .get(&table.to_ascii_lowercase())
            .is_some_and(Entry::is_live)
    }

    /// Links of every live list.
    pub fn links(&self) -> Vec<Link> {
        self.entries
            .borrow()
            .values()
            .filter(|e| e.is_live())
            .flat_map(|e| e.links.iter().cloned())
            .collect()
    }

    /// Rewrite fields mirroring `table.column` from `old` to `new`.
    ///
    /// Returns the number of dependent rows touched.
    pub fn propagate(&self, table: &str, column: &str, old: &Value, new: &Value) -> Result<usize> {
        if old == new {
            return Ok(0);
        }

        let targets = self.targets(|link| {
            link.source_table.eq_ignore_ascii_case(table)
                && link.source_column.eq_ignore_ascii_case(column)
        })?;

        let mut touched = 0;
        for (target, link) in targets {
            touched += Self::visit(&target, &link, |t| {
                t.apply_link(&link.target_column, old, new)
            })?;
        }

        if touched > 0 {
            debug!(table, column, touched, "Propagated derived field");
        }
        Ok(touched)
    }

    /// Have every open list mirroring `table` replay the remap log.
    ///
    /// Returns the number of dependent rows rewritten.
    pub fn follow_remaps(&self, table: &str) -> Result<usize> {
        let mut targets = self.targets(|link| link.source_table.eq_ignore_ascii_case(table))?;
        targets.dedup_by(|a, b| a.1.target_table.eq_ignore_ascii_case(&b.1.target_table));

        let mut touched = 0;
        for (target, link) in targets {
            touched += Self::visit(&target, &link, |t| t.apply_remaps())?;
        }
        Ok(touched)
    }

    /// Live targets and the links of theirs that `matches` accepts.
    fn targets(
        &self,
        matches: impl Fn(&Link) -> bool,
    ) -> Result<Vec<(Rc<RefCell<dyn DerivedTarget>>, Link)>> {
        let entries = self
            .entries
            .try_borrow()
            .map_err(|_| Error::invariant("registry is busy"))?;

        let mut targets = Vec::new();
        for entry in entries.values() {
            let Some(target) = entry.target.upgrade() else {
                continue;
            };
            for link in &entry.links {
                if matches(link) {
                    targets.push((target.clone(), link.clone()));
                }
            }
        }
        Ok(targets)
    }

    /// Run `f` on a borrowed target, then deliver its events.
    fn visit(
        target: &Rc<RefCell<dyn DerivedTarget>>,
        link: &Link,
        f: impl FnOnce(&mut dyn DerivedTarget) -> Result<usize>,
    ) -> Result<usize> {
        let (result, dispatch) = {
            let mut target = target.try_borrow_mut().map_err(|_| {
                Error::invariant(format!(
                    "list for table '{}' is busy during propagation",
                    link.target_table
                ))
            })?;
            let result = f(&mut *target);
            (result, target.take_events())
        };
        dispatch.run();
        result
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables: Vec<String> = self
            .entries
            .try_borrow()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("Registry").field("tables", &tables).finish()
    }
}
