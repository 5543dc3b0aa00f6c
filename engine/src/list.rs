//! The replicated list: an observable collection over one engine.
//!
//! Every mutation is routed through the [`ReconciliationEngine`] first and
//! only touches the in-memory contents once the stores accepted it. Listeners
//! run after the list's internal borrow is released, so they may read the
//! list they observe.

use crate::registry::{DerivedTarget, Link, Registry};
use crate::{Entity, Error, ReconciliationEngine, Result, SyncReport, SyncState, Value};
use std::cell::{RefCell, RefMut};
use std::rc::Rc;
use tracing::warn;

/// A change observed on a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEvent {
    Inserted { index: usize, id: i32 },
    Removed { index: usize, id: i32 },
    Updated { index: usize, id: i32, column: String },
    /// Contents were replaced by a reconciliation.
    Synced { len: usize },
}

type Listener = Box<dyn FnMut(&ListEvent)>;

/// Events waiting to be delivered to a list's listeners.
#[derive(Default)]
pub(crate) struct Dispatch {
    listeners: Option<Rc<RefCell<Vec<Listener>>>>,
    events: Vec<ListEvent>,
}

impl Dispatch {
    pub(crate) fn run(self) {
        let Some(listeners) = self.listeners else {
            return;
        };
        if self.events.is_empty() {
            return;
        }
        let Ok(mut listeners) = listeners.try_borrow_mut() else {
            warn!(events = self.events.len(), "Listener re-entered its list, dropping events");
            return;
        };
        for event in &self.events {
            for listener in listeners.iter_mut() {
                listener(event);
            }
        }
    }
}

struct ListInner<T> {
    engine: ReconciliationEngine<T>,
    items: Vec<T>,
    events: Vec<ListEvent>,
    listeners: Rc<RefCell<Vec<Listener>>>,
}

impl<T> ListInner<T> {
    fn dispatch(&mut self) -> Dispatch {
        Dispatch {
            listeners: Some(self.listeners.clone()),
            events: std::mem::take(&mut self.events),
        }
    }
}

impl<T: Entity> DerivedTarget for ListInner<T> {
    fn apply_link(&mut self, column: &str, old: &Value, new: &Value) -> Result<usize> {
        let (name, indices, ids) = {
            let schema = self.engine.schema();
            let column = schema.column(column).ok_or_else(|| {
                Error::invariant(format!(
                    "unknown mirrored column '{column}' in '{}'",
                    schema.table_name()
                ))
            })?;
            let indices: Vec<usize> = self
                .items
                .iter()
                .enumerate()
                .filter(|(_, item)| column.value_of(item) == *old)
                .map(|(i, _)| i)
                .collect();
            let ids = indices
                .iter()
                .map(|&i| schema.require_primary_key(&self.items[i]))
                .collect::<Result<Vec<_>>>()?;
            (column.name().to_string(), indices, ids)
        };
        if ids.is_empty() {
            return Ok(0);
        }

        self.engine.update_rows(&ids, &name, new)?;

        let ListInner {
            engine,
            items,
            events,
            ..
        } = self;
        if let Some(column) = engine.schema().column(&name) {
            for (&index, &id) in indices.iter().zip(&ids) {
                column.assign(&mut items[index], new.clone())?;
                events.push(ListEvent::Updated {
                    index,
                    id,
                    column: name.clone(),
                });
            }
        }
        Ok(ids.len())
    }

    fn apply_remaps(&mut self) -> Result<usize> {
        let updates = self.engine.apply_remaps()?;
        let mut touched = 0;
        for update in updates {
            for id in update.ids {
                touched += self.set_field(id, &update.column, update.value.clone())?;
            }
        }
        Ok(touched)
    }

    fn take_events(&mut self) -> Dispatch {
        self.dispatch()
    }
}

impl<T: Entity> ListInner<T> {
    /// Assign `column` of the in-memory record `id`, if the list holds it.
    fn set_field(&mut self, id: i32, column: &str, value: Value) -> Result<usize> {
        let schema = self.engine.schema();
        let Some(index) = self
            .items
            .iter()
            .position(|item| schema.primary_key_of(item) == Some(id))
        else {
            return Ok(0);
        };
        if let Some(c) = schema.column(column) {
            c.assign(&mut self.items[index], value)?;
        }
        self.events.push(ListEvent::Updated {
            index,
            id,
            column: column.to_string(),
        });
        Ok(1)
    }

    /// Follow pending rows the engine moved to fresh local ids.
    fn follow_relocations(&mut self) -> bool {
        let relocations = self.engine.take_relocations();
        let schema = self.engine.schema();
        let key = schema.primary_key().to_string();
        for remap in &relocations {
            if let Some(index) = self
                .items
                .iter()
                .position(|item| schema.primary_key_of(item) == Some(remap.old))
            {
                schema.set_primary_key(&mut self.items[index], remap.new);
                self.events.push(ListEvent::Updated {
                    index,
                    id: remap.new,
                    column: key.clone(),
                });
            }
        }
        !relocations.is_empty()
    }
}

/// A list of records kept in both stores.
pub struct ReplicatedList<T> {
    inner: Rc<RefCell<ListInner<T>>>,
    registry: Registry,
    table: String,
}

impl<T: Entity> ReplicatedList<T> {
    /// Register the list, reconcile its table and load the result.
    pub fn open(engine: ReconciliationEngine<T>, registry: &Registry) -> Result<Self> {
        let table = engine.table_name().to_string();
        let links = engine
            .schema()
            .mirrors()
            .map(|(column, mirror)| Link {
                source_table: mirror.table.clone(),
                source_column: mirror.column.clone(),
                target_table: table.clone(),
                target_column: column.name().to_string(),
            })
            .collect();

        let inner = Rc::new(RefCell::new(ListInner {
            engine,
            items: Vec::new(),
            events: Vec::new(),
            listeners: Rc::new(RefCell::new(Vec::new())),
        }));
        let target: Rc<RefCell<dyn DerivedTarget>> = inner.clone();
        registry.register(&table, links, Rc::downgrade(&target))?;

        let list = Self {
            inner,
            registry: registry.clone(),
            table,
        };
        list.sync()?;
        Ok(list)
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.borrow().items.get(index).cloned()
    }

    pub fn find(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<T> {
        self.inner
            .borrow()
            .items
            .iter()
            .find(|item| predicate(item))
            .cloned()
    }

    /// Index of the record with primary key `id`.
    pub fn position(&self, id: i32) -> Option<usize> {
        let inner = self.inner.borrow();
        let schema = inner.engine.schema();
        inner
            .items
            .iter()
            .position(|item| schema.primary_key_of(item) == Some(id))
    }

    /// Primary keys in list order.
    pub fn ids(&self) -> Vec<i32> {
        let inner = self.inner.borrow();
        let schema = inner.engine.schema();
        inner
            .items
            .iter()
            .filter_map(|item| schema.primary_key_of(item))
            .collect()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.inner.borrow().items.clone()
    }

    pub fn is_online(&self) -> bool {
        self.inner.borrow().engine.is_online()
    }

    /// Snapshot of the table's pending bookkeeping.
    pub fn sync_state(&self) -> SyncState {
        self.inner.borrow().engine.state().clone()
    }

    /// Observe changes to the list.
    pub fn subscribe(&self, listener: impl FnMut(&ListEvent) + 'static) -> Result<()> {
        let listeners = self.inner.borrow().listeners.clone();
        let mut listeners = listeners
            .try_borrow_mut()
            .map_err(|_| Error::invariant("cannot subscribe from inside a listener"))?;
        listeners.push(Box::new(listener));
        Ok(())
    }

    /// Append a record and return it with its primary key.
    pub fn push(&self, record: T) -> Result<T> {
        let (stored, relocated) = self.mutate(|inner| {
            let stored = inner.engine.insert(&record)?;
            let relocated = inner.follow_relocations();
            let id = inner.engine.schema().require_primary_key(&stored)?;
            inner.items.push(stored.clone());
            inner.events.push(ListEvent::Inserted {
                index: inner.items.len() - 1,
                id,
            });
            Ok((stored, relocated))
        })?;

        if relocated {
            self.registry.follow_remaps(&self.table)?;
        }
        Ok(stored)
    }

    pub fn extend(&self, records: impl IntoIterator<Item = T>) -> Result<Vec<T>> {
        records.into_iter().map(|record| self.push(record)).collect()
    }

    pub fn remove(&self, index: usize) -> Result<T> {
        self.mutate(|inner| {
            let record = inner.items.get(index).ok_or_else(|| out_of_bounds(index))?;
            let id = inner.engine.schema().require_primary_key(record)?;
            inner.engine.delete(record)?;
            let removed = inner.items.remove(index);
            inner.events.push(ListEvent::Removed { index, id });
            Ok(removed)
        })
    }

    /// Remove the record with primary key `id`, if present.
    pub fn remove_id(&self, id: i32) -> Result<Option<T>> {
        match self.position(id) {
            Some(index) => self.remove(index).map(Some),
            None => Ok(None),
        }
    }

    pub fn clear(&self) -> Result<()> {
        self.mutate(|inner| {
            inner.engine.delete_all(&inner.items)?;
            let ids: Vec<i32> = inner
                .items
                .iter()
                .filter_map(|item| inner.engine.schema().primary_key_of(item))
                .collect();
            inner.items.clear();
            for (index, id) in ids.into_iter().enumerate().rev() {
                inner.events.push(ListEvent::Removed { index, id });
            }
            Ok(())
        })
    }

    /// Set one column of the record at `index`, returning the old value.
    ///
    /// Fields mirroring the column in other lists follow the change.
    pub fn update(&self, index: usize, column: &str, value: impl Into<Value>) -> Result<Value> {
        let value = value.into();
        let (name, old, new) = self.mutate(|inner| {
            let ListInner {
                engine,
                items,
                events,
                ..
            } = inner;
            let record = items.get_mut(index).ok_or_else(|| out_of_bounds(index))?;
            let old = engine.update(record, column, value)?;

            let schema = engine.schema();
            let id = schema.require_primary_key(record)?;
            let c = schema.column(column).ok_or_else(|| {
                Error::invariant(format!(
                    "unknown column '{column}' in table '{}'",
                    schema.table_name()
                ))
            })?;
            let (name, new) = (c.name().to_string(), c.value_of(record));
            events.push(ListEvent::Updated {
                index,
                id,
                column: name.clone(),
            });
            Ok((name, old, new))
        })?;

        self.registry.propagate(&self.table, &name, &old, &new)?;
        Ok(old)
    }

    /// Replace the record at `index`, writing only the columns that differ.
    ///
    /// The primary key of the stored record is kept. Returns the previous
    /// record.
    pub fn set(&self, index: usize, record: T) -> Result<T> {
        let (current, changes) = {
            let inner = self.inner.borrow();
            let current = inner
                .items
                .get(index)
                .cloned()
                .ok_or_else(|| out_of_bounds(index))?;
            let changes: Vec<(String, Value)> = inner
                .engine
                .schema()
                .columns()
                .iter()
                .filter(|c| c.is_insertable())
                .filter_map(|c| {
                    let value = c.value_of(&record);
                    (value != c.value_of(&current)).then(|| (c.name().to_string(), value))
                })
                .collect();
            (current, changes)
        };

        for (column, value) in changes {
            self.update(index, &column, value)?;
        }
        Ok(current)
    }

    /// Reconcile with the remote, replace the contents and have open
    /// dependent lists follow the id remaps.
    pub fn sync(&self) -> Result<SyncReport<T>> {
        let report = self.mutate(|inner| {
            let report = inner.engine.reconcile()?;
            inner.items = report.rows.clone();
            inner.events.push(ListEvent::Synced {
                len: inner.items.len(),
            });
            Ok(report)
        })?;

        if !report.remaps.is_empty() {
            self.registry.follow_remaps(&self.table)?;
        }
        Ok(report)
    }

    /// Run `f` on the borrowed list, then deliver the events it raised.
    fn mutate<R>(&self, f: impl FnOnce(&mut ListInner<T>) -> Result<R>) -> Result<R> {
        let mut inner = self.borrow_mut()?;
        let result = f(&mut inner);
        let dispatch = inner.dispatch();
        drop(inner);
        dispatch.run();
        result
    }

    fn borrow_mut(&self) -> Result<RefMut<'_, ListInner<T>>> {
        self.inner.try_borrow_mut().map_err(|_| {
            Error::invariant(format!("list '{}' is already being modified", self.table))
        })
    }
}

impl<T> std::fmt::Debug for ReplicatedList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedList")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

fn out_of_bounds(index: usize) -> Error {
    Error::invariant(format!("index {index} out of bounds"))
}
