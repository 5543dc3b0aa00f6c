//! Shared fixtures for store integration tests.
//!
//! Both stores are in-memory SQLite databases; the "remote" one is switched
//! on and off with `set_available`.

#![allow(dead_code)]

use replist_engine::{
    query, Column, ColumnType, Entity, PrimaryKey, ReconciliationEngine, Row, SqlExecutor,
    TableSchema, ValueCodec,
};
use replist_store::SqliteStore;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Note {
    pub id: Option<i32>,
    pub title: String,
    pub body: String,
}

impl Entity for Note {
    fn schema() -> TableSchema<Self> {
        TableSchema::new("notes", PrimaryKey::new(|n: &Note| n.id, |n, id| n.id = Some(id)))
            .with_column(Column::new(
                "title",
                ColumnType::Text,
                |n: &Note| n.title.clone().into(),
                |n: &mut Note, v| {
                    n.title = v.decode()?;
                    Ok(())
                },
            ))
            .with_column(Column::new(
                "body",
                ColumnType::Text,
                |n: &Note| n.body.clone().into(),
                |n: &mut Note, v| {
                    n.body = v.decode()?;
                    Ok(())
                },
            ))
    }
}

pub fn note(title: &str) -> Note {
    Note {
        id: None,
        title: title.into(),
        body: String::new(),
    }
}

/// Wraps an executor and records every statement it runs.
#[derive(Clone)]
pub struct Spy<E> {
    inner: E,
    log: Rc<RefCell<Vec<String>>>,
}

impl<E> Spy<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.borrow().clone()
    }
}

impl<E: SqlExecutor> SqlExecutor for Spy<E> {
    fn codec(&self) -> &dyn ValueCodec {
        self.inner.codec()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn execute(&self, sql: &str) -> replist_engine::Result<bool> {
        self.log.borrow_mut().push(sql.to_string());
        self.inner.execute(sql)
    }

    fn query(&self, sql: &str) -> replist_engine::Result<Vec<Row>> {
        self.log.borrow_mut().push(sql.to_string());
        self.inner.query(sql)
    }

    fn execute_update(&self, sql: &str) -> replist_engine::Result<Option<u64>> {
        self.log.borrow_mut().push(sql.to_string());
        self.inner.execute_update(sql)
    }
}

/// A local and a remote store for one test.
pub struct Harness {
    pub local: SqliteStore,
    pub remote: SqliteStore,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            local: SqliteStore::in_memory().unwrap(),
            remote: SqliteStore::in_memory().unwrap(),
        }
    }

    pub fn engine<T: Entity>(&self) -> ReconciliationEngine<T> {
        ReconciliationEngine::new(self.local.clone(), self.remote.clone()).unwrap()
    }

    pub fn offline(&self) {
        self.remote.set_available(false);
    }

    pub fn online(&self) {
        self.remote.set_available(true);
    }

    /// Create `T`'s table on the remote, as another client would have.
    pub fn create_remote_table<T: Entity>(&self) {
        self.remote
            .execute(&query::create_table(&T::schema(), self.remote.codec()))
            .unwrap();
    }

    /// Insert directly into the remote, bypassing the engine.
    pub fn remote_insert<T: Entity>(&self, record: &T) -> i32 {
        let schema = T::schema();
        let sql = query::insert_returning(&schema, self.remote.codec(), &schema.fields_of(record));
        let rows = self.remote.query(&sql).unwrap();
        rows[0].get("_id").and_then(|v| v.as_i64()).unwrap() as i32
    }

    pub fn remote_sql(&self, sql: &str) {
        self.remote.execute_update(sql).unwrap();
    }

    pub fn remote_rows<T: Entity>(&self) -> Vec<T> {
        rows_of(&self.remote)
    }

    pub fn local_rows<T: Entity>(&self) -> Vec<T> {
        rows_of(&self.local)
    }
}

fn rows_of<T: Entity>(store: &SqliteStore) -> Vec<T> {
    let schema = T::schema();
    store
        .query(&query::select_all(&schema))
        .unwrap()
        .iter()
        .map(|row| schema.from_row(row, store.codec()).unwrap())
        .collect()
}
