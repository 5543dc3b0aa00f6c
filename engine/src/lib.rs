//! # Replist Engine
//!
//! Replica reconciliation for lists persisted in two relational stores.
//!
//! A local embedded store acts as cache and write buffer; a remote store is
//! the system of record whenever it is reachable. This crate decides how each
//! mutation made while the remote may be unreachable is propagated, how
//! locally minted primary keys are replaced by server-assigned ones, and how
//! conflicting offline edits are resolved.
//!
//! ## Design Principles
//!
//! - **No IO of its own**: every statement goes through a [`SqlExecutor`]
//! - **Explicit schemas**: records describe their table once through [`Entity`]
//! - **Single writer**: synchronous and `!Send`; no background threads
//!
//! ## Core Concepts
//!
//! ### Schemas
//!
//! A [`TableSchema`] maps a record type to a table: an integer primary key
//! (default column `_id`) and ordered [`Column`]s with plain function
//! accessors. Columns may be read-only ([`Column::not_insertable`]) or mirror
//! a field of another table ([`Column::mirrors`]).
//!
//! ### Sync state
//!
//! Offline inserts, deletes and edits are tracked per table in a
//! [`SyncState`] persisted in the local store, so pending work survives
//! restarts.
//!
//! ### Reconciliation
//!
//! [`ReconciliationEngine::reconcile`] pushes pending deletes, promotes pending
//! inserts to canonical ids, hands offline edits of rows that still exist
//! remotely to a [`ConflictResolver`] and finally re-mirrors the remote:
//! - [`LocalWins`] - keep the offline edit (default)
//! - [`ServerWins`] - keep the remote row
//! - [`FnResolver`] - any closure
//!
//! ### Lists
//!
//! [`ReplicatedList`] wraps an engine as an observable collection. Lists
//! share a [`Registry`] through which field updates reach dependent lists.
//! Primary-key rewrites are also written to a log in the local store
//! ([`remap_log`]), so tables that mirror the key follow them even when their
//! list was not open at the time.
//!
//! ## Quick Start
//!
//! ```rust
//! use replist_engine::{query, Column, ColumnType, Entity, PrimaryKey, SqliteCodec, TableSchema};
//!
//! #[derive(Debug, Clone, Default)]
//! struct Book {
//!     id: Option<i32>,
//!     title: String,
//! }
//!
//! impl Entity for Book {
//!     fn schema() -> TableSchema<Self> {
//!         TableSchema::new("books", PrimaryKey::new(|b: &Book| b.id, |b, id| b.id = Some(id)))
//!             .with_column(Column::new(
//!                 "title",
//!                 ColumnType::Text,
//!                 |b: &Book| b.title.clone().into(),
//!                 |b: &mut Book, v| {
//!                     b.title = v.decode()?;
//!                     Ok(())
//!                 },
//!             ))
//!     }
//! }
//!
//! let schema = Book::schema();
//! schema.validate().unwrap();
//! assert_eq!(
//!     query::create_table(&schema, &SqliteCodec),
//!     "CREATE TABLE IF NOT EXISTS books (_id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT)"
//! );
//! ```
//!
//! With executors for both stores, `ReconciliationEngine::<Book>::new(local,
//! remote)` opens the table and `ReplicatedList::open(engine, &registry)`
//! loads it.

pub mod codec;
pub mod error;
pub mod executor;
pub mod list;
pub mod query;
pub mod reconcile;
pub mod registry;
pub mod remap_log;
pub mod resolver;
pub mod schema;
pub mod sync_state;
pub mod value;

// Re-export main types at crate root
pub use codec::{PostgresCodec, SqliteCodec, ValueCodec};
pub use error::{Error, Result};
pub use executor::{Row, SqlExecutor};
pub use list::{ListEvent, ReplicatedList};
pub use reconcile::{IdRemap, ReconciliationEngine, ReferenceUpdate, SyncReport};
pub use registry::{Link, Registry};
pub use resolver::{Conflict, ConflictResolver, FnResolver, LocalWins, ServerWins};
pub use schema::{Column, Entity, Getter, Mirror, PrimaryKey, Setter, TableSchema, DEFAULT_PRIMARY_KEY};
pub use sync_state::SyncState;
pub use value::{ColumnType, FromValue, Value};
