//! Replist demo - two linked lists mirrored between SQLite and PostgreSQL.
//!
//! `t2.value` mirrors `t1.value`: renaming a `t1` row renames every `t2` row
//! that held the old value. Without `DATABASE_URL` the demo runs offline and
//! buffers everything in the local database.

use replist_engine::{
    Column, ColumnType, Entity, PrimaryKey, ReconciliationEngine, Registry, ReplicatedList,
    SqlExecutor, TableSchema,
};
use replist_store::{telemetry, PostgresStore, SqliteStore, StoreConfig};
use std::error::Error;

#[derive(Debug, Clone, Default)]
struct Table1 {
    id: Option<i32>,
    value: String,
}

impl Entity for Table1 {
    fn schema() -> TableSchema<Self> {
        TableSchema::new("t1", PrimaryKey::new(|r: &Table1| r.id, |r, id| r.id = Some(id)))
            .with_column(Column::new(
                "value",
                ColumnType::Text,
                |r: &Table1| r.value.clone().into(),
                |r: &mut Table1, v| {
                    r.value = v.decode()?;
                    Ok(())
                },
            ))
    }
}

#[derive(Debug, Clone, Default)]
struct Table2 {
    id: Option<i32>,
    value: String,
}

impl Entity for Table2 {
    fn schema() -> TableSchema<Self> {
        TableSchema::new("t2", PrimaryKey::new(|r: &Table2| r.id, |r, id| r.id = Some(id)))
            .with_column(
                Column::new(
                    "value",
                    ColumnType::Text,
                    |r: &Table2| r.value.clone().into(),
                    |r: &mut Table2, v| {
                        r.value = v.decode()?;
                        Ok(())
                    },
                )
                .mirrors("t1", "value"),
            )
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    telemetry::init();

    let config = StoreConfig::from_env()?;
    tracing::info!(
        local = %config.local_url,
        remote = config.remote_url.is_some(),
        "Starting replist demo"
    );

    let local = SqliteStore::open(&config.local_url)?;
    if config.remote_url.is_some() {
        run(local, PostgresStore::connect(&config)?)
    } else {
        let remote = SqliteStore::in_memory()?;
        remote.set_available(false);
        run(local, remote)
    }
}

fn run<R>(local: SqliteStore, remote: R) -> Result<(), Box<dyn Error>>
where
    R: SqlExecutor + Clone + 'static,
{
    let registry = Registry::new();
    let t1 = ReplicatedList::open(
        ReconciliationEngine::<Table1>::new(local.clone(), remote.clone())?,
        &registry,
    )?;
    let t2 = ReplicatedList::open(
        ReconciliationEngine::<Table2>::new(local, remote)?,
        &registry,
    )?;

    if t1.is_empty() {
        t1.push(Table1 {
            id: None,
            value: "value".into(),
        })?;
    }
    if t2.is_empty() {
        t2.push(Table2 {
            id: None,
            value: t1.get(0).map(|r| r.value).unwrap_or_default(),
        })?;
    }

    t1.subscribe(|event| tracing::info!(?event, "t1 changed"))?;
    t2.subscribe(|event| tracing::info!(?event, "t2 changed"))?;

    print_lists(&t1, &t2);
    t1.update(0, "value", "value....")?;
    print_lists(&t1, &t2);

    let state = t1.sync_state();
    tracing::info!(
        online = t1.is_online(),
        pending_inserts = state.pending_inserts().len(),
        pending_edits = state.pending_edits().len(),
        "Done"
    );
    Ok(())
}

fn print_lists(t1: &ReplicatedList<Table1>, t2: &ReplicatedList<Table2>) {
    let values = |rows: Vec<String>| format!("[{}]", rows.join(", "));
    println!(
        "t1: {}",
        values(t1.to_vec().into_iter().map(|r| format!("(value: {})", r.value)).collect())
    );
    println!(
        "t2: {}",
        values(t2.to_vec().into_iter().map(|r| format!("(value: {})", r.value)).collect())
    );
}
