//! Pending work survives closing and reopening the local database.

mod common;

use common::{note, Note};
use replist_engine::{ReconciliationEngine, SyncState, Value};
use replist_store::SqliteStore;
use std::collections::BTreeSet;
use tempfile::TempDir;

fn local_store(dir: &TempDir) -> SqliteStore {
    let path = dir.path().join("replist.db");
    SqliteStore::open(&format!("sqlite://{}?mode=rwc", path.display())).unwrap()
}

#[test]
fn pending_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let remote = SqliteStore::in_memory().unwrap();

    let kept_id;
    let expected = {
        let local = local_store(&dir);
        let mut engine = ReconciliationEngine::<Note>::new(local, remote.clone()).unwrap();
        engine.sync().unwrap();
        let mut kept = engine.insert(&note("kept")).unwrap();
        let dropped = engine.insert(&note("dropped")).unwrap();
        kept_id = kept.id.unwrap();

        remote.set_available(false);
        engine.insert(&note("buffered")).unwrap();
        engine
            .update(&mut kept, "body", Value::from("edited offline"))
            .unwrap();
        engine.delete(&dropped).unwrap();
        engine.state().clone()
    };

    assert_eq!(expected.pending_inserts().len(), 1);
    assert_eq!(expected.pending_edits(), &BTreeSet::from([kept_id]));
    assert_eq!(expected.pending_deletes().len(), 1);

    let local = local_store(&dir);
    assert_eq!(SyncState::load(&local, "notes").unwrap(), expected);

    let mut engine = ReconciliationEngine::<Note>::new(local, remote.clone()).unwrap();
    assert_eq!(engine.state(), &expected);
    let offline: Vec<String> = engine
        .load()
        .unwrap()
        .into_iter()
        .map(|n| n.title)
        .collect();
    assert_eq!(offline, vec!["kept", "buffered"]);

    remote.set_available(true);
    let report = engine.reconcile().unwrap();

    assert!(engine.state().is_clean());
    assert_eq!(report.conflicts, 1);
    let titles: Vec<(String, String)> = report
        .rows
        .iter()
        .map(|n| (n.title.clone(), n.body.clone()))
        .collect();
    assert_eq!(
        titles,
        vec![
            ("kept".to_string(), "edited offline".to_string()),
            ("buffered".to_string(), String::new()),
        ]
    );
}

#[test]
fn fresh_database_starts_clean() {
    let dir = tempfile::tempdir().unwrap();
    let remote = SqliteStore::in_memory().unwrap();
    remote.set_available(false);

    let engine = ReconciliationEngine::<Note>::new(local_store(&dir), remote).unwrap();

    assert!(engine.state().is_clean());
    assert!(!engine.state().is_stale());
    assert!(engine.load().unwrap().is_empty());
    assert!(dir.path().join("replist.db").exists());
}
