//! Replicated lists: events and fields mirrored across tables.

mod common;

use common::{note, Harness, Note};
use replist_engine::{
    Column, ColumnType, Entity, Error, ListEvent, PrimaryKey, Registry, ReplicatedList,
    TableSchema, Value,
};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Default, PartialEq)]
struct Parent {
    id: Option<i32>,
    name: String,
}

impl Entity for Parent {
    fn schema() -> TableSchema<Self> {
        TableSchema::new("parents", PrimaryKey::new(|p: &Parent| p.id, |p, id| p.id = Some(id)))
            .with_column(Column::new(
                "name",
                ColumnType::Text,
                |p: &Parent| p.name.clone().into(),
                |p: &mut Parent, v| {
                    p.name = v.decode()?;
                    Ok(())
                },
            ))
    }
}

/// References its parent by id and copies the parent's name.
#[derive(Debug, Clone, Default, PartialEq)]
struct Child {
    id: Option<i32>,
    parent_id: Option<i32>,
    parent_name: String,
}

impl Entity for Child {
    fn schema() -> TableSchema<Self> {
        TableSchema::new("children", PrimaryKey::new(|c: &Child| c.id, |c, id| c.id = Some(id)))
            .with_column(
                Column::new(
                    "parent_id",
                    ColumnType::Int,
                    |c: &Child| c.parent_id.into(),
                    |c: &mut Child, v| {
                        c.parent_id = v.decode()?;
                        Ok(())
                    },
                )
                .mirrors("parents", "_id"),
            )
            .with_column(
                Column::new(
                    "parent_name",
                    ColumnType::Text,
                    |c: &Child| c.parent_name.clone().into(),
                    |c: &mut Child, v| {
                        c.parent_name = v.decode()?;
                        Ok(())
                    },
                )
                .mirrors("parents", "name"),
            )
    }
}

fn parent(name: &str) -> Parent {
    Parent {
        id: None,
        name: name.into(),
    }
}

fn child_of(parent: &Parent) -> Child {
    Child {
        id: None,
        parent_id: parent.id,
        parent_name: parent.name.clone(),
    }
}

fn open<T: Entity>(h: &Harness, registry: &Registry) -> ReplicatedList<T> {
    ReplicatedList::open(h.engine::<T>(), registry).unwrap()
}

#[test]
fn renaming_a_parent_renames_its_children() {
    let h = Harness::new();
    let registry = Registry::new();
    let parents = open::<Parent>(&h, &registry);
    let children = open::<Child>(&h, &registry);

    let alice = parents.push(parent("alice")).unwrap();
    let bob = parents.push(parent("bob")).unwrap();
    children.push(child_of(&alice)).unwrap();
    children.push(child_of(&alice)).unwrap();
    children.push(child_of(&bob)).unwrap();

    let old = parents.update(0, "name", "alicia").unwrap();

    assert_eq!(old, Value::from("alice"));
    let names: Vec<String> = children.to_vec().into_iter().map(|c| c.parent_name).collect();
    assert_eq!(names, vec!["alicia", "alicia", "bob"]);

    let remote: Vec<String> = h
        .remote_rows::<Child>()
        .into_iter()
        .map(|c| c.parent_name)
        .collect();
    assert_eq!(remote, names);
    assert_eq!(h.local_rows::<Child>(), children.to_vec());
}

#[test]
fn promoted_parent_ids_follow_into_children() {
    let h = Harness::new();
    h.create_remote_table::<Parent>();
    h.remote_insert(&parent("someone else"));
    h.remote_insert(&parent("another"));

    h.offline();
    let registry = Registry::new();
    let parents = open::<Parent>(&h, &registry);
    let children = open::<Child>(&h, &registry);

    let local = parents.push(parent("offline parent")).unwrap();
    assert_eq!(local.id, Some(1));
    children.push(child_of(&local)).unwrap();

    h.online();
    let report = parents.sync().unwrap();
    let canonical = report
        .rows
        .iter()
        .find(|p| p.name == "offline parent")
        .and_then(|p| p.id)
        .unwrap();
    assert_eq!(canonical, 3);

    // The child is still pending insert and was rewritten locally.
    assert_eq!(children.get(0).unwrap().parent_id, Some(canonical));
    assert_eq!(h.local_rows::<Child>()[0].parent_id, Some(canonical));

    children.sync().unwrap();
    let remote = h.remote_rows::<Child>();
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].parent_id, Some(canonical));
    assert!(children.sync_state().is_clean());
}

#[test]
fn children_reopened_after_their_parent_follow_its_promotion() {
    let h = Harness::new();
    h.create_remote_table::<Parent>();
    h.remote_insert(&parent("someone else"));
    h.remote_insert(&parent("another"));

    h.offline();
    {
        let registry = Registry::new();
        let parents = open::<Parent>(&h, &registry);
        let children = open::<Child>(&h, &registry);
        let local = parents.push(parent("offline parent")).unwrap();
        assert_eq!(local.id, Some(1));
        children.push(child_of(&local)).unwrap();
    }

    // Next session: the parent is promoted before any child list exists.
    h.online();
    let registry = Registry::new();
    let parents = open::<Parent>(&h, &registry);
    let promoted = parents
        .find(|p| p.name == "offline parent")
        .and_then(|p| p.id)
        .unwrap();
    assert_eq!(promoted, 3);
    assert_eq!(h.local_rows::<Child>()[0].parent_id, Some(1));

    let children = open::<Child>(&h, &registry);

    assert_eq!(children.get(0).unwrap().parent_id, Some(promoted));
    assert_eq!(h.local_rows::<Child>()[0].parent_id, Some(promoted));
    let remote = h.remote_rows::<Child>();
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].parent_id, Some(promoted));
    assert!(children.sync_state().is_clean());
}

#[test]
fn relocated_parent_is_followed_by_open_children() {
    let h = Harness::new();
    h.create_remote_table::<Parent>();
    let registry = Registry::new();
    let parents = open::<Parent>(&h, &registry);
    let children = open::<Child>(&h, &registry);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    parents
        .subscribe(move |event| sink.borrow_mut().push(event.clone()))
        .unwrap();

    h.offline();
    let pending = parents.push(parent("pending")).unwrap();
    children.push(child_of(&pending)).unwrap();

    h.online();
    let direct = parents.push(parent("direct")).unwrap();

    assert_eq!(direct.id, Some(1));
    assert_eq!(parents.ids(), vec![2, 1]);
    assert_eq!(children.get(0).unwrap().parent_id, Some(2));
    assert_eq!(h.local_rows::<Child>()[0].parent_id, Some(2));
    assert_eq!(
        seen.borrow()[1..],
        [
            ListEvent::Updated {
                index: 0,
                id: 2,
                column: "_id".into()
            },
            ListEvent::Inserted { index: 1, id: 1 },
        ]
    );

    parents.sync().unwrap();
    children.sync().unwrap();
    let remote = h.remote_rows::<Child>();
    let pending_id = parents.find(|p| p.name == "pending").and_then(|p| p.id);
    assert_eq!(remote[0].parent_id, pending_id);
}

#[test]
fn offline_rename_is_tracked_as_child_edit() {
    let h = Harness::new();
    let registry = Registry::new();
    let parents = open::<Parent>(&h, &registry);
    let children = open::<Child>(&h, &registry);
    let p = parents.push(parent("p")).unwrap();
    let c = children.push(child_of(&p)).unwrap();

    h.offline();
    parents.update(0, "name", "q").unwrap();

    assert_eq!(children.get(0).unwrap().parent_name, "q");
    assert!(children.sync_state().pending_edits().contains(&c.id.unwrap()));
    assert_eq!(h.remote_rows::<Child>()[0].parent_name, "p");

    h.online();
    parents.sync().unwrap();
    children.sync().unwrap();
    assert_eq!(h.remote_rows::<Child>()[0].parent_name, "q");
}

#[test]
fn dropped_list_stops_receiving_changes() {
    let h = Harness::new();
    let registry = Registry::new();
    let parents = open::<Parent>(&h, &registry);
    let p = parents.push(parent("p")).unwrap();
    {
        let children = open::<Child>(&h, &registry);
        children.push(child_of(&p)).unwrap();
    }
    assert!(!registry.is_registered("children"));

    parents.update(0, "name", "q").unwrap();

    assert_eq!(h.local_rows::<Child>()[0].parent_name, "p");
    let reopened = open::<Child>(&h, &registry);
    assert_eq!(reopened.get(0).unwrap().parent_name, "p");
}

#[test]
fn second_list_for_a_table_is_rejected() {
    let h = Harness::new();
    let registry = Registry::new();
    let _first = open::<Note>(&h, &registry);

    let err = ReplicatedList::open(h.engine::<Note>(), &registry).unwrap_err();

    assert!(matches!(err, Error::InvariantViolation(_)));
}

#[test]
fn listeners_see_every_mutation() {
    let h = Harness::new();
    let registry = Registry::new();
    let notes = open::<Note>(&h, &registry);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    notes
        .subscribe(move |event| sink.borrow_mut().push(event.clone()))
        .unwrap();

    let a = notes.push(note("a")).unwrap();
    let b = notes.push(note("b")).unwrap();
    notes.update(1, "body", "hello").unwrap();
    notes.remove(0).unwrap();
    notes.sync().unwrap();

    let (a, b) = (a.id.unwrap(), b.id.unwrap());
    assert_eq!(
        *seen.borrow(),
        vec![
            ListEvent::Inserted { index: 0, id: a },
            ListEvent::Inserted { index: 1, id: b },
            ListEvent::Updated {
                index: 1,
                id: b,
                column: "body".into()
            },
            ListEvent::Removed { index: 0, id: a },
            ListEvent::Synced { len: 1 },
        ]
    );
}

#[test]
fn set_writes_only_changed_columns() {
    let h = Harness::new();
    let registry = Registry::new();
    let notes = open::<Note>(&h, &registry);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let stored = notes.push(note("title")).unwrap();
    notes
        .subscribe(move |event| sink.borrow_mut().push(event.clone()))
        .unwrap();

    let previous = notes
        .set(
            0,
            Note {
                body: "new body".into(),
                ..stored.clone()
            },
        )
        .unwrap();

    assert_eq!(previous, stored);
    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(h.remote_rows::<Note>()[0].body, "new body");
    assert_eq!(h.remote_rows::<Note>()[0].title, "title");
}

#[test]
fn out_of_bounds_index_is_an_error() {
    let h = Harness::new();
    let registry = Registry::new();
    let notes = open::<Note>(&h, &registry);

    assert!(notes.remove(3).is_err());
    assert!(notes.update(0, "body", "x").is_err());
    assert_eq!(notes.remove_id(42).unwrap(), None);
}

#[test]
fn updating_an_unknown_column_is_an_invariant_violation() {
    let h = Harness::new();
    let registry = Registry::new();
    let notes = open::<Note>(&h, &registry);
    notes.push(note("a")).unwrap();

    let err = notes.update(0, "missing", "x").unwrap_err();

    assert!(matches!(err, Error::InvariantViolation(_)));
    assert_eq!(notes.get(0).unwrap(), h.local_rows::<Note>()[0]);
}
