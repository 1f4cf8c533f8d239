use std::thread;
use std::time::Duration;

use panel_library_common::Error;
use panel_library_db::{
    ConnectionKind, ElementFilter, ElementKind, LibraryElementStore, NewLibraryElement,
    open_connection,
};
use rusqlite::params;

fn element(org_id: i64, folder_id: i64, name: &str, kind: ElementKind) -> NewLibraryElement {
    NewLibraryElement {
        org_id,
        folder_id,
        uid: None,
        name: name.to_string(),
        kind,
        element_type: "timeseries".to_string(),
        description: "shared panel".to_string(),
        model: r#"{"title":"shared"}"#.to_string(),
        created_by: 1,
    }
}

#[test]
fn duplicate_element_tuple_is_rejected_and_first_keeps_version() {
    let store = LibraryElementStore::in_memory(true).unwrap();

    let first = store
        .create_element(element(1, 1, "A", ElementKind::Panel))
        .unwrap();
    assert_eq!(first.version, 1);

    let err = store
        .create_element(element(1, 1, "A", ElementKind::Panel))
        .unwrap_err();
    assert!(err.is_duplicate(), "expected duplicate, got {err:?}");

    let stored = store.get_element(1, &first.uid).unwrap().unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(
        store.list_elements(1, ElementFilter::default()).unwrap().len(),
        1
    );
}

#[test]
fn every_element_tuple_collision_is_rejected() {
    let store = LibraryElementStore::in_memory(true).unwrap();
    let kinds = [ElementKind::Panel, ElementKind::Variable];

    for org in 1..=2 {
        for folder in 1..=2 {
            for kind in kinds {
                store
                    .create_element(element(org, folder, "cpu", kind))
                    .unwrap();
            }
        }
    }
    for org in 1..=2 {
        for folder in 1..=2 {
            for kind in kinds {
                let err = store
                    .create_element(element(org, folder, "cpu", kind))
                    .unwrap_err();
                assert!(err.is_duplicate());
            }
        }
    }
}

#[test]
fn duplicate_connection_is_rejected_and_disconnect_keeps_element() {
    let store = LibraryElementStore::in_memory(true).unwrap();
    let e = store
        .create_element(element(1, 1, "E", ElementKind::Panel))
        .unwrap();

    let link = store
        .connect_element(e.id, ConnectionKind::Dashboard, 5, 1)
        .unwrap();
    assert_eq!(link.library_element_id, e.id);
    assert_eq!(link.connection_id, 5);

    let err = store
        .connect_element(e.id, ConnectionKind::Dashboard, 5, 1)
        .unwrap_err();
    assert!(err.is_duplicate(), "expected duplicate, got {err:?}");
    assert_eq!(store.connection_count(e.id).unwrap(), 1);

    store
        .disconnect_element(e.id, ConnectionKind::Dashboard, 5)
        .unwrap();
    assert_eq!(store.connection_count(e.id).unwrap(), 0);

    let after = store.get_element(1, &e.uid).unwrap().unwrap();
    assert_eq!(after, e);
}

#[test]
fn element_with_connections_cannot_be_deleted() {
    let store = LibraryElementStore::in_memory(true).unwrap();
    let e = store
        .create_element(element(1, 1, "E", ElementKind::Panel))
        .unwrap();
    store
        .connect_element(e.id, ConnectionKind::Dashboard, 5, 1)
        .unwrap();

    let err = store.delete_element(1, &e.uid).unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "got {err:?}");
    assert!(store.get_element(1, &e.uid).unwrap().is_some());

    store
        .disconnect_consumer(ConnectionKind::Dashboard, 5)
        .unwrap();
    store.delete_element(1, &e.uid).unwrap();
    assert!(store.get_element(1, &e.uid).unwrap().is_none());
}

#[test]
fn delete_missing_element_is_not_found() {
    let store = LibraryElementStore::in_memory(true).unwrap();
    let err = store.delete_element(1, "missing").unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn deleted_name_can_be_reused() {
    let store = LibraryElementStore::in_memory(true).unwrap();
    let e = store
        .create_element(element(1, 1, "A", ElementKind::Panel))
        .unwrap();
    store.delete_element(1, &e.uid).unwrap();

    let again = store
        .create_element(element(1, 1, "A", ElementKind::Panel))
        .unwrap();
    assert_eq!(again.version, 1);
    assert_ne!(again.uid, e.uid);
}

#[test]
fn one_element_connects_to_many_dashboards() {
    let store = LibraryElementStore::in_memory(true).unwrap();
    let e = store
        .create_element(element(1, 1, "E", ElementKind::Panel))
        .unwrap();

    for dashboard in [3, 1, 2] {
        store
            .connect_element(e.id, ConnectionKind::Dashboard, dashboard, 4)
            .unwrap();
    }

    let links = store.list_connections(e.id).unwrap();
    let ids: Vec<_> = links.iter().map(|c| c.connection_id).collect();
    assert_eq!(ids, vec![3, 1, 2]);
    assert!(links
        .iter()
        .all(|c| c.connection_kind == ConnectionKind::Dashboard && c.created_by == 4));
}

#[test]
fn connect_waits_for_concurrent_delete_instead_of_orphaning() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("library.db");
    let store = LibraryElementStore::open(&path, Duration::from_secs(10), true).unwrap();
    let e = store
        .create_element(element(1, 1, "E", ElementKind::Panel))
        .unwrap();

    // Another process removes the element and holds the write lock.
    let other = open_connection(&path, Duration::from_secs(10)).unwrap();
    other.execute_batch("BEGIN IMMEDIATE").unwrap();
    other
        .execute("DELETE FROM library_element WHERE id = ?1", params![e.id])
        .unwrap();

    let element_id = e.id;
    let handle = thread::spawn(move || {
        store.connect_element(element_id, ConnectionKind::Dashboard, 5, 1)
    });
    thread::sleep(Duration::from_millis(200));
    other.execute_batch("COMMIT").unwrap();

    let err = handle.join().unwrap().unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {err:?}");

    let orphans: i64 = other
        .query_row(
            "SELECT COUNT(*) FROM library_element_connection WHERE library_element_id = ?1",
            params![element_id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(orphans, 0);
}
