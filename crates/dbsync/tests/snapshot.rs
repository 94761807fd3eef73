//! Snapshot refresh behavior: classification, ordering, dedup,
//! row-bound handling and the aggregated result form.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use vigil_dbsync::{DbManagement, DbSync, Operation, SelectQuery};

const DDL: &str = "CREATE TABLE processes (pid BIGINT, name TEXT, PRIMARY KEY (pid));";

fn db() -> DbSync {
    DbSync::new(None, DDL, DbManagement::Volatile, &[]).unwrap()
}

fn collect(db: &DbSync, snapshot: Value) -> Vec<(Operation, Value)> {
    let mut events = Vec::new();
    db.update_with_snapshot("processes", &snapshot, &[], |op, v| {
        events.push((op, v.clone()));
    })
    .unwrap();
    events
}

fn count_rows(db: &DbSync) -> usize {
    let mut n = 0;
    db.select_rows(&SelectQuery::new("processes"), |_| n += 1).unwrap();
    n
}

#[test]
fn insert_modify_delete_cycle() {
    let db = db();

    let events = collect(&db, json!([{"pid": 1, "name": "a"}, {"pid": 2, "name": "b"}]));
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|(op, _)| *op == Operation::Inserted));
    let names: Vec<&str> = events.iter().map(|(_, v)| v["name"].as_str().unwrap()).collect();
    assert_eq!(names, ["a", "b"]);
    for (_, v) in &events {
        assert!(v["checksum"].as_str().is_some(), "missing checksum in {v}");
    }

    let events = collect(&db, json!([{"pid": 1, "name": "A"}]));
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, Operation::Deleted);
    assert_eq!(events[0].1["pid"], json!(2));
    assert_eq!(events[0].1["name"], json!("b"));
    assert_eq!(events[1].0, Operation::Modified);
    assert_eq!(events[1].1["pid"], json!(1));
    assert_eq!(events[1].1["name"], json!("A"));

    assert_eq!(count_rows(&db), 1);
}

#[test]
fn identical_snapshot_is_silent() {
    let db = db();
    let snapshot = json!([{"pid": 1, "name": "a"}, {"pid": 2, "name": "b"}, {"pid": 3}]);

    let first = collect(&db, snapshot.clone());
    assert_eq!(first.len(), 3);
    assert!(first.iter().all(|(op, _)| *op == Operation::Inserted));

    let second = collect(&db, snapshot);
    assert_eq!(second, vec![]);
}

#[test]
fn events_are_grouped_inserted_deleted_modified() {
    let db = db();
    collect(&db, json!([{"pid": 1, "name": "one"}, {"pid": 2, "name": "two"}]));

    // 1 disappears, 2 changes, 3 appears.
    let events = collect(&db, json!([{"pid": 2, "name": "TWO"}, {"pid": 3, "name": "three"}]));
    let ops: Vec<Operation> = events.iter().map(|(op, _)| *op).collect();
    assert_eq!(
        ops,
        [Operation::Inserted, Operation::Deleted, Operation::Modified]
    );
}

#[test]
fn max_rows_drops_overflow_rows_and_continues() {
    let db = db();
    db.set_max_rows("processes", 1).unwrap();

    let events = collect(&db, json!([{"pid": 1}, {"pid": 2}]));
    let ops: Vec<Operation> = events.iter().map(|(op, _)| *op).collect();
    assert_eq!(ops, [Operation::Inserted, Operation::MaxRows]);
    assert_eq!(count_rows(&db), 1);

    // Lifting the bound lets the next snapshot through.
    db.set_max_rows("processes", 0).unwrap();
    let events = collect(&db, json!([{"pid": 1}, {"pid": 2}]));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, Operation::Inserted);
    assert_eq!(count_rows(&db), 2);
}

#[test]
fn deleting_makes_room_under_the_bound() {
    let db = db();
    db.set_max_rows("processes", 2).unwrap();
    collect(&db, json!([{"pid": 1}, {"pid": 2}]));

    // Snapshot rotates one row out and one in; still two rows total.
    let events = collect(&db, json!([{"pid": 2}, {"pid": 3}]));
    let ops: Vec<Operation> = events.iter().map(|(op, _)| *op).collect();
    // The insert phase runs before the delete phase, so the bound is
    // still exhausted when pid 3 arrives.
    assert_eq!(ops, [Operation::MaxRows, Operation::Deleted]);
    assert_eq!(count_rows(&db), 1);
}

#[test]
fn aggregate_form_groups_by_operation() {
    let db = db();
    collect(&db, json!([{"pid": 1, "name": "one"}, {"pid": 2, "name": "two"}]));

    let result = db
        .update_with_snapshot_aggregate(
            "processes",
            &json!([{"pid": 2, "name": "TWO"}, {"pid": 3, "name": "three"}]),
            &[],
        )
        .unwrap();

    assert_eq!(result["inserted"].as_array().unwrap().len(), 1);
    assert_eq!(result["inserted"][0]["pid"], json!(3));
    assert_eq!(result["deleted"].as_array().unwrap().len(), 1);
    assert_eq!(result["deleted"][0]["pid"], json!(1));
    assert_eq!(result["modified"].as_array().unwrap().len(), 1);
    assert_eq!(result["modified"][0]["name"], json!("TWO"));
}

#[test]
fn single_object_snapshot_is_accepted() {
    let db = db();
    let events = collect(&db, json!({"pid": 9, "name": "solo"}));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, Operation::Inserted);
}

#[test]
fn snapshot_row_without_pk_is_rejected() {
    let db = db();
    let err = db
        .update_with_snapshot("processes", &json!([{"name": "ghost"}]), &[], |_, _| {})
        .unwrap_err();
    assert!(err.to_string().contains("primary key"), "{err}");
}
