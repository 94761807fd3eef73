//! Transaction pipelines: the per-row status machine, the deferred
//! deletion sweep, error conversion, and pooled dispatch.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use vigil_dbsync::{
    DbManagement, DbSync, DbSyncError, Operation, PipelineFactory, SelectQuery, SyncRowQuery,
};

const DDL: &str = "CREATE TABLE ports (inode BIGINT, local_port INTEGER, PRIMARY KEY (inode));";

type Captured = Arc<Mutex<Vec<(Operation, Value)>>>;

fn enable_logging() {
    let _ = env_logger::builder()
        .format_timestamp(None)
        .is_test(true)
        .try_init();
}

fn db() -> Arc<DbSync> {
    enable_logging();
    Arc::new(DbSync::new(None, DDL, DbManagement::Volatile, &[]).unwrap())
}

fn capture() -> (Captured, vigil_dbsync::EventSink) {
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let captured = captured.clone();
        Arc::new(move |op: Operation, v: &Value| captured.lock().push((op, v.clone())))
    };
    (captured, sink)
}

fn seed(db: &DbSync, rows: Value) {
    db.update_with_snapshot("ports", &rows, &[], |_, _| {}).unwrap();
}

#[test]
fn untouched_rows_are_swept_on_get_deleted() {
    let db = db();
    seed(&db, json!([{"inode": 1, "local_port": 22}, {"inode": 2, "local_port": 80}]));

    let factory = PipelineFactory::new();
    let (captured, sink) = capture();
    let id = factory
        .create(db.clone(), &["ports".into()], 1, 0, sink)
        .unwrap();
    let pipeline = factory.pipeline(id).unwrap();

    // Touch inode 1 (unchanged data: no event, but the row is seen).
    pipeline.sync_row(&SyncRowQuery::new("ports").data(json!({"inode": 1, "local_port": 22})));
    assert_eq!(captured.lock().len(), 0);

    let mut deleted = Vec::new();
    pipeline
        .get_deleted(|op, v| deleted.push((op, v.clone())))
        .unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].0, Operation::Deleted);
    assert_eq!(deleted[0].1["inode"], json!(2));

    factory.destroy(id).unwrap();
    drop(pipeline);

    let mut remaining = Vec::new();
    db.select_rows(&SelectQuery::new("ports").column_list(["inode"]), |v| {
        remaining.push(v["inode"].as_i64().unwrap())
    })
    .unwrap();
    assert_eq!(remaining, [1]);
}

#[test]
fn new_and_modified_rows_survive_the_sweep() {
    let db = db();
    seed(&db, json!([{"inode": 1, "local_port": 22}]));

    let factory = PipelineFactory::new();
    let (captured, sink) = capture();
    let id = factory
        .create(db.clone(), &["ports".into()], 1, 0, sink)
        .unwrap();
    let pipeline = factory.pipeline(id).unwrap();

    pipeline.sync_row(&SyncRowQuery::new("ports").data(json!({"inode": 1, "local_port": 2222})));
    pipeline.sync_row(&SyncRowQuery::new("ports").data(json!({"inode": 3, "local_port": 443})));

    {
        let events = captured.lock();
        let ops: Vec<Operation> = events.iter().map(|(op, _)| *op).collect();
        assert_eq!(ops, [Operation::Modified, Operation::Inserted]);
    }

    let mut deleted = Vec::new();
    pipeline.get_deleted(|op, v| deleted.push((op, v.clone()))).unwrap();
    assert_eq!(deleted, vec![]);

    factory.destroy(id).unwrap();
}

#[test]
fn sync_errors_become_db_error_events() {
    let db = db();
    let factory = PipelineFactory::new();
    let (captured, sink) = capture();
    let id = factory
        .create(db.clone(), &["ports".into()], 1, 0, sink)
        .unwrap();
    let pipeline = factory.pipeline(id).unwrap();

    // Missing primary key: the row is rejected but the pipeline lives.
    pipeline.sync_row(&SyncRowQuery::new("ports").data(json!({"local_port": 9})));

    let events = captured.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, Operation::DbError);
    assert!(events[0].1["exception"].as_str().unwrap().contains("primary key"));
    assert_eq!(events[0].1["table"], json!("ports"));
}

#[test]
fn row_bound_becomes_max_rows_event() {
    let db = db();
    seed(&db, json!([{"inode": 1}]));
    db.set_max_rows("ports", 1).unwrap();

    let factory = PipelineFactory::new();
    let (captured, sink) = capture();
    let id = factory
        .create(db.clone(), &["ports".into()], 1, 0, sink)
        .unwrap();
    let pipeline = factory.pipeline(id).unwrap();

    pipeline.sync_row(&SyncRowQuery::new("ports").data(json!({"inode": 2})));

    let events = captured.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, Operation::MaxRows);
}

#[test]
fn pooled_dispatch_delivers_every_event() {
    let db = db();
    let factory = PipelineFactory::new();
    let (captured, sink) = capture();
    let id = factory
        .create(db.clone(), &["ports".into()], 4, 8, sink)
        .unwrap();
    let pipeline = factory.pipeline(id).unwrap();

    for inode in 0..32 {
        pipeline.sync_row(&SyncRowQuery::new("ports").data(json!({"inode": inode})));
    }

    // get_deleted drains the pool before sweeping.
    pipeline.get_deleted(|_, _| panic!("nothing was left untouched")).unwrap();

    let events = captured.lock();
    assert_eq!(events.len(), 32);
    assert!(events.iter().all(|(op, _)| *op == Operation::Inserted));
}

#[test]
fn factory_rejects_unknown_handles() {
    let factory = PipelineFactory::new();
    assert!(matches!(factory.pipeline(42), Err(DbSyncError::InvalidHandle)));
    assert!(matches!(factory.destroy(42), Err(DbSyncError::InvalidHandle)));
}

#[test]
fn pipeline_requires_tables_and_closes_its_transaction() {
    let db = db();
    let factory = PipelineFactory::new();
    let (_, sink) = capture();
    assert!(matches!(
        factory.create(db.clone(), &[], 1, 0, sink.clone()),
        Err(DbSyncError::InvalidParameters(_))
    ));

    let id = factory.create(db.clone(), &["ports".into()], 1, 0, sink).unwrap();
    factory.destroy(id).unwrap();
    // A destroyed pipeline's id no longer resolves.
    assert!(factory.pipeline(id).is_err());
}

#[test]
fn table_outside_transaction_scope_is_rejected() {
    let db = db();
    let factory = PipelineFactory::new();
    let (captured, sink) = capture();
    let id = factory
        .create(db.clone(), &["ports".into()], 1, 0, sink)
        .unwrap();
    let pipeline = factory.pipeline(id).unwrap();

    pipeline.sync_row(&SyncRowQuery::new("not_in_scope").data(json!({"inode": 1})));

    let events = captured.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, Operation::DbError);
}
