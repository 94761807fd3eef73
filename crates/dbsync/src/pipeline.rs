//! Change-event pipelines: a transaction plus a bounded worker pool.
//!
//! The pool exists so a collector thread feeding [`Pipeline::sync_row`]
//! is not blocked by a slow sink. Events go through a bounded channel
//! shared by all workers; when the channel is full the event is
//! dispatched synchronously on the calling thread instead (back
//! pressure). Per-row errors never abort the pipeline — they turn into
//! DB_ERROR events carrying the offending input.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender, TrySendError};
use log::{debug, warn};
use parking_lot::Mutex;
use serde_json::{json, Value as Json};

use crate::error::DbSyncError;
use crate::event::Operation;
use crate::query::SyncRowQuery;
use crate::sync::{DbSync, TxnId};
use crate::Result;

/// Sink receiving classified events, possibly from several worker
/// threads at once.
pub type EventSink = Arc<dyn Fn(Operation, &Json) + Send + Sync>;

pub type PipelineId = u64;

/// Registry of live pipelines, keyed by opaque id.
#[derive(Default)]
pub struct PipelineFactory {
    pipelines: Mutex<HashMap<PipelineId, Arc<Pipeline>>>,
    next: AtomicU64,
}

impl PipelineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a transaction over `tables` and attaches a dispatch pool.
    /// `thread_count = 0` uses the host's parallelism; `max_queue = 0`
    /// disables the pool entirely (synchronous dispatch).
    pub fn create(
        &self,
        db: Arc<DbSync>,
        tables: &[String],
        thread_count: usize,
        max_queue: usize,
        sink: EventSink,
    ) -> Result<PipelineId> {
        let pipeline = Arc::new(Pipeline::new(db, tables, thread_count, max_queue, sink)?);
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.pipelines.lock().insert(id, pipeline);
        Ok(id)
    }

    pub fn pipeline(&self, id: PipelineId) -> Result<Arc<Pipeline>> {
        self.pipelines
            .lock()
            .get(&id)
            .cloned()
            .ok_or(DbSyncError::InvalidHandle)
    }

    /// Drops the pipeline, closing its transaction once the last
    /// outstanding reference is gone.
    pub fn destroy(&self, id: PipelineId) -> Result<()> {
        self.pipelines
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or(DbSyncError::InvalidHandle)
    }

    pub fn release(&self) {
        self.pipelines.lock().clear();
    }
}

pub struct Pipeline {
    db: Arc<DbSync>,
    txn: TxnId,
    sink: EventSink,
    pool: Mutex<Option<WorkerPool>>,
}

impl Pipeline {
    fn new(
        db: Arc<DbSync>,
        tables: &[String],
        thread_count: usize,
        max_queue: usize,
        sink: EventSink,
    ) -> Result<Self> {
        if tables.is_empty() {
            return Err(DbSyncError::InvalidParameters(
                "pipeline needs at least one table".into(),
            ));
        }
        let txn = db.create_txn(tables)?;
        let pool = (max_queue > 0).then(|| WorkerPool::start(thread_count, max_queue, sink.clone()));
        Ok(Self {
            db,
            txn,
            sink,
            pool: Mutex::new(pool),
        })
    }

    /// Synchronizes rows through the pipeline's transaction. Failures
    /// become MAX_ROWS or DB_ERROR events; the pipeline stays usable.
    pub fn sync_row(&self, query: &SyncRowQuery) {
        let mut events = Vec::new();
        let result = self
            .db
            .sync_txn_row(self.txn, query, |op, value| events.push((op, value.clone())));
        match result {
            Ok(()) => {}
            Err(DbSyncError::MaxRows { table }) => {
                warn!("pipeline sync hit the row limit of table {table}");
                events.push((Operation::MaxRows, input_document(query, None)));
            }
            Err(err) => {
                events.push((Operation::DbError, input_document(query, Some(&err))));
            }
        }
        for (op, value) in events {
            self.push_result(op, value);
        }
    }

    /// Drains the dispatch pool to quiescence, then runs the deletion
    /// sweep, invoking `sink` inline for every DELETED row.
    pub fn get_deleted(&self, sink: impl FnMut(Operation, &Json)) -> Result<()> {
        self.rundown();
        self.db.get_deleted(self.txn, sink)
    }

    fn push_result(&self, op: Operation, value: Json) {
        let rejected = {
            let pool = self.pool.lock();
            match &*pool {
                Some(pool) => match pool.tx.try_send((op, value)) {
                    Ok(()) => None,
                    Err(TrySendError::Full(ev)) | Err(TrySendError::Disconnected(ev)) => Some(ev),
                },
                None => Some((op, value)),
            }
        };
        // Synchronous fallback runs without the pool lock held.
        if let Some((op, value)) = rejected {
            dispatch_event(&self.sink, op, &value);
        }
    }

    fn rundown(&self) {
        if let Some(pool) = self.pool.lock().take() {
            pool.rundown();
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.rundown();
        if let Err(err) = self.db.close_txn(self.txn) {
            debug!("closing pipeline transaction: {err}");
        }
    }
}

struct WorkerPool {
    tx: Sender<(Operation, Json)>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn start(thread_count: usize, capacity: usize, sink: EventSink) -> Self {
        let threads = if thread_count == 0 {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            thread_count
        };
        let (tx, rx) = bounded::<(Operation, Json)>(capacity);
        let workers = (0..threads)
            .map(|i| {
                let rx = rx.clone();
                let sink = sink.clone();
                std::thread::Builder::new()
                    .name(format!("dbsync-dispatch-{i}"))
                    .spawn(move || {
                        while let Ok((op, value)) = rx.recv() {
                            dispatch_event(&sink, op, &value);
                        }
                    })
                    .expect("failed to spawn dispatch worker")
            })
            .collect();
        Self { tx, workers }
    }

    /// Stops accepting work and waits until every queued event has
    /// been dispatched.
    fn rundown(self) {
        drop(self.tx);
        for worker in self.workers {
            if worker.join().is_err() {
                warn!("dispatch worker panicked during rundown");
            }
        }
    }
}

fn dispatch_event(sink: &EventSink, op: Operation, value: &Json) {
    let empty = value.is_null() || value.as_object().is_some_and(|o| o.is_empty());
    if !empty {
        sink(op, value);
    }
}

/// Reconstructs the failing call's input for MAX_ROWS / DB_ERROR
/// payloads, attaching the error text under `exception`.
fn input_document(query: &SyncRowQuery, error: Option<&DbSyncError>) -> Json {
    let mut doc = json!({
        "table": query.table(),
        "data": query.rows(),
    });
    if let Some(err) = error {
        doc["exception"] = json!(err.to_string());
    }
    doc
}
