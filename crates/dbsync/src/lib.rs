//! Delta/snapshot database engine.
//!
//! A [`DbSync`] instance owns one embedded database bootstrapped from a
//! `CREATE TABLE` schema string. Collectors hand it the current state
//! of a table — either a full snapshot
//! ([`DbSync::update_with_snapshot`]) or one row at a time
//! ([`DbSync::sync_row`]) — and the engine classifies every row as
//! inserted, modified or deleted against the persisted state, persists
//! the new state, and emits the classified events.
//!
//! Long-running scans use a [`Pipeline`]: a transaction over a set of
//! tables plus a bounded worker pool that fans change callbacks out so
//! the scanning thread is not blocked by slow consumers. Deletion
//! detection is deferred to [`Pipeline::get_deleted`], driven by the
//! per-row status marker.

mod engine;
mod error;
mod event;
mod pipeline;
mod query;
mod sync;

pub use engine::DbManagement;
pub use error::DbSyncError;
pub use event::Operation;
pub use pipeline::{EventSink, Pipeline, PipelineFactory, PipelineId};
pub use query::{DeleteQuery, InsertQuery, RelatedTable, SelectQuery, SyncRowQuery, TableRelationship};
pub use sync::{DbSync, TxnId};

pub type Result<T, E = DbSyncError> = std::result::Result<T, E>;
