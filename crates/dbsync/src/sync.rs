//! Public face of the engine.
//!
//! [`DbSync`] owns the embedded database plus the engine-level locking:
//! a reader/writer lock where selects take the shared side and every
//! mutating operation takes the exclusive side, around the engine's own
//! mutex that serializes statement execution. No user sink runs while
//! either lock is held — events are collected first and dispatched
//! after release.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value as Json};

use crate::engine::{DbEngine, DbManagement, Events};
use crate::error::DbSyncError;
use crate::event::Operation;
use crate::query::{DeleteQuery, InsertQuery, SelectQuery, SyncRowQuery, TableRelationship};
use crate::Result;

/// Handle to an open transaction. Indexes into the owning instance's
/// transaction table; meaningless under any other [`DbSync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxnId(u64);

struct TxnContext {
    tables: Vec<String>,
}

pub struct DbSync {
    engine: Mutex<DbEngine>,
    access: RwLock<()>,
    txns: Mutex<HashMap<u64, TxnContext>>,
    next_txn: AtomicU64,
}

impl DbSync {
    /// Opens (or creates) the database described by `ddl`. `path =
    /// None` keeps everything in memory. Under
    /// [`DbManagement::Persistent`], `upgrades` are replayed from the
    /// stored schema version.
    pub fn new(
        path: Option<&Path>,
        ddl: &str,
        management: DbManagement,
        upgrades: &[String],
    ) -> Result<Self> {
        Ok(Self {
            engine: Mutex::new(DbEngine::new(path, ddl, management, upgrades)?),
            access: RwLock::new(()),
            txns: Mutex::new(HashMap::new()),
            next_txn: AtomicU64::new(1),
        })
    }

    /// Caps `table` at `max_rows` rows; zero or negative disables the
    /// bound.
    pub fn set_max_rows(&self, table: &str, max_rows: i64) -> Result<()> {
        let _guard = self.access.write();
        self.engine.lock().set_max_rows(table, max_rows)
    }

    /// Bulk insert honoring the table's row bound.
    pub fn insert_data(&self, query: &InsertQuery) -> Result<()> {
        let _guard = self.access.write();
        self.engine.lock().bulk_insert(query.table(), query.rows())
    }

    /// Synchronizes each row of `query`, emitting classified events to
    /// `sink`.
    pub fn sync_row(
        &self,
        query: &SyncRowQuery,
        mut sink: impl FnMut(Operation, &Json),
    ) -> Result<()> {
        let events = self.sync_rows_internal(query, false)?;
        dispatch(&mut sink, &events);
        Ok(())
    }

    /// Diffs `snapshot` against the persisted state of `table` and
    /// replaces it, streaming classified events to `sink`. All
    /// INSERTED events precede all DELETED, which precede all
    /// MODIFIED.
    pub fn update_with_snapshot(
        &self,
        table: &str,
        snapshot: &Json,
        ignored: &[String],
        mut sink: impl FnMut(Operation, &Json),
    ) -> Result<()> {
        let rows = snapshot_rows(snapshot)?;
        let mut events = Events::new();
        {
            let _guard = self.access.write();
            self.engine
                .lock()
                .refresh_table_data(table, rows, ignored, &mut events)?;
        }
        dispatch(&mut sink, &events);
        Ok(())
    }

    /// [`Self::update_with_snapshot`] with the aggregated result form:
    /// `{"inserted": [...], "modified": [...], "deleted": [...]}`.
    pub fn update_with_snapshot_aggregate(
        &self,
        table: &str,
        snapshot: &Json,
        ignored: &[String],
    ) -> Result<Json> {
        let mut inserted = Vec::new();
        let mut modified = Vec::new();
        let mut deleted = Vec::new();
        self.update_with_snapshot(table, snapshot, ignored, |op, value| match op {
            Operation::Inserted => inserted.push(value.clone()),
            Operation::Modified => modified.push(value.clone()),
            Operation::Deleted => deleted.push(value.clone()),
            _ => {}
        })?;
        Ok(json!({
            "inserted": inserted,
            "modified": modified,
            "deleted": deleted,
        }))
    }

    /// Runs the SELECT described by `query`, invoking `sink` once per
    /// result row.
    pub fn select_rows(&self, query: &SelectQuery, mut sink: impl FnMut(&Json)) -> Result<()> {
        let mut rows = Vec::new();
        {
            let _guard = self.access.read();
            self.engine.lock().select_data(query, &mut rows)?;
        }
        for row in &rows {
            sink(row);
        }
        Ok(())
    }

    /// Deletes rows by primary key or by predicate.
    pub fn delete_rows(&self, query: &DeleteQuery) -> Result<()> {
        let _guard = self.access.write();
        self.engine.lock().delete_rows(query)
    }

    /// Installs cascading delete/update triggers from the relationship
    /// spec.
    pub fn add_table_relationship(&self, rel: &TableRelationship) -> Result<()> {
        let _guard = self.access.write();
        self.engine.lock().add_table_relationship(rel)
    }

    // ---- transactions ---------------------------------------------------

    /// Opens a transaction over `tables`: their status markers are
    /// reset so the eventual [`Self::get_deleted`] sweep can tell
    /// which rows no sync touched.
    pub fn create_txn(&self, tables: &[String]) -> Result<TxnId> {
        if tables.is_empty() {
            return Err(DbSyncError::InvalidParameters(
                "transaction needs at least one table".into(),
            ));
        }
        {
            let _guard = self.access.write();
            self.engine.lock().initialize_status_field(tables)?;
        }
        let id = self.next_txn.fetch_add(1, Ordering::Relaxed);
        self.txns.lock().insert(
            id,
            TxnContext {
                tables: tables.to_vec(),
            },
        );
        Ok(TxnId(id))
    }

    /// [`Self::sync_row`] within a transaction: touched rows are
    /// marked so the deletion sweep retains them.
    pub fn sync_txn_row(
        &self,
        txn: TxnId,
        query: &SyncRowQuery,
        mut sink: impl FnMut(Operation, &Json),
    ) -> Result<()> {
        self.check_txn_table(txn, query.table())?;
        let events = self.sync_rows_internal(query, true)?;
        dispatch(&mut sink, &events);
        Ok(())
    }

    /// Emits DELETED for every row of the transaction's tables that no
    /// sync touched since the transaction opened, then removes them.
    pub fn get_deleted(&self, txn: TxnId, mut sink: impl FnMut(Operation, &Json)) -> Result<()> {
        let tables = {
            let txns = self.txns.lock();
            let ctx = txns.get(&txn.0).ok_or(DbSyncError::InvalidTransaction)?;
            ctx.tables.clone()
        };
        let mut events = Events::new();
        {
            let _guard = self.access.write();
            self.engine
                .lock()
                .return_rows_marked_for_delete(&tables, &mut events)?;
        }
        dispatch(&mut sink, &events);
        Ok(())
    }

    /// Forgets the transaction. Rows never synced keep their cleared
    /// status marker until the next transaction resets it.
    pub fn close_txn(&self, txn: TxnId) -> Result<()> {
        self.txns
            .lock()
            .remove(&txn.0)
            .map(|_| ())
            .ok_or(DbSyncError::InvalidTransaction)
    }

    fn check_txn_table(&self, txn: TxnId, table: &str) -> Result<()> {
        let txns = self.txns.lock();
        let ctx = txns.get(&txn.0).ok_or(DbSyncError::InvalidTransaction)?;
        if !ctx.tables.iter().any(|t| t == table) {
            return Err(DbSyncError::InvalidParameters(format!(
                "table `{table}` is not part of this transaction"
            )));
        }
        Ok(())
    }

    fn sync_rows_internal(&self, query: &SyncRowQuery, in_transaction: bool) -> Result<Events> {
        let mut events = Events::new();
        let _guard = self.access.write();
        let mut engine = self.engine.lock();
        for row in query.rows() {
            engine.sync_table_row_data(
                query.table(),
                row,
                query.ignored(),
                query.wants_old_data(),
                in_transaction,
                &mut events,
            )?;
        }
        Ok(events)
    }
}

fn dispatch(sink: &mut impl FnMut(Operation, &Json), events: &Events) {
    for (op, value) in events {
        sink(*op, value);
    }
}

fn snapshot_rows(snapshot: &Json) -> Result<&[Json]> {
    match snapshot {
        Json::Array(rows) => Ok(rows),
        Json::Object(_) => Ok(std::slice::from_ref(snapshot)),
        _ => Err(DbSyncError::InvalidParameters(
            "snapshot must be a row object or an array of rows".into(),
        )),
    }
}
