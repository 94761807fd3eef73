//! Persistence layer: one table per message kind, ids assigned by the
//! database, FIFO realized as smallest-id-first.

use std::path::Path;

use rusqlite::params;
use vigil_sqlite::{Connection, DbError};

use crate::message::MessageType;
use crate::Result;

pub(crate) struct Storage {
    conn: Connection,
}

/// Raw persisted form of one message row.
pub(crate) struct StoredMessage {
    pub module: String,
    pub module_type: String,
    pub metadata: String,
    pub message: String,
}

impl Storage {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = vigil_sqlite::open_file(path)?;
        for kind in MessageType::ALL {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    module TEXT,
                    type TEXT,
                    metadata TEXT,
                    message TEXT
                );",
                kind.table_name()
            ))
            .map_err(DbError::from)?;
        }
        Ok(Self { conn })
    }

    pub fn insert(
        &self,
        kind: MessageType,
        payload: &serde_json::Value,
        module: &str,
        module_type: &str,
        metadata: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {} (module, type, metadata, message) VALUES (?1, ?2, ?3, ?4)",
                    kind.table_name()
                ),
                params![module, module_type, metadata, payload.to_string()],
            )
            .map_err(DbError::from)?;
        Ok(())
    }

    /// Oldest `limit` rows for the kind, optionally narrowed by module
    /// fields. Filters are matched at peek time, not indexed.
    pub fn peek(
        &self,
        kind: MessageType,
        limit: usize,
        module: &str,
        module_type: &str,
    ) -> Result<Vec<StoredMessage>> {
        let (clause, params) = filter_clause(module, module_type);
        let sql = format!(
            "SELECT module, type, metadata, message FROM {}{clause} ORDER BY id ASC LIMIT {limit}",
            kind.table_name()
        );
        let mut stmt = self.conn.prepare_cached(&sql).map_err(DbError::from)?;
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter()))
            .map_err(DbError::from)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(DbError::from)? {
            out.push(StoredMessage {
                module: row.get(0).map_err(DbError::from)?,
                module_type: row.get(1).map_err(DbError::from)?,
                metadata: row.get(2).map_err(DbError::from)?,
                message: row.get(3).map_err(DbError::from)?,
            });
        }
        Ok(out)
    }

    /// Deletes up to `limit` rows in ascending id order; returns how
    /// many went away.
    pub fn remove(
        &self,
        kind: MessageType,
        limit: usize,
        module: &str,
        module_type: &str,
    ) -> Result<usize> {
        let table = kind.table_name();
        let (clause, params) = filter_clause(module, module_type);
        let sql = format!(
            "DELETE FROM {table} WHERE id IN \
             (SELECT id FROM {table}{clause} ORDER BY id ASC LIMIT {limit})"
        );
        let n = self
            .conn
            .execute(&sql, rusqlite::params_from_iter(params.iter()))
            .map_err(DbError::from)?;
        Ok(n)
    }

    pub fn count(&self, kind: MessageType, module: &str, module_type: &str) -> Result<usize> {
        let (clause, params) = filter_clause(module, module_type);
        let sql = format!("SELECT COUNT(*) FROM {}{clause}", kind.table_name());
        let n: i64 = self
            .conn
            .query_row(&sql, rusqlite::params_from_iter(params.iter()), |r| r.get(0))
            .map_err(DbError::from)?;
        Ok(n as usize)
    }

    /// Items across every kind; the figure the capacity bound applies
    /// to.
    pub fn total(&self) -> Result<usize> {
        let mut total = 0;
        for kind in MessageType::ALL {
            total += self.count(kind, "", "")?;
        }
        Ok(total)
    }
}

fn filter_clause(module: &str, module_type: &str) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    if !module.is_empty() {
        clauses.push("module = ?");
        params.push(module.to_owned());
    }
    if !module_type.is_empty() {
        clauses.push("type = ?");
        params.push(module_type.to_owned());
    }
    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), params)
    }
}
