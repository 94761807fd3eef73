use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::column::TableSchema;
use crate::error::SchemaError;

/// Per-database cache of introspected table schemas.
///
/// Entries must be invalidated whenever the engine alters a table
/// (adding the status or checksum column). Statement-plan caching is a
/// separate concern handled by the connection's prepared-statement
/// cache.
#[derive(Default)]
pub struct SchemaCache {
    tables: Mutex<HashMap<String, Arc<TableSchema>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(&self, conn: &Connection, table: &str) -> Result<Arc<TableSchema>, SchemaError> {
        if let Some(schema) = self.tables.lock().get(table) {
            return Ok(schema.clone());
        }
        let schema = Arc::new(TableSchema::load(conn, table)?);
        self.tables.lock().insert(table.to_owned(), schema.clone());
        Ok(schema)
    }

    pub fn invalidate(&self, table: &str) {
        self.tables.lock().remove(table);
    }

    pub fn clear(&self) {
        self.tables.lock().clear();
    }
}
