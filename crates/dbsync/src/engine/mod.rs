//! The SQLite-backed delta engine.
//!
//! One [`DbEngine`] owns one connection. It is not synchronized itself;
//! [`crate::DbSync`] wraps it in the engine-level locking described in
//! the crate docs.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use itertools::Itertools;
use log::{debug, warn};
use rusqlite::params_from_iter;
use serde_json::Value as Json;
use vigil_schema::{ColumnDef, Row, SchemaCache, TableSchema, CHECKSUM_COLUMN, STATUS_COLUMN};
use vigil_sqlite::{Connection, DbError, Value};

use crate::error::DbSyncError;
use crate::event::Operation;
use crate::query::{DeleteQuery, SelectQuery, TableRelationship};
use crate::Result;

mod delta;

/// Staging tables for snapshot comparison get this suffix.
const STAGING_SUFFIX: &str = "_TEMP";

const DB_VERSION_KEY: &str = "db_version";

/// What to do with pre-existing database files at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbManagement {
    /// Recreate the database from the schema string on every open.
    Volatile,
    /// Keep existing data; replay upgrade statements when the stored
    /// version is behind.
    Persistent,
}

struct MaxRows {
    max: i64,
    current: i64,
}

pub(crate) type Events = Vec<(Operation, Json)>;

pub(crate) struct DbEngine {
    conn: Connection,
    schemas: SchemaCache,
    max_rows: HashMap<String, MaxRows>,
}

impl DbEngine {
    pub fn new(
        path: Option<&Path>,
        ddl: &str,
        management: DbManagement,
        upgrades: &[String],
    ) -> Result<Self> {
        let conn = match (path, management) {
            (None, _) => {
                let conn = vigil_sqlite::open_memory()?;
                conn.execute_batch(ddl).map_err(DbError::from)?;
                conn
            }
            (Some(path), DbManagement::Volatile) => {
                remove_database_files(path);
                let conn = vigil_sqlite::open_file(path)?;
                conn.execute_batch(ddl).map_err(DbError::from)?;
                conn
            }
            (Some(path), DbManagement::Persistent) => {
                let conn = vigil_sqlite::open_file(path)?;
                bootstrap_persistent(&conn, ddl, upgrades)?;
                conn
            }
        };
        Ok(Self {
            conn,
            schemas: SchemaCache::new(),
            max_rows: HashMap::new(),
        })
    }

    fn schema(&self, table: &str) -> Result<Arc<TableSchema>> {
        Ok(self.schemas.get_or_load(&self.conn, table)?)
    }

    /// Schema of a delta-managed table, adding the stored checksum
    /// column the first time the engine touches the table. Managed
    /// tables must declare a primary key — it is the row identity the
    /// whole delta machinery compares on.
    fn managed_schema(&mut self, table: &str) -> Result<Arc<TableSchema>> {
        let schema = self.schema(table)?;
        if schema.primary_keys().is_empty() {
            return Err(DbSyncError::InvalidParameters(format!(
                "table `{table}` has no primary key"
            )));
        }
        if schema.has_column(CHECKSUM_COLUMN) {
            return Ok(schema);
        }
        self.conn
            .execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {CHECKSUM_COLUMN} TEXT;"))
            .map_err(DbError::from)?;
        self.schemas.invalidate(table);
        self.schema(table)
    }

    // ---- max rows -------------------------------------------------------

    pub fn set_max_rows(&mut self, table: &str, limit: i64) -> Result<()> {
        if limit <= 0 {
            self.max_rows.remove(table);
            return Ok(());
        }
        let _ = self.schema(table)?;
        let current = count_rows(&self.conn, table)?;
        self.max_rows.insert(table.to_owned(), MaxRows { max: limit, current });
        Ok(())
    }

    fn has_capacity(&self, table: &str, additional: i64) -> bool {
        self.max_rows
            .get(table)
            .map_or(true, |m| m.current + additional <= m.max)
    }

    fn note_inserted(&mut self, table: &str, n: i64) {
        if let Some(m) = self.max_rows.get_mut(table) {
            m.current += n;
        }
    }

    fn note_deleted(&mut self, table: &str, n: i64) {
        if let Some(m) = self.max_rows.get_mut(table) {
            m.current = (m.current - n).max(0);
        }
    }

    // ---- bulk insert ----------------------------------------------------

    pub fn bulk_insert(&mut self, table: &str, rows: &[Json]) -> Result<()> {
        let schema = self.managed_schema(table)?;
        if !self.has_capacity(table, rows.len() as i64) {
            return Err(DbSyncError::MaxRows { table: table.to_owned() });
        }

        let mut decoded = Vec::with_capacity(rows.len());
        for input in rows {
            let mut row = Row::from_json(&schema, input)?;
            row.remove(CHECKSUM_COLUMN);
            if !row.has_valid_pk(&schema) {
                return Err(DbSyncError::InvalidParameters(
                    "row is missing primary key values".into(),
                ));
            }
            let digest = vigil_schema::row_checksum(&schema, &row, &[]);
            row.set(CHECKSUM_COLUMN, Value::Text(digest));
            decoded.push(row);
        }

        let tx = self.conn.transaction().map_err(DbError::from)?;
        for row in &decoded {
            insert_row(&tx, table, &schema, row, None)?;
        }
        tx.commit().map_err(DbError::from)?;
        self.note_inserted(table, decoded.len() as i64);
        Ok(())
    }

    // ---- select / delete ------------------------------------------------

    pub fn select_data(&self, query: &SelectQuery, out: &mut Vec<Json>) -> Result<()> {
        let schema = self.schema(query.table())?;

        let all: Vec<&ColumnDef> = schema.field_columns().collect();
        let fields: Vec<&ColumnDef> = if query.columns().is_empty()
            || query.columns().iter().any(|c| c == "*")
        {
            all
        } else {
            query
                .columns()
                .iter()
                .map(|name| {
                    schema.column(name).ok_or_else(|| {
                        DbSyncError::InvalidParameters(format!(
                            "unknown column `{name}` in table `{}`",
                            query.table()
                        ))
                    })
                })
                .collect::<Result<_>>()?
        };

        let mut sql = String::from("SELECT ");
        if query.is_distinct() {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&fields.iter().map(|c| c.name.as_str()).join(", "));
        sql.push_str(" FROM ");
        sql.push_str(query.table());
        push_filter(&mut sql, query.filter());
        if !query.order_by().is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(query.order_by());
        }
        if let Some(limit) = query.limit() {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        for row in query_rows(&self.conn, &sql, &fields)? {
            out.push(row.to_json(&schema));
        }
        Ok(())
    }

    pub fn delete_rows(&mut self, query: &DeleteQuery) -> Result<()> {
        let table = query.table();
        let schema = self.schema(table)?;
        let removed;

        if !query.rows().is_empty() {
            let mut n = 0usize;
            let tx = self.conn.transaction().map_err(DbError::from)?;
            for input in query.rows() {
                let row = Row::from_json(&schema, input)?;
                if !row.has_valid_pk(&schema) {
                    return Err(DbSyncError::InvalidParameters(
                        "row is missing primary key values".into(),
                    ));
                }
                n += delete_row(&tx, table, &schema, &row.pk_values(&schema))?;
            }
            tx.commit().map_err(DbError::from)?;
            removed = n;
        } else if !query.filter().is_empty() {
            let mut sql = format!("DELETE FROM {table}");
            push_filter(&mut sql, query.filter());
            removed = self.conn.execute(&sql, []).map_err(DbError::from)?;
        } else {
            return Err(DbSyncError::InvalidParameters(
                "delete query carries neither rows nor a filter".into(),
            ));
        }

        self.note_deleted(table, removed as i64);
        Ok(())
    }

    // ---- relationships --------------------------------------------------

    pub fn add_table_relationship(&self, rel: &TableRelationship) -> Result<()> {
        let base = rel.base_table();
        let _ = self.schema(base)?;
        if rel.children().is_empty() {
            return Err(DbSyncError::InvalidParameters(
                "relationship spec has no child tables".into(),
            ));
        }

        let mut delete_body = String::new();
        let mut update_body = String::new();
        let mut watched = BTreeSet::new();
        for child in rel.children() {
            let _ = self.schema(&child.table)?;
            if child.field_match.is_empty() {
                return Err(DbSyncError::InvalidParameters(format!(
                    "relationship to `{}` has no matching columns",
                    child.table
                )));
            }
            let preds = child
                .field_match
                .iter()
                .map(|(parent, c)| format!("{c} = OLD.{parent}"))
                .join(" AND ");
            let sets = child
                .field_match
                .iter()
                .map(|(parent, c)| format!("{c} = NEW.{parent}"))
                .join(", ");
            delete_body.push_str(&format!("DELETE FROM {} WHERE {};\n", child.table, preds));
            update_body.push_str(&format!("UPDATE {} SET {} WHERE {};\n", child.table, sets, preds));
            for (parent, _) in &child.field_match {
                watched.insert(parent.clone());
            }
        }

        let watched = watched.iter().join(", ");
        self.conn
            .execute_batch(&format!(
                "CREATE TRIGGER IF NOT EXISTS {base}_delete AFTER DELETE ON {base} BEGIN\n{delete_body}END;\n\
                 CREATE TRIGGER IF NOT EXISTS {base}_update AFTER UPDATE OF {watched} ON {base} BEGIN\n{update_body}END;"
            ))
            .map_err(DbError::from)?;
        Ok(())
    }

    // ---- transaction status sweep --------------------------------------

    /// Marks every row of every listed table as not-yet-seen, adding
    /// the status column on first use.
    pub fn initialize_status_field(&mut self, tables: &[String]) -> Result<()> {
        for table in tables {
            let schema = self.managed_schema(table)?;
            if !schema.has_column(STATUS_COLUMN) {
                self.conn
                    .execute_batch(&format!(
                        "ALTER TABLE {table} ADD COLUMN {STATUS_COLUMN} INTEGER DEFAULT 1;"
                    ))
                    .map_err(DbError::from)?;
                self.schemas.invalidate(table);
            }
            self.conn
                .execute(&format!("UPDATE {table} SET {STATUS_COLUMN} = 0"), [])
                .map_err(DbError::from)?;
        }
        Ok(())
    }

    /// Emits DELETED for every row no sync touched since
    /// [`Self::initialize_status_field`], then removes those rows.
    pub fn return_rows_marked_for_delete(
        &mut self,
        tables: &[String],
        events: &mut Events,
    ) -> Result<()> {
        for table in tables {
            let schema = self.schema(table)?;
            if !schema.has_column(STATUS_COLUMN) {
                debug!("table {table} has no status column; skipping deletion sweep");
                continue;
            }
            let fields: Vec<&ColumnDef> = schema.field_columns().collect();
            let sql = format!(
                "SELECT {} FROM {table} WHERE {STATUS_COLUMN} = 0",
                fields.iter().map(|c| c.name.as_str()).join(", ")
            );
            for row in query_rows(&self.conn, &sql, &fields)? {
                events.push((Operation::Deleted, row.to_json(&schema)));
            }
            let removed = self
                .conn
                .execute(&format!("DELETE FROM {table} WHERE {STATUS_COLUMN} = 0"), [])
                .map_err(DbError::from)?;
            self.note_deleted(table, removed as i64);
        }
        Ok(())
    }
}

// ---- bootstrap ---------------------------------------------------------

fn bootstrap_persistent(conn: &Connection, ddl: &str, upgrades: &[String]) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS metadata (key TEXT PRIMARY KEY, value TEXT);")
        .map_err(DbError::from)?;

    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [DB_VERSION_KEY],
            |r| r.get(0),
        )
        .map(Some)
        .or_else(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(DbError::from(other)),
        })?;

    let target = upgrades.len() as i64;
    match stored {
        None => {
            conn.execute_batch(ddl).map_err(DbError::from)?;
            store_version(conn, target)?;
        }
        Some(raw) => {
            let version: i64 = raw.parse().unwrap_or(0);
            if version < target {
                debug!("upgrading database from version {version} to {target}");
                for stmt in &upgrades[version as usize..] {
                    conn.execute_batch(stmt).map_err(DbError::from)?;
                }
                store_version(conn, target)?;
            }
        }
    }
    Ok(())
}

fn store_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        rusqlite::params![DB_VERSION_KEY, version.to_string()],
    )
    .map_err(DbError::from)?;
    Ok(())
}

fn remove_database_files(path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut target = path.as_os_str().to_owned();
        target.push(suffix);
        let target = Path::new(&target);
        if target.exists() {
            if let Err(err) = std::fs::remove_file(target) {
                warn!("could not remove stale database file {}: {err}", target.display());
            }
        }
    }
}

// ---- row-level helpers -------------------------------------------------

fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        .map_err(|e| DbError::from(e).into())
}

fn push_filter(sql: &mut String, filter: &str) {
    let filter = filter.trim();
    if filter.is_empty() {
        return;
    }
    if filter.len() >= 5 && filter[..5].eq_ignore_ascii_case("where") {
        sql.push(' ');
        sql.push_str(filter);
    } else {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }
}

fn pk_predicate(schema: &TableSchema) -> String {
    schema
        .primary_keys()
        .iter()
        .map(|c| format!("{} = ?", c.name))
        .join(" AND ")
}

fn query_rows(conn: &Connection, sql: &str, fields: &[&ColumnDef]) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare_cached(sql).map_err(DbError::from)?;
    let mut rows = stmt.query([]).map_err(DbError::from)?;
    let mut out = Vec::new();
    while let Some(r) = rows.next().map_err(DbError::from)? {
        out.push(Row::from_sql_row(fields, r)?);
    }
    Ok(out)
}

fn fetch_row(
    conn: &Connection,
    table: &str,
    schema: &TableSchema,
    pk: &[Value],
) -> Result<Option<Row>> {
    let fields: Vec<&ColumnDef> = schema.field_columns().collect();
    let sql = format!(
        "SELECT {} FROM {table} WHERE {}",
        fields.iter().map(|c| c.name.as_str()).join(", "),
        pk_predicate(schema)
    );
    let mut stmt = conn.prepare_cached(&sql).map_err(DbError::from)?;
    let mut rows = stmt.query(params_from_iter(pk.iter())).map_err(DbError::from)?;
    match rows.next().map_err(DbError::from)? {
        Some(r) => Ok(Some(Row::from_sql_row(&fields, r)?)),
        None => Ok(None),
    }
}

/// Inserts a row's observed non-null columns into `table`. `status`
/// additionally sets the status marker when the table carries one.
fn insert_row(
    conn: &Connection,
    table: &str,
    schema: &TableSchema,
    row: &Row,
    status: Option<i64>,
) -> Result<()> {
    let mut cols: Vec<&str> = Vec::new();
    let mut vals: Vec<&Value> = Vec::new();
    for c in schema.field_columns() {
        if let Some(v) = row.get(&c.name) {
            if !v.is_null() {
                cols.push(c.name.as_str());
                vals.push(v);
            }
        }
    }
    let status_value;
    if let Some(s) = status {
        if schema.has_column(STATUS_COLUMN) {
            status_value = Value::BigInt(s);
            cols.push(STATUS_COLUMN);
            vals.push(&status_value);
        }
    }
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        cols.join(", "),
        vec!["?"; cols.len()].join(", ")
    );
    conn.prepare_cached(&sql)
        .map_err(DbError::from)?
        .execute(params_from_iter(vals.iter()))
        .map_err(DbError::from)?;
    Ok(())
}

/// Applies `changes` (and optionally the status marker) to the row
/// identified by `pk`. A no-op when there is nothing to set.
fn update_row(
    conn: &Connection,
    table: &str,
    schema: &TableSchema,
    pk: &[Value],
    changes: &[(String, Value)],
    status: Option<i64>,
) -> Result<()> {
    let mut sets: Vec<String> = changes.iter().map(|(c, _)| format!("{c} = ?")).collect();
    let mut vals: Vec<&Value> = changes.iter().map(|(_, v)| v).collect();
    let status_value;
    if let Some(s) = status {
        if schema.has_column(STATUS_COLUMN) {
            status_value = Value::BigInt(s);
            sets.push(format!("{STATUS_COLUMN} = ?"));
            vals.push(&status_value);
        }
    }
    if sets.is_empty() {
        return Ok(());
    }
    vals.extend(pk.iter());
    let sql = format!(
        "UPDATE {table} SET {} WHERE {}",
        sets.join(", "),
        pk_predicate(schema)
    );
    conn.prepare_cached(&sql)
        .map_err(DbError::from)?
        .execute(params_from_iter(vals.iter()))
        .map_err(DbError::from)?;
    Ok(())
}

fn delete_row(conn: &Connection, table: &str, schema: &TableSchema, pk: &[Value]) -> Result<usize> {
    let sql = format!("DELETE FROM {table} WHERE {}", pk_predicate(schema));
    let n = conn
        .prepare_cached(&sql)
        .map_err(DbError::from)?
        .execute(params_from_iter(pk.iter()))
        .map_err(DbError::from)?;
    Ok(n)
}
