//! Snapshot refresh and single-row synchronization.
//!
//! Both algorithms classify rows by primary-key identity and the
//! stored row checksum. The refresh path stages the whole snapshot in
//! a scratch table and diffs it against the live table with join
//! queries; the single-row path compares freshly computed digests of
//! the merged and persisted row.

use itertools::Itertools;
use log::{debug, warn};
use serde_json::Value as Json;
use vigil_schema::{row_checksum, ColumnDef, Row, CHECKSUM_COLUMN};
use vigil_sqlite::{DbError, Value};

use super::{delete_row, fetch_row, insert_row, query_rows, update_row, DbEngine, Events, STAGING_SUFFIX};
use crate::error::DbSyncError;
use crate::event::Operation;
use crate::Result;

impl DbEngine {
    /// Replaces the persisted state of `table` with `rows`, emitting
    /// one classified event per divergence. Event order is all
    /// INSERTED, then all DELETED, then all MODIFIED.
    pub fn refresh_table_data(
        &mut self,
        table: &str,
        rows: &[Json],
        ignored: &[String],
        events: &mut Events,
    ) -> Result<()> {
        let schema = self.managed_schema(table)?;
        let staging = format!("{table}{STAGING_SUFFIX}");

        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {staging};"))
            .map_err(DbError::from)?;
        self.conn
            .execute_batch(&schema.staging_ddl(&staging))
            .map_err(DbError::from)?;

        let result = self.run_refresh(table, &staging, rows, ignored, events);
        if let Err(err) = self
            .conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {staging};"))
        {
            debug!("could not drop staging table {staging}: {err}");
        }
        result
    }

    fn run_refresh(
        &mut self,
        table: &str,
        staging: &str,
        rows: &[Json],
        ignored: &[String],
        events: &mut Events,
    ) -> Result<()> {
        let schema = self.schema(table)?;

        // Stage the snapshot, computing each row's digest on the fly.
        {
            let tx = self.conn.transaction().map_err(DbError::from)?;
            for input in rows {
                let mut row = Row::from_json(&schema, input)?;
                row.remove(CHECKSUM_COLUMN);
                if !row.has_valid_pk(&schema) {
                    return Err(DbSyncError::InvalidParameters(
                        "snapshot row is missing primary key values".into(),
                    ));
                }
                let digest = row_checksum(&schema, &row, ignored);
                row.set(CHECKSUM_COLUMN, Value::Text(digest));
                insert_row(&tx, staging, &schema, &row, None)?;
            }
            tx.commit().map_err(DbError::from)?;
        }

        let fields: Vec<&ColumnDef> = schema.field_columns().collect();
        let t1_fields = fields.iter().map(|c| format!("t1.{}", c.name)).join(", ");
        let pks = schema.primary_keys();
        let join = pks.iter().map(|c| format!("t1.{0} = t2.{0}", c.name)).join(" AND ");
        let pk0 = &pks[0].name;

        // Phase 1: rows present only in the snapshot.
        let sql = format!(
            "SELECT {t1_fields} FROM {staging} t1 LEFT JOIN {table} t2 ON {join} \
             WHERE t2.{pk0} IS NULL"
        );
        for row in query_rows(&self.conn, &sql, &fields)? {
            if !self.has_capacity(table, 1) {
                warn!("table {table} is at its row limit; dropping incoming row");
                events.push((Operation::MaxRows, row.to_json(&schema)));
                continue;
            }
            insert_row(&self.conn, table, &schema, &row, None)?;
            self.note_inserted(table, 1);
            events.push((Operation::Inserted, row.to_json(&schema)));
        }

        // Phase 2: rows present only in the live table.
        let sql = format!(
            "SELECT {t1_fields} FROM {table} t1 LEFT JOIN {staging} t2 ON {join} \
             WHERE t2.{pk0} IS NULL"
        );
        for row in query_rows(&self.conn, &sql, &fields)? {
            delete_row(&self.conn, table, &schema, &row.pk_values(&schema))?;
            self.note_deleted(table, 1);
            events.push((Operation::Deleted, row.to_json(&schema)));
        }

        // Phase 3: shared keys whose stored digests differ. `IS NOT`
        // so that rows persisted before the table was managed (null
        // stored checksum) compare as changed.
        let sql = format!(
            "SELECT {t1_fields} FROM {staging} t1 INNER JOIN {table} t2 ON {join} \
             WHERE t1.{CHECKSUM_COLUMN} IS NOT t2.{CHECKSUM_COLUMN}"
        );
        for staged in query_rows(&self.conn, &sql, &fields)? {
            let pk = staged.pk_values(&schema);
            let Some(mut merged) = fetch_row(&self.conn, table, &schema, &pk)? else {
                continue;
            };
            let mut changes: Vec<(String, Value)> = Vec::new();
            for col in schema.field_columns() {
                if col.is_pk() {
                    continue;
                }
                if let Some(v) = staged.get(&col.name) {
                    if !v.is_null() {
                        merged.set(col.name.clone(), v.clone());
                        changes.push((col.name.clone(), v.clone()));
                    }
                }
            }
            update_row(&self.conn, table, &schema, &pk, &changes, None)?;
            events.push((Operation::Modified, merged.to_json(&schema)));
        }

        Ok(())
    }

    /// Synchronizes one row: INSERTED when the key is new, MODIFIED
    /// when the merged row's digest differs from the persisted one,
    /// silence otherwise. Inside a transaction every touched row gets
    /// its status marker set so the end-of-transaction sweep retains
    /// it.
    pub fn sync_table_row_data(
        &mut self,
        table: &str,
        input: &Json,
        ignored: &[String],
        return_old_data: bool,
        in_transaction: bool,
        events: &mut Events,
    ) -> Result<()> {
        let schema = self.managed_schema(table)?;
        let mut row = Row::from_json(&schema, input)?;
        row.remove(CHECKSUM_COLUMN);
        if !row.has_valid_pk(&schema) {
            return Err(DbSyncError::InvalidParameters(
                "row is missing primary key values".into(),
            ));
        }
        let pk = row.pk_values(&schema);
        let status = in_transaction.then_some(1);

        let Some(prev) = fetch_row(&self.conn, table, &schema, &pk)? else {
            if !self.has_capacity(table, 1) {
                return Err(DbSyncError::MaxRows { table: table.to_owned() });
            }
            let digest = row_checksum(&schema, &row, ignored);
            row.set(CHECKSUM_COLUMN, Value::Text(digest));
            insert_row(&self.conn, table, &schema, &row, status)?;
            self.note_inserted(table, 1);
            events.push((Operation::Inserted, row.to_json(&schema)));
            return Ok(());
        };

        // Merge: persisted row overlaid by the input's explicit fields.
        let mut merged = prev.clone();
        for col in schema.field_columns() {
            if col.is_pk() || col.is_checksum() {
                continue;
            }
            if let Some(v) = row.get(&col.name) {
                merged.set(col.name.clone(), v.clone());
            }
        }

        let digest = row_checksum(&schema, &merged, ignored);
        if digest == row_checksum(&schema, &prev, ignored) {
            // Unchanged; still marks the row as seen by the transaction.
            update_row(&self.conn, table, &schema, &pk, &[], status)?;
            return Ok(());
        }

        let mut changes: Vec<(String, Value)> = Vec::new();
        for col in schema.field_columns() {
            if col.is_pk() || col.is_checksum() {
                continue;
            }
            if merged.get(&col.name) != prev.get(&col.name) {
                changes.push((
                    col.name.clone(),
                    merged.get(&col.name).cloned().unwrap_or(Value::Null),
                ));
            }
        }
        changes.push((CHECKSUM_COLUMN.to_owned(), Value::Text(digest.clone())));
        update_row(&self.conn, table, &schema, &pk, &changes, status)?;

        merged.set(CHECKSUM_COLUMN, Value::Text(digest));
        let mut payload = merged.to_json(&schema);
        if return_old_data {
            payload["old"] = prev.to_json(&schema);
        }
        events.push((Operation::Modified, payload));
        Ok(())
    }
}
