use sha1::{Digest, Sha1};

use crate::column::TableSchema;
use crate::row::Row;

/// Digest of a row's content: hex-encoded SHA-1 over the string forms
/// of every non-PK content column in declaration order, skipping the
/// checksum column itself, the status column, and any ignored columns.
/// Absent and null values both contribute the empty string, so a
/// null→null update cannot change the digest.
pub fn row_checksum(schema: &TableSchema, row: &Row, ignored: &[String]) -> String {
    let mut hasher = Sha1::new();
    for col in schema.field_columns() {
        if col.is_pk() || col.is_checksum() || ignored.iter().any(|i| i == &col.name) {
            continue;
        }
        if let Some(v) = row.get(&col.name) {
            hasher.update(v.render().as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}
