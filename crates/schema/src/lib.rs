//! Schema and row model for the delta engine.
//!
//! Column metadata is introspected from the live database
//! (`pragma_table_info`), cached per table, and drives both directions
//! of the JSON ⇄ typed-row conversion. The row checksum defined here is
//! the identity the delta engine compares when classifying rows as
//! modified.

mod cache;
mod checksum;
mod column;
mod error;
mod row;

pub use cache::SchemaCache;
pub use checksum::row_checksum;
pub use column::{ColumnDef, ColumnType, TableSchema};
pub use error::SchemaError;
pub use row::Row;

/// Engine-owned marker column: 0 = untouched since transaction open,
/// 1 = written by a sync inside the transaction.
pub const STATUS_COLUMN: &str = "db_status_field_dm";

/// Engine-owned stored digest of the last observed row content.
pub const CHECKSUM_COLUMN: &str = "checksum";
