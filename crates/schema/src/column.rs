use rusqlite::Connection;

use crate::error::SchemaError;
use crate::{CHECKSUM_COLUMN, STATUS_COLUMN};

/// Semantic column types recognized in table declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    Integer,
    BigInt,
    UnsignedBigInt,
    Double,
    Blob,
}

impl ColumnType {
    /// Parses a declared type. Matching is case-insensitive on the
    /// exact names the schemas use; anything else is unknown.
    pub fn parse(decl: &str) -> Option<Self> {
        match decl.trim().to_ascii_uppercase().as_str() {
            "TEXT" => Some(Self::Text),
            "INTEGER" => Some(Self::Integer),
            "BIGINT" => Some(Self::BigInt),
            "UNSIGNED BIGINT" => Some(Self::UnsignedBigInt),
            "DOUBLE" => Some(Self::Double),
            "BLOB" => Some(Self::Blob),
            _ => None,
        }
    }

    pub fn sql_name(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::UnsignedBigInt => "UNSIGNED BIGINT",
            Self::Double => "DOUBLE",
            Self::Blob => "BLOB",
        }
    }
}

/// One column of a managed table, as introspected from the database.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Declaration order (the `cid` of `pragma_table_info`); checksums
    /// walk columns in this order.
    pub cid: i32,
    pub name: String,
    pub ty: ColumnType,
    pub not_null: bool,
    /// 1-based position within the primary key, 0 if not a member.
    pub pk_index: i32,
}

impl ColumnDef {
    pub fn is_pk(&self) -> bool {
        self.pk_index > 0
    }

    pub fn is_status(&self) -> bool {
        self.name == STATUS_COLUMN
    }

    pub fn is_checksum(&self) -> bool {
        self.name == CHECKSUM_COLUMN
    }
}

/// Introspected schema of one table, columns in declaration order.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Loads column metadata for `table` from the live database.
    ///
    /// Fails with [`SchemaError::UnknownTable`] when the table does not
    /// exist and [`SchemaError::UnknownColumnType`] when a column
    /// declares a type outside the recognized set.
    pub fn load(conn: &Connection, table: &str) -> Result<Self, SchemaError> {
        let mut stmt = conn
            .prepare_cached(
                "SELECT cid, name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid",
            )
            .map_err(vigil_sqlite::DbError::from)?;

        let mut columns = Vec::new();
        let mut rows = stmt.query([table]).map_err(vigil_sqlite::DbError::from)?;
        while let Some(row) = rows.next().map_err(vigil_sqlite::DbError::from)? {
            let cid: i32 = row.get(0).map_err(vigil_sqlite::DbError::from)?;
            let name: String = row.get(1).map_err(vigil_sqlite::DbError::from)?;
            let decl: String = row.get(2).map_err(vigil_sqlite::DbError::from)?;
            let not_null: bool = row.get(3).map_err(vigil_sqlite::DbError::from)?;
            let pk_index: i32 = row.get(4).map_err(vigil_sqlite::DbError::from)?;

            let ty = ColumnType::parse(&decl).ok_or_else(|| SchemaError::UnknownColumnType {
                table: table.to_owned(),
                column: name.clone(),
                declared: decl,
            })?;
            columns.push(ColumnDef {
                cid,
                name,
                ty,
                not_null,
                pk_index,
            });
        }

        if columns.is_empty() {
            return Err(SchemaError::UnknownTable(table.to_owned()));
        }
        Ok(Self {
            name: table.to_owned(),
            columns,
        })
    }

    /// Primary-key columns in key order.
    pub fn primary_keys(&self) -> Vec<&ColumnDef> {
        let mut pks: Vec<&ColumnDef> = self.columns.iter().filter(|c| c.is_pk()).collect();
        pks.sort_by_key(|c| c.pk_index);
        pks
    }

    /// Columns that carry row content: everything except the status
    /// marker. Includes the stored checksum column when present.
    pub fn field_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| !c.is_status())
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Regenerates a CREATE TABLE statement for `target` with this
    /// table's content columns (status omitted). Used to build staging
    /// tables for snapshot comparison.
    pub fn staging_ddl(&self, target: &str) -> String {
        let mut cols = Vec::new();
        for c in self.field_columns() {
            let mut decl = format!("{} {}", c.name, c.ty.sql_name());
            if c.not_null {
                decl.push_str(" NOT NULL");
            }
            cols.push(decl);
        }
        let pk_names: Vec<&str> = self.primary_keys().iter().map(|c| c.name.as_str()).collect();
        if !pk_names.is_empty() {
            cols.push(format!("PRIMARY KEY ({})", pk_names.join(", ")));
        }
        format!("CREATE TABLE {} ({});", target, cols.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> (rusqlite::Connection, TableSchema) {
        let conn = vigil_sqlite::open_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE procs (
                pid BIGINT,
                name TEXT NOT NULL,
                rss UNSIGNED BIGINT,
                cpu DOUBLE,
                PRIMARY KEY (pid)
            );",
        )
        .unwrap();
        let schema = TableSchema::load(&conn, "procs").unwrap();
        (conn, schema)
    }

    #[test]
    fn introspects_types_and_keys() {
        let (_conn, schema) = sample();
        assert_eq!(schema.columns.len(), 4);
        assert_eq!(schema.column("pid").unwrap().ty, ColumnType::BigInt);
        assert_eq!(schema.column("rss").unwrap().ty, ColumnType::UnsignedBigInt);
        assert!(schema.column("name").unwrap().not_null);
        let pks: Vec<_> = schema.primary_keys().iter().map(|c| c.name.clone()).collect();
        assert_eq!(pks, ["pid"]);
    }

    #[test]
    fn unknown_table_is_an_error() {
        let conn = vigil_sqlite::open_memory().unwrap();
        assert!(matches!(
            TableSchema::load(&conn, "nope"),
            Err(SchemaError::UnknownTable(_))
        ));
    }

    #[test]
    fn staging_ddl_roundtrips_through_sqlite() {
        let (conn, schema) = sample();
        conn.execute_batch(&schema.staging_ddl("procs_TEMP")).unwrap();
        let staged = TableSchema::load(&conn, "procs_TEMP").unwrap();
        assert_eq!(staged.columns.len(), schema.columns.len());
        assert_eq!(staged.primary_keys().len(), 1);
    }

    #[test]
    fn composite_keys_keep_declared_key_order() {
        let conn = vigil_sqlite::open_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE addrs (iface TEXT, proto TEXT, addr TEXT, PRIMARY KEY (iface, proto, addr));",
        )
        .unwrap();
        let schema = TableSchema::load(&conn, "addrs").unwrap();
        let pks: Vec<_> = schema.primary_keys().iter().map(|c| c.name.clone()).collect();
        assert_eq!(pks, ["iface", "proto", "addr"]);
    }
}
