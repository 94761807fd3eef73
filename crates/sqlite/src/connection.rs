use std::path::Path;

use rusqlite::{Connection, Transaction};

use crate::error::{DbError, Result};

/// Upper bound on cached prepared statements per connection.
///
/// Statement plans are reused through `prepare_cached`; the cache
/// evicts least-recently-used entries past this bound.
pub const STMT_CACHE_CAPACITY: usize = 30;

/// Opens (creating if needed) an on-disk database.
///
/// The file is restricted to owner-rw/group-r on POSIX, WAL journaling
/// is enabled, and the statement cache is sized to
/// [`STMT_CACHE_CAPACITY`].
pub fn open_file(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(DbError::from)?;
    restrict_permissions(path);
    configure(conn)
}

/// Opens a fresh in-memory database with the same connection settings
/// as [`open_file`].
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().map_err(DbError::from)?;
    configure(conn)
}

fn configure(conn: Connection) -> Result<Connection> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = normal;",
    )
    .map_err(DbError::from)?;
    conn.set_prepared_statement_cache_capacity(STMT_CACHE_CAPACITY);
    Ok(conn)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(0o640)) {
        log::debug!("could not restrict permissions on {}: {err}", path.display());
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

/// Runs `f` inside a transaction, committing on `Ok` and rolling back
/// on `Err`. Rollback also runs if `f` panics (the transaction guard
/// rolls back on drop).
pub fn with_transaction<T>(
    conn: &mut Connection,
    f: impl FnOnce(&Transaction) -> Result<T>,
) -> Result<T> {
    let txn = conn.transaction().map_err(DbError::from)?;
    let out = f(&txn)?;
    txn.commit().map_err(DbError::from)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_execute_query() {
        let conn = open_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (a INTEGER PRIMARY KEY, b TEXT);")
            .unwrap();
        conn.execute("INSERT INTO t VALUES (1, 'x')", []).unwrap();
        let b: String = conn
            .query_row("SELECT b FROM t WHERE a = ?1", [1], |r| r.get(0))
            .unwrap();
        assert_eq!(b, "x");
    }

    #[test]
    fn bad_sql_surfaces_db_error() {
        let conn = open_memory().unwrap();
        let err = DbError::from(conn.execute_batch("NOT A STATEMENT").unwrap_err());
        assert!(err.message.to_lowercase().contains("syntax"), "{err}");
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let mut conn = open_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (a INTEGER);").unwrap();
        let res: Result<()> = with_transaction(&mut conn, |txn| {
            txn.execute("INSERT INTO t VALUES (1)", []).map_err(DbError::from)?;
            Err(DbError::new(-1, "forced"))
        });
        assert!(res.is_err());
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        {
            let conn = open_file(&path).unwrap();
            conn.execute_batch("CREATE TABLE t (a INTEGER); INSERT INTO t VALUES (7);")
                .unwrap();
        }
        let conn = open_file(&path).unwrap();
        let a: i64 = conn.query_row("SELECT a FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(a, 7);
    }
}
