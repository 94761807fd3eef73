//! Thin backend layer over [`rusqlite`].
//!
//! Everything above this crate talks to the database in terms of
//! [`Value`] (the typed column variant) and [`DbError`] (the backend
//! error carrying SQLite's numeric result code). Connection setup is
//! centralized here so that journal mode, file permissions and the
//! prepared-statement cache bound are the same for every database the
//! agent opens.

mod connection;
mod error;
mod value;

pub use connection::{open_file, open_memory, with_transaction, STMT_CACHE_CAPACITY};
pub use error::{DbError, Result};
pub use value::Value;

pub use rusqlite::{Connection, Transaction};
