use thiserror::Error;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Backend error: the numeric SQLite result code plus the human message.
///
/// `code` is the extended result code when the backend produced one, or
/// `-1` for errors raised on this side of the FFI boundary (type
/// conversion, misuse detected by rusqlite, ...).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("database error {code}: {message}")]
pub struct DbError {
    pub code: i32,
    pub message: String,
}

impl DbError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg) => Self {
                code: e.extended_code,
                message: msg.clone().unwrap_or_else(|| e.to_string()),
            },
            other => Self {
                code: -1,
                message: other.to_string(),
            },
        }
    }
}
