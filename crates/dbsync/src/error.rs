use thiserror::Error;
use vigil_schema::SchemaError;
use vigil_sqlite::DbError;

#[derive(Debug, Error)]
pub enum DbSyncError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("max rows limit reached for table `{table}`")]
    MaxRows { table: String },

    #[error("invalid handle")]
    InvalidHandle,

    #[error("invalid transaction")]
    InvalidTransaction,

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
