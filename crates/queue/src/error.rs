use thiserror::Error;
use vigil_sqlite::DbError;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not prepare queue directory {path}: {source}")]
    DataDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
