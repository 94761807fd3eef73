use thiserror::Error;
use vigil_sqlite::DbError;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("table `{0}` does not exist")]
    UnknownTable(String),

    #[error("column `{table}.{column}` declares unsupported type `{declared}`")]
    UnknownColumnType {
        table: String,
        column: String,
        declared: String,
    },

    #[error("column `{column}`: cannot decode {found} as {expected}")]
    Decode {
        column: String,
        expected: &'static str,
        found: String,
    },

    #[error(transparent)]
    Db(#[from] DbError),
}
