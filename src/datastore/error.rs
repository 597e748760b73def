use crate::files::error::StorageError;
use polars::error::PolarsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("Table '{0}' does not exist")]
    TableNotFound(String),

    #[error("Columns [{}] are not part of table '{table}'", columns.join(", "))]
    UnknownColumns { table: String, columns: Vec<String> },

    #[error("No row in table '{table}' matches {predicate}")]
    RowNotFound { table: String, predicate: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed processing DataFrame: {0}")]
    DataFrameProcessing(#[from] PolarsError),
}
