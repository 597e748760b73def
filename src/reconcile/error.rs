use polars::error::PolarsError;
use std::fmt;
use thiserror::Error;

/// Which of the two compared datasets an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    New,
    Old,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::New => write!(f, "new"),
            Side::Old => write!(f, "old"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Primary key must name at least one column")]
    EmptyPrimaryKey,

    #[error("Key column '{column}' is missing from the {side} dataset")]
    MissingKeyColumn { column: String, side: Side },

    #[error("Duplicate key {key} for columns [{}] in the {side} dataset", columns.join(", "))]
    DuplicateKey {
        side: Side,
        columns: Vec<String>,
        key: String,
    },

    #[error("Changed rows are missing key column '{0}'")]
    MissingPlanColumn(String),

    #[error("Failed processing DataFrame: {0}")]
    DataFrameProcessing(#[from] PolarsError),
}
