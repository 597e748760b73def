use crate::datastore::error::DatastoreError;
use crate::files::error::StorageError;
use crate::files::locator::FileLocator;
use crate::frost::error::FrostError;
use crate::reconcile::error::ReconcileError;
use polars::error::PolarsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Frost(#[from] FrostError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Datastore(#[from] DatastoreError),

    #[error("Failed processing DataFrame: {0}")]
    DataFrameProcessing(#[from] PolarsError),

    #[error("Required column '{column}' not found in '{file}'")]
    MissingColumn { file: FileLocator, column: String },

    #[error("Column '{column}' holds '{value}', which is not a timestamp")]
    InvalidTimestamp { column: String, value: String },

    #[error("'{0}' is not a supported ISO 8601 duration")]
    InvalidDuration(String),

    #[error("'{file}' failed validation:\n{report}")]
    Validation { file: FileLocator, report: String },

    #[error("Invalid file name pattern")]
    Pattern(#[from] regex::Error),
}
