use crate::files::locator::{FileLocator, LocatorForm};
use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Expected a {expected} but got '{locator}'")]
    WrongForm {
        expected: LocatorForm,
        locator: FileLocator,
    },

    #[error("Directories must use the same addressing scheme, got '{source_dir}' and '{target_dir}'")]
    MixedForms {
        source_dir: FileLocator,
        target_dir: FileLocator,
    },

    #[error("'{0}' is not a directory")]
    NotADirectory(PathBuf),

    #[error("'{0}' is not a bucket directory. It must start with `gs://` and end with `/`")]
    InvalidBucketDirectory(String),

    #[error("Bucket directory '{0}' does not exist")]
    DirectoryNotFound(String),

    #[error("File '{0}' not found")]
    NotFound(FileLocator),

    #[error("Failed to list directory '{0}'")]
    ListDir(PathBuf, #[source] std::io::Error),

    #[error("Failed to read '{0}'")]
    Read(FileLocator, #[source] std::io::Error),

    #[error("Failed to write '{0}'")]
    Write(FileLocator, #[source] std::io::Error),

    #[error("Failed to create directory '{0}'")]
    CreateDir(FileLocator, #[source] std::io::Error),

    #[error("Failed to decode JSON document '{0}'")]
    JsonDecode(FileLocator, #[source] serde_json::Error),

    #[error("Failed to encode JSON document '{0}'")]
    JsonEncode(FileLocator, #[source] serde_json::Error),

    #[error("Failed to read parquet file '{0}'")]
    ParquetRead(FileLocator, #[source] PolarsError),

    #[error("Failed to write parquet file '{0}'")]
    ParquetWrite(FileLocator, #[source] PolarsError),

    #[error("'{0}' has no `_v<N>` version suffix")]
    MissingVersion(FileLocator),

    #[error("Invalid file name pattern")]
    Pattern(#[from] regex::Error),

    #[error("Failed to connect to bucket '{0}'")]
    BucketConnect(String, #[source] object_store::Error),

    #[error("Object store request for '{0}' failed")]
    ObjectStore(String, #[source] object_store::Error),

    #[error("Failed to start the object store runtime")]
    Runtime(#[source] std::io::Error),

    #[error("Object store request for '{0}' was aborted")]
    RequestAborted(String),

    #[error("Object store lock was poisoned")]
    LockPoisoned,
}
