use crate::config::error::ConfigError;
use crate::datastore::error::DatastoreError;
use crate::files::error::StorageError;
use crate::frost::error::FrostError;
use crate::pipeline::error::PipelineError;
use crate::reconcile::error::ReconcileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetstatError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Datastore(#[from] DatastoreError),

    #[error(transparent)]
    Frost(#[from] FrostError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
