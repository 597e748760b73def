mod config;
mod datastore;
mod error;
mod files;
mod frost;
mod pipeline;
mod reconcile;

pub use error::MetstatError;

pub use config::settings::*;
pub use files::change::*;
pub use files::locator::*;
pub use files::name::VersionedName;
pub use files::storage::*;
pub use files::versions::*;

pub use reconcile::cell::Cell;
pub use reconcile::planner::*;
pub use reconcile::rows::*;

pub use datastore::parquet_store::ParquetDatastore;
pub use datastore::TabularDatastore;

pub use frost::client::*;

pub use pipeline::collect;
pub use pipeline::inndata;
pub use pipeline::kildomat;
pub use pipeline::load;
pub use pipeline::run_all;
pub use pipeline::validate;
pub use pipeline::inndata::Corrections;
pub use pipeline::load::LoadSummary;

pub use config::error::ConfigError;
pub use datastore::error::DatastoreError;
pub use files::error::StorageError;
pub use frost::error::FrostError;
pub use pipeline::error::PipelineError;
pub use reconcile::error::{ReconcileError, Side};
