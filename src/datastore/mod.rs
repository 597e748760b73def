//! The downstream tabular store the load stage reconciles against.

pub mod error;
pub mod parquet_store;

use crate::datastore::error::DatastoreError;
use crate::reconcile::planner::UpdatePlanEntry;
use polars::prelude::DataFrame;

pub trait TabularDatastore {
    /// The whole table, or `None` when it has not been created yet.
    fn query(&self, table: &str) -> Result<Option<DataFrame>, DatastoreError>;

    /// Appends rows, creating the table on first insert. Returns the number of rows added.
    fn insert(&self, table: &str, rows: DataFrame) -> Result<usize, DatastoreError>;

    /// Applies update entries. Returns the number of rows updated.
    fn execute(&self, table: &str, entries: &[UpdatePlanEntry]) -> Result<usize, DatastoreError>;
}
