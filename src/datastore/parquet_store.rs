use crate::datastore::error::DatastoreError;
use crate::datastore::TabularDatastore;
use crate::files::locator::FileLocator;
use crate::files::storage::{FileStore, Storage};
use crate::reconcile::cell::{cells_to_series, column_cells, is_temporal, Cell};
use crate::reconcile::planner::UpdatePlanEntry;
use log::{debug, info};
use polars::prelude::*;
use std::collections::HashMap;

/// A datastore keeping each table as one parquet file `<root>/<table>.parquet`.
#[derive(Debug, Clone)]
pub struct ParquetDatastore {
    storage: Storage,
    root: FileLocator,
}

impl ParquetDatastore {
    pub fn new(storage: Storage, root: FileLocator) -> Self {
        Self { storage, root }
    }

    pub fn table_locator(&self, table: &str) -> FileLocator {
        self.root.join(&format!("{table}.parquet"))
    }

    fn write_table(&self, table: &str, df: &mut DataFrame) -> Result<(), DatastoreError> {
        self.storage.create_dir_all(&self.root)?;
        self.storage.write_parquet(&self.table_locator(table), df)?;
        Ok(())
    }

    fn require_table(&self, table: &str) -> Result<DataFrame, DatastoreError> {
        self.query(table)?
            .ok_or_else(|| DatastoreError::TableNotFound(table.to_string()))
    }
}

/// Reorders and casts `rows` to the schema of `existing`; columns absent from `rows`
/// are filled with nulls.
fn conform(
    table: &str,
    existing: &DataFrame,
    rows: &DataFrame,
) -> Result<DataFrame, DatastoreError> {
    let unknown: Vec<String> = rows
        .get_column_names()
        .into_iter()
        .filter(|name| existing.column(name).is_err())
        .map(|name| name.to_string())
        .collect();
    if !unknown.is_empty() {
        return Err(DatastoreError::UnknownColumns {
            table: table.to_string(),
            columns: unknown,
        });
    }

    let columns = existing
        .get_columns()
        .iter()
        .map(|column| match rows.column(column.name()) {
            Ok(values) => values.cast(column.dtype()),
            Err(_) => Ok(Column::full_null(
                column.name().clone(),
                rows.height(),
                column.dtype(),
            )),
        })
        .collect::<PolarsResult<Vec<_>>>()?;
    Ok(DataFrame::new(columns)?)
}

fn unknown_assignment(table: &str, column: &str) -> DatastoreError {
    DatastoreError::UnknownColumns {
        table: table.to_string(),
        columns: vec![column.to_string()],
    }
}

impl TabularDatastore for ParquetDatastore {
    fn query(&self, table: &str) -> Result<Option<DataFrame>, DatastoreError> {
        let locator = self.table_locator(table);
        if !self.storage.exists(&locator)? {
            return Ok(None);
        }
        Ok(Some(self.storage.read_parquet(&locator)?))
    }

    fn insert(&self, table: &str, rows: DataFrame) -> Result<usize, DatastoreError> {
        let inserted = rows.height();
        let mut df = match self.query(table)? {
            None => {
                info!("Creating table {} with {} rows", table, inserted);
                rows
            }
            Some(mut existing) => {
                existing.vstack_mut(&conform(table, &existing, &rows)?)?;
                existing
            }
        };
        df.as_single_chunk_par();
        self.write_table(table, &mut df)?;
        debug!("Inserted {} rows into {}", inserted, table);
        Ok(inserted)
    }

    fn execute(&self, table: &str, entries: &[UpdatePlanEntry]) -> Result<usize, DatastoreError> {
        let Some(first) = entries.first() else {
            return Ok(0);
        };
        let mut df = self.require_table(table)?;

        let key_names: Vec<&str> = first.key.iter().map(|(name, _)| name.as_str()).collect();
        let mut key_columns = Vec::with_capacity(key_names.len());
        for (idx, name) in key_names.iter().enumerate() {
            let column = df
                .column(name)
                .map_err(|_| unknown_assignment(table, name))?;
            // Either side being temporal compares both sides as UTC instants.
            let temporal = is_temporal(column.dtype())
                || entries.iter().any(|entry| {
                    matches!(
                        entry.key.get(idx),
                        Some((_, Cell::Timestamp(_) | Cell::Date(_)))
                    )
                });
            key_columns.push((temporal, column_cells(column)?));
        }
        let normalize = |temporal: bool, cell: Cell| {
            if temporal {
                cell.into_timestamp()
            } else {
                cell
            }
        };

        let mut rows_by_key: HashMap<Vec<Cell>, usize> = HashMap::with_capacity(df.height());
        for row in 0..df.height() {
            let key = key_columns
                .iter()
                .map(|(temporal, cells)| normalize(*temporal, cells[row].clone()))
                .collect();
            rows_by_key.insert(key, row);
        }

        let mut updated_columns: HashMap<String, Vec<Cell>> = HashMap::new();
        for entry in entries {
            let key: Vec<Cell> = key_columns
                .iter()
                .zip(&entry.key)
                .map(|((temporal, _), (_, value))| normalize(*temporal, value.clone()))
                .collect();
            let row = *rows_by_key.get(&key).ok_or_else(|| DatastoreError::RowNotFound {
                table: table.to_string(),
                predicate: entry.predicate(),
            })?;

            for (name, value) in &entry.assignments {
                if !updated_columns.contains_key(name) {
                    let column = df
                        .column(name)
                        .map_err(|_| unknown_assignment(table, name))?;
                    updated_columns.insert(name.clone(), column_cells(column)?);
                }
                if let Some(cells) = updated_columns.get_mut(name) {
                    cells[row] = value.clone();
                }
            }
        }

        for (name, cells) in &updated_columns {
            let dtype = df.column(name)?.dtype().clone();
            df.with_column(cells_to_series(name, cells, &dtype)?)?;
        }
        self.write_table(table, &mut df)?;
        info!("Updated {} rows in {}", entries.len(), table);
        Ok(entries.len())
    }
}
