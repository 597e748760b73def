//! Keyed comparison of two versions of a table.

use crate::reconcile::cell::{column_cells, is_temporal, Cell};
use crate::reconcile::error::{ReconcileError, Side};
use log::debug;
use polars::prelude::*;
use std::collections::HashMap;

/// The three-way split of `new` against `old`.
#[derive(Debug, Clone)]
pub struct RowPartition {
    /// Rows of `new` whose key is absent from `old`.
    pub added: DataFrame,
    /// Rows of `old` whose key is absent from `new`.
    pub removed: DataFrame,
    /// Rows of `new` whose key exists in `old` with at least one differing value.
    pub changed: Option<DataFrame>,
}

/// Rows of `new` that exist in `old` under the same key but differ in a shared column.
///
/// Temporal columns (on either side) are compared as UTC instants, so
/// `2020-01-01T00:00:00+01:00` and `2019-12-31T23:00:00+00:00` are equal. Returns
/// `None` when no shared key or shared value column exists, or nothing differs.
pub fn find_changed_rows(
    new: &DataFrame,
    old: &DataFrame,
    primary_key: &[&str],
) -> Result<Option<DataFrame>, ReconcileError> {
    Ok(partition_rows(new, old, primary_key)?.changed)
}

/// Splits `new` against `old` into added, removed and changed rows.
pub fn partition_rows(
    new: &DataFrame,
    old: &DataFrame,
    primary_key: &[&str],
) -> Result<RowPartition, ReconcileError> {
    if primary_key.is_empty() {
        return Err(ReconcileError::EmptyPrimaryKey);
    }
    require_columns(new, primary_key, Side::New)?;
    require_columns(old, primary_key, Side::Old)?;

    let new_keys = key_rows(new, old, primary_key, Side::New)?;
    let old_keys = key_rows(old, new, primary_key, Side::Old)?;
    let new_index = index_keys(&new_keys, primary_key, Side::New)?;
    let old_index = index_keys(&old_keys, primary_key, Side::Old)?;

    let mut added = vec![false; new.height()];
    let mut shared = Vec::new();
    for (new_row, key) in new_keys.iter().enumerate() {
        match old_index.get(key.as_slice()) {
            Some(&old_row) => shared.push((new_row, old_row)),
            None => added[new_row] = true,
        }
    }
    let removed: Vec<bool> = old_keys
        .iter()
        .map(|key| !new_index.contains_key(key.as_slice()))
        .collect();

    let changed = changed_rows(new, old, primary_key, &shared)?;
    debug!(
        "Partitioned {} new against {} old rows: {} shared, {} changed",
        new.height(),
        old.height(),
        shared.len(),
        changed.as_ref().map_or(0, DataFrame::height)
    );

    Ok(RowPartition {
        added: new.filter(&mask(&added))?,
        removed: old.filter(&mask(&removed))?,
        changed,
    })
}

fn changed_rows(
    new: &DataFrame,
    old: &DataFrame,
    primary_key: &[&str],
    shared: &[(usize, usize)],
) -> Result<Option<DataFrame>, ReconcileError> {
    let compared: Vec<&str> = new
        .get_column_names()
        .into_iter()
        .map(PlSmallStr::as_str)
        .filter(|name| !primary_key.contains(name))
        .filter(|name| old.column(name).is_ok())
        .collect();
    if shared.is_empty() || compared.is_empty() {
        return Ok(None);
    }

    let mut changed = vec![false; new.height()];
    for name in compared {
        let new_cells = comparable_cells(new, old, name)?;
        let old_cells = comparable_cells(old, new, name)?;
        for &(new_row, old_row) in shared {
            if !new_cells[new_row].same_value(&old_cells[old_row]) {
                changed[new_row] = true;
            }
        }
    }

    if changed.iter().any(|&row| row) {
        Ok(Some(new.filter(&mask(&changed))?))
    } else {
        Ok(None)
    }
}

fn require_columns(df: &DataFrame, columns: &[&str], side: Side) -> Result<(), ReconcileError> {
    match columns.iter().find(|column| df.column(column).is_err()) {
        Some(column) => Err(ReconcileError::MissingKeyColumn {
            column: column.to_string(),
            side,
        }),
        None => Ok(()),
    }
}

/// Values of `name` in `df`, as UTC instants when the column is temporal in `df` or
/// in `other`.
fn comparable_cells(
    df: &DataFrame,
    other: &DataFrame,
    name: &str,
) -> Result<Vec<Cell>, ReconcileError> {
    let column = df.column(name)?;
    let temporal = is_temporal(column.dtype())
        || other.column(name).is_ok_and(|column| is_temporal(column.dtype()));
    let cells = column_cells(column)?;
    Ok(if temporal {
        cells.into_iter().map(Cell::into_timestamp).collect()
    } else {
        cells
    })
}

fn key_rows(
    df: &DataFrame,
    other: &DataFrame,
    primary_key: &[&str],
    side: Side,
) -> Result<Vec<Vec<Cell>>, ReconcileError> {
    let columns = primary_key
        .iter()
        .map(|name| comparable_cells(df, other, name))
        .collect::<Result<Vec<_>, _>>()?;
    debug!("Extracted {} keys from {} dataset", df.height(), side);
    Ok((0..df.height())
        .map(|row| columns.iter().map(|cells| cells[row].clone()).collect())
        .collect())
}

fn index_keys<'a>(
    keys: &'a [Vec<Cell>],
    primary_key: &[&str],
    side: Side,
) -> Result<HashMap<&'a [Cell], usize>, ReconcileError> {
    let mut index = HashMap::with_capacity(keys.len());
    for (row, key) in keys.iter().enumerate() {
        if index.insert(key.as_slice(), row).is_some() {
            return Err(ReconcileError::DuplicateKey {
                side,
                columns: primary_key.iter().map(|c| c.to_string()).collect(),
                key: format_key(key),
            });
        }
    }
    Ok(index)
}

fn format_key(key: &[Cell]) -> String {
    let values: Vec<String> = key.iter().map(Cell::to_string).collect();
    format!("({})", values.join(", "))
}

fn mask(rows: &[bool]) -> BooleanChunked {
    BooleanChunked::from_slice(PlSmallStr::EMPTY, rows)
}
