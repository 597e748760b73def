use crate::reconcile::cell::{column_cells, Cell};
use crate::reconcile::error::ReconcileError;
use polars::prelude::*;

/// One row update: which row (key values) and what to set.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePlanEntry {
    pub key: Vec<(String, Cell)>,
    pub assignments: Vec<(String, Cell)>,
}

impl UpdatePlanEntry {
    /// `k1 = v1 AND k2 = v2`, with `IS NULL` for missing key values.
    pub fn predicate(&self) -> String {
        self.key
            .iter()
            .map(|(column, value)| match value {
                Cell::Null => format!("{column} IS NULL"),
                value => format!("{column} = {}", value.to_literal()),
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    pub fn to_statement(&self, table: &str) -> String {
        let assignments = self
            .assignments
            .iter()
            .map(|(column, value)| format!("{column} = {}", value.to_literal()))
            .collect::<Vec<_>>()
            .join(", ");
        format!("UPDATE {table} SET {assignments} WHERE {}", self.predicate())
    }
}

/// One entry per row of `changed_rows`, assigning every non-key column.
pub fn plan_updates(
    changed_rows: &DataFrame,
    key_columns: &[&str],
) -> Result<Vec<UpdatePlanEntry>, ReconcileError> {
    if key_columns.is_empty() {
        return Err(ReconcileError::EmptyPrimaryKey);
    }
    if let Some(missing) = key_columns
        .iter()
        .find(|column| changed_rows.column(column).is_err())
    {
        return Err(ReconcileError::MissingPlanColumn(missing.to_string()));
    }

    let mut key = Vec::with_capacity(key_columns.len());
    let mut assignments = Vec::new();
    for column in changed_rows.get_columns() {
        let name = column.name().to_string();
        let cells = column_cells(column)?;
        if key_columns.contains(&name.as_str()) {
            key.push((name, cells));
        } else {
            assignments.push((name, cells));
        }
    }
    // Key order follows `key_columns`, not the frame.
    key.sort_by_key(|(name, _)| key_columns.iter().position(|column| *column == name.as_str()));

    let row_values = |columns: &[(String, Vec<Cell>)], row: usize| {
        columns
            .iter()
            .map(|(name, cells)| (name.clone(), cells[row].clone()))
            .collect::<Vec<_>>()
    };
    Ok((0..changed_rows.height())
        .map(|row| UpdatePlanEntry {
            key: row_values(&key, row),
            assignments: row_values(&assignments, row),
        })
        .collect())
}
