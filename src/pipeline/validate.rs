//! Column rules for checking inndata tables before they are written.

use crate::reconcile::cell::{column_cells, Cell};
use polars::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    NotNull,
    Unique,
    StartsWith(String),
    /// Inclusive bounds.
    IntRange { min: i64, max: i64 },
    /// Inclusive bounds on the number of characters.
    StrLength { min: usize, max: usize },
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::NotNull => write!(f, "not null"),
            Rule::Unique => write!(f, "unique"),
            Rule::StartsWith(prefix) => write!(f, "starts with '{prefix}'"),
            Rule::IntRange { min, max } => write!(f, "integer in {min}..={max}"),
            Rule::StrLength { min, max } => write!(f, "length in {min}..={max}"),
        }
    }
}

/// A single failed check. `row` is `None` when the whole column is at fault.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub column: String,
    pub rule: Rule,
    pub row: Option<usize>,
    pub value: Option<String>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.row, &self.value) {
            (None, _) => write!(f, "column '{}' is missing ({})", self.column, self.rule),
            (Some(row), Some(value)) => write!(
                f,
                "row {row}: '{}' = {value} violates {}",
                self.column, self.rule
            ),
            (Some(row), None) => write!(f, "row {row}: '{}' violates {}", self.column, self.rule),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn failed_rows(&self) -> BTreeSet<usize> {
        self.violations.iter().filter_map(|v| v.row).collect()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for violation in &self.violations {
            writeln!(f, "  {violation}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<(String, Rule)>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, column: &str, rule: Rule) -> Self {
        self.rules.push((column.to_string(), rule));
        self
    }

    /// Weather station inndata: ids are unique `SN` identifiers, codes stay within
    /// their classification ranges.
    pub fn weather_stations() -> Self {
        Self::new()
            .rule("id", Rule::NotNull)
            .rule("id", Rule::Unique)
            .rule("id", Rule::StartsWith("SN".to_string()))
            .rule("name", Rule::NotNull)
            .rule("municipalityId", Rule::IntRange { min: 0, max: 9999 })
            .rule("countyId", Rule::IntRange { min: 0, max: 99 })
            .rule("masl", Rule::IntRange { min: -499, max: 9999 })
            .rule("countryCode", Rule::NotNull)
            .rule("countryCode", Rule::StrLength { min: 2, max: 2 })
    }

    pub fn observations() -> Self {
        Self::new()
            .rule("sourceId", Rule::NotNull)
            .rule("sourceId", Rule::StartsWith("SN".to_string()))
            .rule("elementId", Rule::NotNull)
            .rule("observationTime", Rule::NotNull)
            .rule("unit", Rule::NotNull)
    }

    /// Checks every rule. Null values only fail `NotNull`.
    pub fn validate(&self, df: &DataFrame) -> PolarsResult<ValidationReport> {
        let mut report = ValidationReport::default();
        let mut cache: HashMap<&str, Vec<Cell>> = HashMap::new();

        for (column, rule) in &self.rules {
            let Ok(values) = df.column(column) else {
                report.violations.push(Violation {
                    column: column.clone(),
                    rule: rule.clone(),
                    row: None,
                    value: None,
                });
                continue;
            };
            if !cache.contains_key(column.as_str()) {
                cache.insert(column.as_str(), column_cells(values)?);
            }
            let cells = &cache[column.as_str()];

            let mut seen = HashMap::new();
            for (row, cell) in cells.iter().enumerate() {
                let passes = match (rule, cell) {
                    (Rule::NotNull, cell) => !cell.is_null(),
                    (_, Cell::Null) => true,
                    (Rule::Unique, cell) => seen.insert(cell, row).is_none(),
                    (Rule::StartsWith(prefix), cell) => {
                        cell.to_string().starts_with(prefix.as_str())
                    }
                    (Rule::IntRange { min, max }, cell) => {
                        cell.as_i64().is_some_and(|v| (*min..=*max).contains(&v))
                    }
                    (Rule::StrLength { min, max }, cell) => {
                        (*min..=*max).contains(&cell.to_string().chars().count())
                    }
                };
                if !passes {
                    report.violations.push(Violation {
                        column: column.clone(),
                        rule: rule.clone(),
                        row: Some(row),
                        value: (!cell.is_null()).then(|| cell.to_literal()),
                    });
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stations() -> PolarsResult<DataFrame> {
        df!(
            "id" => [Some("SN18700"), Some("SN50540"), Some("SN18700"), None, Some("XX1")],
            "name" => ["OSLO - BLINDERN", "BERGEN - FLORIDA", "DUP", "NO ID", "IOT"],
            "municipalityId" => [Some(301i64), Some(4601), None, Some(10000), Some(1)],
            "countyId" => [Some(3i64), Some(46), None, Some(3), Some(100)],
            "masl" => [Some(94i64), Some(12), None, Some(-500), Some(1)],
            "countryCode" => ["NO", "NO", "NO", "NOR", "NO"]
        )
    }

    #[test]
    fn test_weather_station_rules() -> PolarsResult<()> {
        let report = RuleSet::weather_stations().validate(&stations()?)?;
        assert!(!report.is_valid());
        assert_eq!(report.failed_rows(), BTreeSet::from([2, 3, 4]));

        let columns: BTreeSet<&str> = report
            .violations
            .iter()
            .filter(|v| v.row == Some(3))
            .map(|v| v.column.as_str())
            .collect();
        assert_eq!(
            columns,
            BTreeSet::from(["id", "municipalityId", "masl", "countryCode"])
        );
        Ok(())
    }

    #[test]
    fn test_valid_frame_passes() -> PolarsResult<()> {
        let df = stations()?.head(Some(2));
        let report = RuleSet::weather_stations().validate(&df)?;
        assert!(report.is_valid(), "unexpected violations:\n{report}");
        Ok(())
    }

    #[test]
    fn test_missing_column_is_reported() -> PolarsResult<()> {
        let df = df!("sourceId" => ["SN18700"])?;
        let report = RuleSet::new().rule("unit", Rule::NotNull).validate(&df)?;
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].row, None);
        assert!(report.to_string().contains("column 'unit' is missing"));
        Ok(())
    }
}
