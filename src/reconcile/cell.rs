//! Owned, hashable scalar values extracted from DataFrame columns.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use ordered_float::OrderedFloat;
use polars::prelude::*;
use std::fmt;

/// Days between 0001-01-01 and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
const ZONED_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// A single value of a row, detached from the frame it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(OrderedFloat<f64>),
    Text(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Other(String),
}

impl Cell {
    pub fn from_any_value(value: AnyValue<'_>) -> Self {
        match value {
            AnyValue::Null => Cell::Null,
            AnyValue::Boolean(v) => Cell::Bool(v),
            AnyValue::Int32(v) => Cell::Int(v.into()),
            AnyValue::Int64(v) => Cell::Int(v),
            AnyValue::UInt32(v) => Cell::UInt(v.into()),
            AnyValue::UInt64(v) => Cell::UInt(v),
            AnyValue::Float32(v) => Cell::float(v.into()),
            AnyValue::Float64(v) => Cell::float(v),
            AnyValue::String(v) => Cell::Text(v.to_string()),
            AnyValue::StringOwned(v) => Cell::Text(v.to_string()),
            AnyValue::Date(days) => {
                NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
                    .map_or(Cell::Null, Cell::Date)
            }
            AnyValue::Datetime(v, unit, _) => {
                from_epoch(v, unit).map_or(Cell::Null, Cell::Timestamp)
            }
            other if other.dtype().is_integer() => {
                other.extract::<i64>().map_or(Cell::Null, Cell::Int)
            }
            other => Cell::Other(other.to_string()),
        }
    }

    /// NaN carries no value and is treated like a missing one.
    pub fn float(value: f64) -> Self {
        if value.is_nan() {
            Cell::Null
        } else {
            Cell::Float(OrderedFloat(value))
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::UInt(v) => Some(*v as f64),
            Cell::Float(v) => Some(v.into_inner()),
            Cell::Bool(v) => Some(f64::from(u8::from(*v))),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(*v),
            Cell::UInt(v) => i64::try_from(*v).ok(),
            Cell::Float(v) if v.fract() == 0.0 => Some(v.into_inner() as i64),
            Cell::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Value equality where integers and floats of equal magnitude match and
    /// null equals null.
    pub fn same_value(&self, other: &Cell) -> bool {
        match (self, other) {
            (
                Cell::Int(_) | Cell::UInt(_) | Cell::Float(_),
                Cell::Int(_) | Cell::UInt(_) | Cell::Float(_),
            ) => {
                match (self, other) {
                    (Cell::Int(a), Cell::Int(b)) => a == b,
                    (Cell::UInt(a), Cell::UInt(b)) => a == b,
                    _ => self.as_f64() == other.as_f64(),
                }
            }
            _ => self == other,
        }
    }

    /// The value as a UTC instant. Dates become midnight UTC, text is parsed and
    /// anything that cannot be read as a point in time becomes null.
    pub fn into_timestamp(self) -> Cell {
        match self {
            Cell::Timestamp(_) => self,
            Cell::Date(date) => Cell::Timestamp(date.and_time(NaiveTime::MIN).and_utc()),
            Cell::Text(text) => parse_timestamp(&text).map_or(Cell::Null, Cell::Timestamp),
            _ => Cell::Null,
        }
    }

    /// Renders the value as a statement literal.
    pub fn to_literal(&self) -> String {
        match self {
            Cell::Null => "NULL".to_string(),
            Cell::Bool(v) => v.to_string(),
            Cell::Int(v) => v.to_string(),
            Cell::UInt(v) => v.to_string(),
            Cell::Float(v) => v.to_string(),
            Cell::Date(date) => quote(&date.format("%Y-%m-%d").to_string()),
            Cell::Timestamp(ts) => quote(&ts.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string()),
            Cell::Text(text) | Cell::Other(text) => quote(text),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, "null"),
            Cell::Text(text) | Cell::Other(text) => write!(f, "{text}"),
            Cell::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            other => write!(f, "{}", other.to_literal()),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<DateTime<Utc>> for Cell {
    fn from(value: DateTime<Utc>) -> Self {
        Cell::Timestamp(value)
    }
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn from_epoch(value: i64, unit: TimeUnit) -> Option<DateTime<Utc>> {
    match unit {
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(value)),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value),
    }
}

fn to_epoch(ts: &DateTime<Utc>, unit: TimeUnit) -> Option<i64> {
    match unit {
        TimeUnit::Nanoseconds => ts.timestamp_nanos_opt(),
        TimeUnit::Microseconds => Some(ts.timestamp_micros()),
        TimeUnit::Milliseconds => Some(ts.timestamp_millis()),
    }
}

/// Reads RFC 3339 and the common `YYYY-MM-DD[ T]HH:MM:SS[.f][offset]` shapes.
/// Values without an offset are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ZONED_DATETIME_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(text, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ts.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
}

pub fn is_temporal(dtype: &DataType) -> bool {
    matches!(dtype, DataType::Datetime(_, _) | DataType::Date)
}

/// All values of `column` in row order.
pub fn column_cells(column: &Column) -> PolarsResult<Vec<Cell>> {
    let series = column.as_materialized_series();
    (0..series.len())
        .map(|idx| series.get(idx).map(Cell::from_any_value))
        .collect()
}

/// Builds a series of `dtype` from cells. Cells that do not fit the type become null.
pub fn cells_to_series(name: &str, cells: &[Cell], dtype: &DataType) -> PolarsResult<Series> {
    let name = PlSmallStr::from(name);
    let series = match dtype {
        DataType::Boolean => {
            let values: Vec<Option<bool>> = cells
                .iter()
                .map(|cell| match cell {
                    Cell::Bool(v) => Some(*v),
                    _ => None,
                })
                .collect();
            Series::new(name, values)
        }
        DataType::Date => {
            let values: Vec<Option<i32>> = cells
                .iter()
                .map(|cell| match cell {
                    Cell::Date(date) => Some(date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE),
                    Cell::Timestamp(ts) => {
                        Some(ts.date_naive().num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
                    }
                    _ => None,
                })
                .collect();
            Series::new(name, values).cast(dtype)?
        }
        DataType::Datetime(unit, _) => {
            let values: Vec<Option<i64>> = cells
                .iter()
                .map(|cell| match cell.clone().into_timestamp() {
                    Cell::Timestamp(ts) => to_epoch(&ts, *unit),
                    _ => None,
                })
                .collect();
            Series::new(name, values).cast(dtype)?
        }
        dtype if dtype.is_float() => {
            let values: Vec<Option<f64>> = cells.iter().map(Cell::as_f64).collect();
            Series::new(name, values).cast(dtype)?
        }
        dtype if dtype.is_integer() => {
            let values: Vec<Option<i64>> = cells.iter().map(Cell::as_i64).collect();
            Series::new(name, values).cast(dtype)?
        }
        _ => {
            let values: Vec<Option<String>> = cells
                .iter()
                .map(|cell| (!cell.is_null()).then(|| cell.to_string()))
                .collect();
            Series::new(name, values).cast(dtype)?
        }
    };
    Ok(series)
}
