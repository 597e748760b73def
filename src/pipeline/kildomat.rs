//! Kildedata to pre-inndata: raw JSON snapshots become typed parquet tables.

use crate::config::settings::Settings;
use crate::files::locator::FileLocator;
use crate::files::storage::FileStore;
use crate::pipeline::error::PipelineError;
use crate::reconcile::cell::{cells_to_series, parse_timestamp, Cell};
use log::{info, warn};
use polars::prelude::*;
use serde_json::{Map, Value};
use std::collections::HashSet;

const PARQUET_EXTENSION: &str = ".parquet";

static NULL: Value = Value::Null;

const STATION_DROPPED_COLUMNS: [&str; 8] = [
    "ontologyId",
    "externalIds",
    "wigosId",
    "geometry.@type",
    "geometry.nearest",
    "wmoId",
    "icaoCodes",
    "shipCodes",
];
const STATION_INT_COLUMNS: [&str; 3] = ["masl", "countyId", "municipalityId"];

const OBSERVATION_DROPPED_COLUMNS: [&str; 7] = [
    "timeSeriesId",
    "performanceCategory",
    "exposureCategory",
    "qualityCode",
    "level.levelType",
    "level.unit",
    "level.value",
];

/// How a flattened JSON column is typed in the output frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Int,
    Float,
    Bool,
    Text,
    Timestamp,
}

impl ColumnKind {
    /// The narrowest kind holding every non-null value.
    fn infer<'a>(values: impl Iterator<Item = &'a Value>) -> ColumnKind {
        let mut kind: Option<ColumnKind> = None;
        for value in values {
            let value_kind = match value {
                Value::Null => continue,
                Value::Bool(_) => ColumnKind::Bool,
                Value::Number(n) if n.is_i64() || n.is_u64() => ColumnKind::Int,
                Value::Number(_) => ColumnKind::Float,
                _ => return ColumnKind::Text,
            };
            kind = Some(match (kind, value_kind) {
                (None, k) => k,
                (Some(a), b) if a == b => a,
                (Some(ColumnKind::Int), ColumnKind::Float)
                | (Some(ColumnKind::Float), ColumnKind::Int) => ColumnKind::Float,
                _ => return ColumnKind::Text,
            });
        }
        kind.unwrap_or(ColumnKind::Text)
    }
}

/// Flattens nested objects into `.`-joined keys. Arrays are kept as values.
pub fn flatten_record(record: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(record, "", &mut out);
    out
}

fn flatten_into(value: &Value, prefix: &str, out: &mut Map<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                match value {
                    Value::Object(_) => flatten_into(value, &name, out),
                    other => {
                        out.insert(name, other.clone());
                    }
                }
            }
        }
        other if !prefix.is_empty() => {
            out.insert(prefix.to_string(), other.clone());
        }
        _ => {}
    }
}

/// Builds a frame from flattened records. Columns appear in first-seen order; `kinds`
/// fixes the type of named columns and the rest are inferred.
pub fn records_to_frame(
    records: &[Map<String, Value>],
    dropped: &[&str],
    kinds: &[(&str, ColumnKind)],
) -> Result<DataFrame, PipelineError> {
    let mut names: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();
    for record in records {
        for key in record.keys() {
            if !dropped.contains(&key.as_str()) && seen.insert(key.as_str()) {
                names.push(key.as_str());
            }
        }
    }

    let columns = names
        .into_iter()
        .map(|name| {
            let values: Vec<&Value> = records
                .iter()
                .map(|record| record.get(name).unwrap_or(&NULL))
                .collect();
            let kind = kinds
                .iter()
                .find(|(column, _)| *column == name)
                .map(|(_, kind)| *kind)
                .unwrap_or_else(|| ColumnKind::infer(values.iter().copied()));
            Ok(typed_series(name, &values, kind)?.into_column())
        })
        .collect::<Result<Vec<_>, PipelineError>>()?;
    Ok(DataFrame::new(columns)?)
}

fn typed_series(name: &str, values: &[&Value], kind: ColumnKind) -> Result<Series, PipelineError> {
    let name_owned = PlSmallStr::from(name);
    let series = match kind {
        ColumnKind::Int => {
            let ints: Vec<Option<i64>> = values
                .iter()
                .map(|value| match value {
                    Value::Number(n) => n.as_i64().or_else(|| {
                        n.as_f64()
                            .filter(|f| f.fract() == 0.0)
                            .map(|f| f as i64)
                    }),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                })
                .collect();
            Series::new(name_owned, ints)
        }
        ColumnKind::Float => {
            let floats: Vec<Option<f64>> = values
                .iter()
                .map(|value| match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                })
                .collect();
            Series::new(name_owned, floats)
        }
        ColumnKind::Bool => {
            let bools: Vec<Option<bool>> = values.iter().map(|value| value.as_bool()).collect();
            Series::new(name_owned, bools)
        }
        ColumnKind::Text => {
            let texts: Vec<Option<String>> = values
                .iter()
                .map(|value| match value {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                })
                .collect();
            Series::new(name_owned, texts)
        }
        ColumnKind::Timestamp => {
            let cells = values
                .iter()
                .map(|value| match value {
                    Value::Null => Ok(Cell::Null),
                    Value::String(s) => parse_timestamp(s).map(Cell::Timestamp).ok_or_else(|| {
                        PipelineError::InvalidTimestamp {
                            column: name.to_string(),
                            value: s.clone(),
                        }
                    }),
                    other => Err(PipelineError::InvalidTimestamp {
                        column: name.to_string(),
                        value: other.to_string(),
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?;
            cells_to_series(name, &cells, &utc_datetime())?
        }
    };
    Ok(series)
}

pub(crate) fn utc_datetime() -> DataType {
    DataType::Datetime(TimeUnit::Microseconds, Some("UTC".into()))
}

/// One row per weather station.
pub fn weather_stations_frame(records: &[Value]) -> Result<DataFrame, PipelineError> {
    let flat: Vec<Map<String, Value>> = records.iter().map(flatten_record).collect();
    let mut kinds: Vec<(&str, ColumnKind)> = STATION_INT_COLUMNS
        .iter()
        .map(|column| (*column, ColumnKind::Int))
        .collect();
    kinds.push(("validFrom", ColumnKind::Timestamp));
    records_to_frame(&flat, &STATION_DROPPED_COLUMNS, &kinds)
}

/// One row per element of each record's `observations` array, carrying the record's
/// `sourceId` and `referenceTime`.
pub fn observations_frame(records: &[Value]) -> Result<DataFrame, PipelineError> {
    let mut flat = Vec::new();
    for record in records {
        let Some(observations) = record.get("observations").and_then(Value::as_array) else {
            continue;
        };
        for observation in observations {
            let mut row = flatten_record(observation);
            for meta in ["sourceId", "referenceTime"] {
                row.insert(
                    meta.to_string(),
                    record.get(meta).cloned().unwrap_or(Value::Null),
                );
            }
            flat.push(row);
        }
    }
    records_to_frame(
        &flat,
        &OBSERVATION_DROPPED_COLUMNS,
        &[("referenceTime", ColumnKind::Timestamp)],
    )
}

/// The pre-inndata file a kildedata file converts to.
pub fn target_locator(source: &FileLocator, target_dir: &FileLocator) -> FileLocator {
    target_dir.join(&format!("{}{PARQUET_EXTENSION}", source.stem()))
}

/// Converts one kildedata JSON file and writes it to `target_dir`.
pub fn process_file(
    store: &dyn FileStore,
    settings: &Settings,
    source: &FileLocator,
    target_dir: &FileLocator,
) -> Result<FileLocator, PipelineError> {
    info!("Start processing {}", source);
    let records = store.read_json(source)?;
    let mut df = if source.file_name().starts_with(&settings.weather_stations_file_prefix) {
        weather_stations_frame(&records)?
    } else {
        observations_frame(&records)?
    };

    let target = target_locator(source, target_dir);
    store.write_parquet(&target, &mut df)?;
    info!("Wrote {} rows to {}", df.height(), target);
    Ok(target)
}

/// Converts every kildedata file whose stem has no pre-inndata counterpart yet.
pub fn run(settings: &Settings, store: &dyn FileStore) -> Result<Vec<FileLocator>, PipelineError> {
    let source_dir = &settings.kildedata_root_dir;
    let target_dir = &settings.pre_inndata_dir;
    store.create_dir_all(target_dir)?;

    let converted: HashSet<String> = store
        .siblings(target_dir)?
        .iter()
        .map(FileLocator::stem)
        .collect();

    let mut written = Vec::new();
    for source in store.list_files(source_dir, None)? {
        if source.extension() != ".json" {
            warn!("Skipping {}, not a JSON document", source);
            continue;
        }
        if converted.contains(&source.stem()) {
            continue;
        }
        written.push(process_file(store, settings, &source, target_dir)?);
    }
    info!("Kildomat converted {} files", written.len());
    Ok(written)
}
