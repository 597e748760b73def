//! Pre-inndata to inndata: standard code columns, observation times and validation.

use crate::config::settings::Settings;
use crate::files::locator::FileLocator;
use crate::files::storage::{directory_diff, FileStore};
use crate::pipeline::error::PipelineError;
use crate::pipeline::kildomat::utc_datetime;
use crate::pipeline::validate::{RuleSet, ValidationReport};
use crate::reconcile::cell::{cells_to_series, column_cells, Cell};
use chrono::TimeDelta;
use log::{info, warn};
use polars::prelude::*;
use regex::Regex;
use std::collections::HashMap;

pub const OBSERVATION_COLUMNS: [&str; 5] =
    ["sourceId", "elementId", "observationTime", "value", "unit"];

/// Known fixes for station rows that fail validation, applied only after a failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Corrections {
    dropped_stations: Vec<(String, String)>,
}

impl Corrections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes the station `id`; `reason` is logged when the row is dropped.
    pub fn drop_station(mut self, id: impl Into<String>, reason: impl Into<String>) -> Self {
        self.dropped_stations.push((id.into(), reason.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.dropped_stations.is_empty()
    }

    pub fn apply(&self, df: &DataFrame) -> PolarsResult<DataFrame> {
        let ids = df.column("id")?.str()?;
        let mut keep = vec![true; df.height()];
        for (id, reason) in &self.dropped_stations {
            let mut dropped = 0;
            for (row, value) in ids.into_iter().enumerate() {
                if value == Some(id.as_str()) && keep[row] {
                    keep[row] = false;
                    dropped += 1;
                }
            }
            if dropped > 0 {
                warn!("Removing weather station with id '{}' from dataset: {}", id, reason);
            }
        }
        df.filter(&BooleanChunked::from_slice(PlSmallStr::EMPTY, &keep))
    }
}

fn zero_padded(column: &Column, width: usize) -> PolarsResult<Series> {
    let padded: Vec<Option<String>> = column_cells(column)?
        .into_iter()
        .map(|cell| match cell {
            Cell::Null => None,
            cell => Some(match cell.as_i64() {
                Some(v) => format!("{v:0width$}"),
                None => format!("{:0>width$}", cell.to_string()),
            }),
        })
        .collect();
    Ok(Series::new(PlSmallStr::EMPTY, padded))
}

/// Adds `komm_nr` and `fylke_nr`, the zero-padded municipality and county codes.
pub fn transform_weather_stations(df: &DataFrame) -> PolarsResult<DataFrame> {
    let mut out = df.clone();
    for (source, target, width) in [("municipalityId", "komm_nr", 4), ("countyId", "fylke_nr", 2)] {
        let padded = zero_padded(df.column(source)?, width)?.with_name(target.into());
        out.with_column(padded)?;
    }
    Ok(out)
}

/// Parses the day/time subset of ISO 8601 durations, e.g. `PT6H`, `P1D`, `PT1H30M`.
/// Returns `None` for anything outside that subset or out of range.
pub fn parse_iso_duration(value: &str) -> Option<TimeDelta> {
    let pattern = Regex::new(
        r"^P(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)?$",
    )
    .ok()?;
    let caps = pattern.captures(value)?;
    if value == "P" || value.ends_with('T') {
        return None;
    }
    let part = |idx: usize| caps.get(idx).map_or(Some(0), |m| m.as_str().parse::<i64>().ok());
    let seconds = caps
        .get(5)
        .map_or(Ok(0.0), |m| m.as_str().parse::<f64>())
        .ok()?;
    let millis = (seconds * 1000.0).round();
    if !(0.0..=i64::MAX as f64).contains(&millis) {
        return None;
    }

    TimeDelta::try_weeks(part(1)?)?
        .checked_add(&TimeDelta::try_days(part(2)?)?)?
        .checked_add(&TimeDelta::try_hours(part(3)?)?)?
        .checked_add(&TimeDelta::try_minutes(part(4)?)?)?
        .checked_add(&TimeDelta::try_milliseconds(millis as i64)?)
}

/// Station id without the sensor suffix, `SN18700:0` becomes `SN18700`.
fn station_part(source_id: &str) -> &str {
    source_id.split(':').next().unwrap_or(source_id)
}

/// Derives `observationTime = referenceTime + timeOffset`, strips sensor suffixes from
/// `sourceId`, and keeps the inndata columns sorted by station, element and time.
pub fn transform_observations(df: &DataFrame) -> Result<DataFrame, PipelineError> {
    let source_ids: Vec<Option<String>> = df
        .column("sourceId")?
        .str()?
        .into_iter()
        .map(|id| id.map(|id| station_part(id).to_string()))
        .collect();

    let mut offsets: HashMap<String, TimeDelta> = HashMap::new();
    let reference_times = column_cells(df.column("referenceTime")?)?;
    let time_offsets = column_cells(df.column("timeOffset")?)?;
    let mut observation_times = Vec::with_capacity(df.height());
    for (reference, offset) in reference_times.into_iter().zip(time_offsets) {
        let time = match (reference.into_timestamp(), offset) {
            (Cell::Timestamp(ts), Cell::Text(offset)) => {
                let duration = match offsets.get(&offset) {
                    Some(duration) => *duration,
                    None => {
                        let duration = parse_iso_duration(&offset)
                            .ok_or_else(|| PipelineError::InvalidDuration(offset.clone()))?;
                        offsets.insert(offset.clone(), duration);
                        duration
                    }
                };
                let time = ts
                    .checked_add_signed(duration)
                    .ok_or(PipelineError::InvalidDuration(offset))?;
                Cell::Timestamp(time)
            }
            _ => Cell::Null,
        };
        observation_times.push(time);
    }

    let mut out = df.clone();
    out.with_column(Series::new("sourceId".into(), source_ids))?;
    out.with_column(cells_to_series("observationTime", &observation_times, &utc_datetime())?)?;
    out.with_column(df.column("value")?.cast(&DataType::Float64)?)?;
    let out = out
        .select(OBSERVATION_COLUMNS)?
        .sort(
            ["sourceId", "elementId", "observationTime"],
            SortMultipleOptions::default(),
        )?;
    Ok(out)
}

fn log_failures(file: &FileLocator, df: &DataFrame, report: &ValidationReport) {
    let rows: Vec<String> = report
        .failed_rows()
        .into_iter()
        .map(|row| {
            let id = df
                .column("id")
                .ok()
                .and_then(|c| c.get(row).ok())
                .map(|v| Cell::from_any_value(v).to_string())
                .unwrap_or_default();
            format!("{row} ({id})")
        })
        .collect();
    warn!(
        "Validation of {} failed for rows [{}]:\n{}",
        file,
        rows.join(", "),
        report
    );
}

/// Transforms and validates one station file. On a validation failure `corrections`
/// are applied and validation is retried once.
pub fn process_weather_station_file(
    store: &dyn FileStore,
    source: &FileLocator,
    target_dir: &FileLocator,
    corrections: &Corrections,
) -> Result<FileLocator, PipelineError> {
    info!("Processing file {}", source);
    let stations = store.read_parquet(source)?;
    let rules = RuleSet::weather_stations();

    let mut transformed = transform_weather_stations(&stations)?;
    let report = rules.validate(&transformed)?;
    if !report.is_valid() {
        log_failures(source, &transformed, &report);
        info!("Validation errors, trying to autocorrect the weather station data");
        transformed = transform_weather_stations(&corrections.apply(&stations)?)?;
        let retry = rules.validate(&transformed)?;
        if !retry.is_valid() {
            log_failures(source, &transformed, &retry);
            return Err(PipelineError::Validation {
                file: source.clone(),
                report: retry.to_string(),
            });
        }
    }

    let target = source.replace_directory(target_dir);
    store.write_parquet(&target, &mut transformed)?;
    info!("Saving file {}", target);
    Ok(target)
}

pub fn process_observation_file(
    store: &dyn FileStore,
    source: &FileLocator,
    target_dir: &FileLocator,
) -> Result<FileLocator, PipelineError> {
    info!("Processing file {}", source);
    let observations = store.read_parquet(source)?;
    let mut transformed = transform_observations(&observations)?;
    let report = RuleSet::observations().validate(&transformed)?;
    if !report.is_valid() {
        warn!("Validation of {} failed:\n{}", source, report);
        return Err(PipelineError::Validation {
            file: source.clone(),
            report: report.to_string(),
        });
    }

    let target = source.replace_directory(target_dir);
    store.write_parquet(&target, &mut transformed)?;
    info!("Saving file {}", target);
    Ok(target)
}

/// Processes the pre-inndata files that have no inndata counterpart yet.
pub fn run(
    settings: &Settings,
    store: &dyn FileStore,
    corrections: &Corrections,
) -> Result<Vec<FileLocator>, PipelineError> {
    let source_dir = &settings.pre_inndata_dir;
    let target_dir = &settings.inndata_dir;
    store.create_dir_all(target_dir)?;
    let mut written = Vec::new();

    let station_files = pending(
        store,
        source_dir,
        target_dir,
        &settings.weather_stations_file_prefix,
    )?;
    for file in station_files {
        written.push(process_weather_station_file(store, &file, target_dir, corrections)?);
    }

    let observation_files =
        pending(store, source_dir, target_dir, &settings.observations_file_prefix)?;
    for file in observation_files {
        written.push(process_observation_file(store, &file, target_dir)?);
    }
    info!("Inndata stage wrote {} files", written.len());
    Ok(written)
}

/// Like [`directory_diff`], but an object directory nothing was written to yet simply
/// has no files.
fn pending(
    store: &dyn FileStore,
    source_dir: &FileLocator,
    target_dir: &FileLocator,
    prefix: &str,
) -> Result<Vec<FileLocator>, PipelineError> {
    if source_dir.is_remote() && target_dir.is_remote() {
        let sources = store.siblings(source_dir)?;
        if sources.is_empty() || store.siblings(target_dir)?.is_empty() {
            return Ok(sources
                .into_iter()
                .filter(|file| file.file_name().starts_with(prefix))
                .collect());
        }
    }
    Ok(directory_diff(store, source_dir, target_dir, Some(prefix))?
        .into_iter()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::storage::LocalStorage;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn stations() -> PolarsResult<DataFrame> {
        df!(
            "id" => ["SN18700", "SN499999010", "SN50540"],
            "name" => [Some("OSLO - BLINDERN"), None, Some("BERGEN - FLORIDA")],
            "municipalityId" => [Some(301i64), None, Some(4601)],
            "countyId" => [Some(3i64), None, Some(46)],
            "masl" => [Some(94i64), None, Some(12)],
            "countryCode" => ["NO", "NO", "NO"]
        )
    }

    fn pre_inndata_observations() -> Result<DataFrame, Box<dyn std::error::Error>> {
        let mut df = df!(
            "elementId" => [
                "mean(air_temperature P1D)",
                "max(wind_speed P1D)",
                "mean(air_temperature P1D)"
            ],
            "value" => [-3.2, 7.5, -1.0],
            "unit" => ["degC", "m/s", "degC"],
            "timeOffset" => ["PT0H", "PT6H", "PT0H"],
            "timeResolution" => ["P1D", "P1D", "P1D"],
            "sourceId" => ["SN50540:0", "SN18700:0", "SN18700:0"]
        )?;
        let times = [
            Cell::Timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            Cell::Timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            Cell::Timestamp(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()),
        ];
        df.with_column(cells_to_series("referenceTime", &times, &utc_datetime())?)?;
        Ok(df)
    }

    #[test]
    fn test_parse_iso_duration() {
        assert_eq!(parse_iso_duration("PT6H"), Some(TimeDelta::hours(6)));
        assert_eq!(parse_iso_duration("PT0H"), Some(TimeDelta::zero()));
        assert_eq!(parse_iso_duration("P1D"), Some(TimeDelta::days(1)));
        assert_eq!(
            parse_iso_duration("P1DT1H30M15.5S"),
            Some(TimeDelta::days(1) + TimeDelta::minutes(90) + TimeDelta::milliseconds(15_500))
        );
        assert_eq!(parse_iso_duration("P1Y"), None);
        assert_eq!(parse_iso_duration("PT"), None);
        assert_eq!(parse_iso_duration("6H"), None);
    }

    #[test]
    fn test_out_of_range_durations_are_rejected() {
        assert_eq!(parse_iso_duration("P99999999999999W"), None);
        assert!(parse_iso_duration("P100000000W").is_some());
        assert_eq!(parse_iso_duration("PT99999999999999999999H"), None);
        assert_eq!(parse_iso_duration("PT1e400S"), None);
        assert_eq!(parse_iso_duration(&format!("PT{}S", "9".repeat(400))), None);
    }

    #[test]
    fn test_station_codes_are_zero_padded() -> PolarsResult<()> {
        let df = transform_weather_stations(&stations()?)?;
        let komm_nr = df.column("komm_nr")?.str()?;
        assert_eq!(komm_nr.get(0), Some("0301"));
        assert_eq!(komm_nr.get(1), None);
        assert_eq!(df.column("fylke_nr")?.str()?.get(0), Some("03"));
        assert_eq!(df.column("fylke_nr")?.str()?.get(2), Some("46"));
        Ok(())
    }

    #[test]
    fn test_transform_observations() -> Result<(), Box<dyn std::error::Error>> {
        let df = transform_observations(&pre_inndata_observations()?)?;
        let names: Vec<&str> = df.get_column_names().into_iter().map(|n| n.as_str()).collect();
        assert_eq!(names, OBSERVATION_COLUMNS);

        let ids = df.column("sourceId")?.str()?;
        assert_eq!(ids.get(0), Some("SN18700"));
        assert_eq!(ids.get(2), Some("SN50540"));
        // SN18700 sorts "max(...)" before "mean(...)"
        assert_eq!(df.column("elementId")?.str()?.get(0), Some("max(wind_speed P1D)"));
        assert_eq!(
            column_cells(df.column("observationTime")?)?[0],
            Cell::Timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap())
        );
        Ok(())
    }

    #[test]
    fn test_invalid_offset_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let mut df = pre_inndata_observations()?;
        df.with_column(Series::new("timeOffset".into(), ["PT0H", "later", "PT0H"]))?;
        assert!(matches!(
            transform_observations(&df),
            Err(PipelineError::InvalidDuration(value)) if value == "later"
        ));
        Ok(())
    }

    #[test]
    fn test_offset_past_the_calendar_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let mut df = pre_inndata_observations()?;
        for offset in ["P99999999999999W", "P100000000W"] {
            df.with_column(Series::new("timeOffset".into(), ["PT0H", offset, "PT0H"]))?;
            assert!(matches!(
                transform_observations(&df),
                Err(PipelineError::InvalidDuration(value)) if value == offset
            ));
        }
        Ok(())
    }

    #[test]
    fn test_corrections_drop_listed_stations() -> PolarsResult<()> {
        let corrections =
            Corrections::new().drop_station("SN499999010", "iot device with incomplete data");
        let df = corrections.apply(&stations()?)?;
        assert_eq!(df.height(), 2);
        assert!(Corrections::new().is_empty());
        Ok(())
    }

    #[test]
    fn test_station_file_is_corrected_then_written() -> Result<(), Box<dyn std::error::Error>> {
        let temp = TempDir::new()?;
        let source = FileLocator::local(temp.path().join("weather_stations_v1.parquet"));
        let target_dir = FileLocator::local(temp.path().join("inndata"));
        std::fs::create_dir(temp.path().join("inndata"))?;
        LocalStorage.write_parquet(&source, &mut stations()?)?;

        let failed =
            process_weather_station_file(&LocalStorage, &source, &target_dir, &Corrections::new());
        assert!(matches!(failed, Err(PipelineError::Validation { .. })));

        let corrections = Corrections::new().drop_station("SN499999010", "incomplete");
        let target =
            process_weather_station_file(&LocalStorage, &source, &target_dir, &corrections)?;
        assert_eq!(target, target_dir.join("weather_stations_v1.parquet"));
        assert_eq!(LocalStorage.read_parquet(&target)?.height(), 2);
        Ok(())
    }
}
