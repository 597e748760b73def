//! Load stage: reconciles inndata tables into the datastore.

use crate::config::settings::Settings;
use crate::datastore::parquet_store::ParquetDatastore;
use crate::datastore::TabularDatastore;
use crate::files::locator::FileLocator;
use crate::files::storage::{FileStore, Storage};
use crate::files::versions::latest_by_version;
use crate::pipeline::error::PipelineError;
use crate::reconcile::planner::plan_updates;
use crate::reconcile::rows::partition_rows;
use log::info;
use polars::prelude::DataFrame;
use std::ops::AddAssign;

pub const WEATHER_STATIONS_TABLE: &str = "weather_stations";
pub const WEATHER_STATIONS_KEY: [&str; 1] = ["id"];
pub const OBSERVATIONS_TABLE: &str = "observations";
pub const OBSERVATIONS_KEY: [&str; 3] = ["sourceId", "elementId", "observationTime"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub inserted: usize,
    pub updated: usize,
}

impl AddAssign for LoadSummary {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

/// Inserts rows of `df` with new keys and updates rows whose values changed.
///
/// Rows only present in the datastore are left in place.
pub fn load_table(
    datastore: &dyn TabularDatastore,
    table: &str,
    df: &DataFrame,
    key: &[&str],
) -> Result<LoadSummary, PipelineError> {
    let Some(existing) = datastore.query(table)? else {
        info!("Creating table {} with {} rows", table, df.height());
        let inserted = datastore.insert(table, df.clone())?;
        return Ok(LoadSummary {
            inserted,
            updated: 0,
        });
    };

    let partition = partition_rows(df, &existing, key)?;
    let mut summary = LoadSummary::default();
    if partition.added.height() > 0 {
        summary.inserted = datastore.insert(table, partition.added)?;
    }
    if partition.removed.height() > 0 {
        info!(
            "{} rows of {} are no longer delivered, keeping them",
            partition.removed.height(),
            table
        );
    }
    if let Some(changed) = partition.changed {
        let entries = plan_updates(&changed, key)?;
        summary.updated = datastore.execute(table, &entries)?;
    }
    info!(
        "Loaded {}: {} inserted, {} updated",
        table, summary.inserted, summary.updated
    );
    Ok(summary)
}

/// Loads the latest station file and every observations file from inndata.
pub fn run(settings: &Settings, storage: &Storage) -> Result<LoadSummary, PipelineError> {
    let datastore = ParquetDatastore::new(storage.clone(), settings.datastore_dir.clone());
    let mut summary = LoadSummary::default();

    let lineage = settings
        .inndata_dir
        .join(&format!("{}.parquet", settings.weather_stations_file_prefix));
    match latest_by_version(storage, &lineage)? {
        Some(file) => {
            info!("Loading weather stations from {}", file);
            let stations = storage.read_parquet(&file)?;
            summary += load_table(
                &datastore,
                WEATHER_STATIONS_TABLE,
                &stations,
                &WEATHER_STATIONS_KEY,
            )?;
        }
        None => info!("No weather station file in {}", settings.inndata_dir),
    }

    let observation_files: Vec<FileLocator> = storage
        .siblings(&settings.inndata_dir)?
        .into_iter()
        .filter(|file| {
            file.file_name().starts_with(&settings.observations_file_prefix)
                && file.extension() == ".parquet"
        })
        .collect();
    for file in observation_files {
        info!("Loading observations from {}", file);
        let observations = storage.read_parquet(&file)?;
        summary += load_table(&datastore, OBSERVATIONS_TABLE, &observations, &OBSERVATIONS_KEY)?;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::storage::BucketStorage;
    use polars::prelude::*;

    fn datastore() -> ParquetDatastore {
        ParquetDatastore::new(
            Storage::new(BucketStorage::in_memory()),
            FileLocator::remote("gs://produkt/datastore/"),
        )
    }

    #[test]
    fn test_first_load_creates_table() -> Result<(), Box<dyn std::error::Error>> {
        let store = datastore();
        let df = df!("id" => ["SN1", "SN2"], "name" => ["A", "B"])?;
        let summary = load_table(&store, "weather_stations", &df, &["id"])?;
        assert_eq!(summary, LoadSummary { inserted: 2, updated: 0 });
        assert_eq!(store.query("weather_stations")?.map(|df| df.height()), Some(2));
        Ok(())
    }

    #[test]
    fn test_reload_inserts_and_updates() -> Result<(), Box<dyn std::error::Error>> {
        let store = datastore();
        let first = df!("id" => ["SN1", "SN2"], "name" => ["A", "B"])?;
        load_table(&store, "weather_stations", &first, &["id"])?;

        let second = df!("id" => ["SN2", "SN3"], "name" => ["B2", "C"])?;
        let summary = load_table(&store, "weather_stations", &second, &["id"])?;
        assert_eq!(summary, LoadSummary { inserted: 1, updated: 1 });

        let table = store
            .query("weather_stations")?
            .ok_or("table missing")?
            .sort(["id"], SortMultipleOptions::default())?;
        let names: Vec<Option<&str>> = table.column("name")?.str()?.into_iter().collect();
        assert_eq!(names, vec![Some("A"), Some("B2"), Some("C")]);

        let unchanged = load_table(&store, "weather_stations", &second, &["id"])?;
        assert_eq!(unchanged, LoadSummary::default());
        Ok(())
    }

    #[test]
    fn test_run_without_inndata_files_loads_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let storage = Storage::new(BucketStorage::in_memory());
        let settings = Settings::builder()
            .kildedata_root_dir(FileLocator::remote("gs://kilde/frost/"))
            .pre_inndata_dir(FileLocator::remote("gs://produkt/pre-inndata/"))
            .inndata_dir(FileLocator::remote("gs://produkt/inndata/"))
            .datastore_dir(FileLocator::remote("gs://produkt/datastore/"))
            .collect_from_date(chrono::NaiveDate::from_ymd_opt(2024, 1, 1).ok_or("date")?)
            .build();
        assert_eq!(run(&settings, &storage)?, LoadSummary::default());
        Ok(())
    }
}
