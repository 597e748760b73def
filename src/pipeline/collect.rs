//! Collect stage: fetches Frost data into kildedata snapshots.

use crate::config::settings::Settings;
use crate::files::change::store_if_changed;
use crate::files::locator::FileLocator;
use crate::files::storage::FileStore;
use crate::frost::client::{extract_timespan, station_ids, FrostClient};
use crate::pipeline::error::PipelineError;
use chrono::{Days, NaiveDate};
use log::info;
use regex::Regex;
use serde_json::Value;

const JSON_EXTENSION: &str = ".json";

/// The station list as fetched, and the snapshot written for it if it changed.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedStations {
    pub records: Vec<Value>,
    pub written: Option<FileLocator>,
}

/// The latest end date among `<prefix>..._p<from>_p<to>` names in `directory`.
pub fn latest_collected_date(
    store: &dyn FileStore,
    directory: &FileLocator,
    prefix: &str,
) -> Result<Option<NaiveDate>, PipelineError> {
    let pattern = Regex::new(r"_p\d{4}-\d{2}-\d{2}_p(\d{4}-\d{2}-\d{2})")?;
    let latest = store
        .siblings(directory)?
        .iter()
        .map(FileLocator::file_name)
        .filter(|name| name.starts_with(prefix))
        .filter_map(|name| {
            let caps = pattern.captures(&name)?;
            NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()
        })
        .max();
    Ok(latest)
}

/// The `(start, end)` dates still to collect, or `None` when collection is up to date.
pub fn collection_window(
    latest: Option<NaiveDate>,
    collect_from: NaiveDate,
    today: NaiveDate,
) -> Option<(NaiveDate, NaiveDate)> {
    let start = match latest {
        Some(date) => date.checked_add_days(Days::new(1))?,
        None => collect_from,
    };
    (start < today).then_some((start, today))
}

pub async fn collect_weather_stations(
    settings: &Settings,
    store: &dyn FileStore,
    client: &FrostClient,
) -> Result<CollectedStations, PipelineError> {
    let records = client.weather_stations().await?;
    let lineage = settings.kildedata_root_dir.join(&format!(
        "{}{JSON_EXTENSION}",
        settings.weather_stations_file_prefix
    ));
    let written = store_if_changed(store, &records, &lineage)?;
    Ok(CollectedStations { records, written })
}

/// Fetches observations since the last collected date and writes them to
/// `<prefix>_p<first>_p<last>.json`.
pub async fn collect_observations(
    settings: &Settings,
    store: &dyn FileStore,
    client: &FrostClient,
    source_ids: &[String],
    today: NaiveDate,
) -> Result<Option<FileLocator>, PipelineError> {
    let directory = &settings.kildedata_root_dir;
    let prefix = &settings.observations_file_prefix;
    let latest = latest_collected_date(store, directory, prefix)?;
    let Some((from_date, to_date)) = collection_window(latest, settings.collect_from_date, today)
    else {
        info!("Observations are collected up to {}, nothing to fetch", today);
        return Ok(None);
    };

    info!("Collecting observations from {} to {}", from_date, to_date);
    let records = client
        .observations(source_ids)
        .from_date(from_date)
        .to_date(to_date)
        .call()
        .await?;
    if records.is_empty() {
        info!("No observations between {} and {}", from_date, to_date);
        return Ok(None);
    }

    let target = directory.join(&format!(
        "{prefix}_p{}{JSON_EXTENSION}",
        extract_timespan(&records)?
    ));
    store.write_json(&target, &records)?;
    info!("Stored {} observation records in {}", records.len(), target);
    Ok(Some(target))
}

/// Collects the station list, then observations for the configured station names.
pub async fn run(
    settings: &Settings,
    store: &dyn FileStore,
    client: &FrostClient,
    today: NaiveDate,
) -> Result<Vec<FileLocator>, PipelineError> {
    store.create_dir_all(&settings.kildedata_root_dir)?;
    let stations = collect_weather_stations(settings, store, client).await?;
    let source_ids = station_ids(&settings.weather_station_names, &stations.records)?;
    let observations = collect_observations(settings, store, client, &source_ids, today).await?;
    Ok(stations.written.into_iter().chain(observations).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::storage::BucketStorage;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn settings() -> Settings {
        Settings::builder()
            .kildedata_root_dir(FileLocator::remote("gs://kilde/frost/"))
            .pre_inndata_dir(FileLocator::remote("gs://produkt/pre-inndata/"))
            .inndata_dir(FileLocator::remote("gs://produkt/inndata/"))
            .datastore_dir(FileLocator::remote("gs://produkt/datastore/"))
            .collect_from_date(date(2024, 1, 1))
            .weather_station_names(vec!["OSLO - BLINDERN".to_string()])
            .build()
    }

    /// Answers each connection with the next body, in order.
    async fn serve(bodies: Vec<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            for body in bodies {
                let (mut socket, _) = listener.accept().await.expect("accept");
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.expect("read");
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.expect("write");
            }
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_collection_window() {
        let today = date(2024, 2, 1);
        assert_eq!(
            collection_window(None, date(2024, 1, 1), today),
            Some((date(2024, 1, 1), today))
        );
        assert_eq!(
            collection_window(Some(date(2024, 1, 15)), date(2024, 1, 1), today),
            Some((date(2024, 1, 16), today))
        );
        assert_eq!(collection_window(Some(date(2024, 1, 31)), date(2024, 1, 1), today), None);
        assert_eq!(collection_window(None, date(2024, 3, 1), today), None);
    }

    #[test]
    fn test_latest_collected_date() -> Result<(), PipelineError> {
        let store = BucketStorage::in_memory();
        let dir = FileLocator::remote("gs://kilde/frost/");
        assert_eq!(latest_collected_date(&store, &dir, "observations")?, None);

        for name in [
            "observations_p2024-01-01_p2024-01-15.json",
            "observations_p2024-01-16_p2024-01-31.json",
            "weather_stations_p2024-01-01_p2024-12-31.json",
        ] {
            store.write_json(&dir.join(name), &[])?;
        }
        assert_eq!(
            latest_collected_date(&store, &dir, "observations")?,
            Some(date(2024, 1, 31))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_run_stores_stations_and_observations() -> Result<(), PipelineError> {
        let stations = json!({"data": [{"id": "SN18700", "name": "OSLO - BLINDERN"}]}).to_string();
        let observations = json!({"data": [
            {
                "sourceId": "SN18700:0",
                "referenceTime": "2024-01-01T00:00:00.000Z",
                "observations": []
            },
            {
                "sourceId": "SN18700:0",
                "referenceTime": "2024-01-31T00:00:00.000Z",
                "observations": []
            }
        ]})
        .to_string();
        let base_url = serve(vec![stations.clone(), observations, stations]).await;
        let client = FrostClient::new("client").with_base_url(base_url);
        let store = BucketStorage::in_memory();
        let settings = settings();

        let written = run(&settings, &store, &client, date(2024, 2, 1)).await?;
        assert_eq!(
            written,
            vec![
                FileLocator::remote("gs://kilde/frost/weather_stations_v1.json"),
                FileLocator::remote("gs://kilde/frost/observations_p2024-01-01_p2024-01-31.json"),
            ]
        );

        // unchanged stations and an up to date window store nothing
        let again = run(&settings, &store, &client, date(2024, 2, 1)).await?;
        assert!(again.is_empty());
        Ok(())
    }
}
