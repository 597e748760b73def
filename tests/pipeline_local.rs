use chrono::NaiveDate;
use metstat::{
    inndata, kildomat, load, Corrections, FileLocator, FileStore, LoadSummary, LocalStorage,
    ParquetDatastore, Settings, Storage, TabularDatastore,
};
use serde_json::{json, Value};
use tempfile::TempDir;

fn settings(root: &TempDir) -> Settings {
    let dir = |name: &str| FileLocator::local(root.path().join(name));
    Settings::builder()
        .environment("local_files")
        .kildedata_root_dir(dir("kildedata"))
        .pre_inndata_dir(dir("pre-inndata"))
        .inndata_dir(dir("inndata"))
        .datastore_dir(dir("datastore"))
        .collect_from_date(NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"))
        .build()
}

fn stations(blindern_name: &str) -> Vec<Value> {
    vec![
        json!({
            "@type": "SensorSystem", "id": "SN18700", "name": blindern_name,
            "countryCode": "NO", "masl": 94, "countyId": 3, "municipalityId": 301,
            "validFrom": "1931-01-01T00:00:00.000Z", "wmoId": 1492
        }),
        json!({
            "@type": "SensorSystem", "id": "SN50540", "name": "BERGEN - FLORIDA",
            "countryCode": "NO", "masl": 12, "countyId": 46, "municipalityId": 4601,
            "validFrom": "1949-11-01T00:00:00.000Z"
        }),
        json!({
            "@type": "SensorSystem", "id": "SN499999010", "countryCode": "NO",
            "validFrom": "2020-01-01T00:00:00.000Z"
        }),
    ]
}

fn observations() -> Vec<Value> {
    let day = |source: &str, date: &str, temperature: f64| {
        json!({
            "sourceId": source,
            "referenceTime": format!("{date}T00:00:00.000Z"),
            "observations": [
                {"elementId": "mean(air_temperature P1D)", "value": temperature, "unit": "degC",
                 "timeOffset": "PT6H", "timeResolution": "P1D", "qualityCode": 0},
                {"elementId": "sum(precipitation_amount P1D)", "value": 1, "unit": "mm",
                 "timeOffset": "PT6H", "timeResolution": "P1D"}
            ]
        })
    };
    vec![
        day("SN18700:0", "2024-01-01", -3.2),
        day("SN50540:0", "2024-01-01", 4.1),
        day("SN18700:0", "2024-01-02", -5.0),
    ]
}

fn run_local(
    settings: &Settings,
    corrections: &Corrections,
) -> Result<LoadSummary, Box<dyn std::error::Error>> {
    kildomat::run(settings, &LocalStorage)?;
    inndata::run(settings, &LocalStorage, corrections)?;
    Ok(load::run(settings, &Storage::default())?)
}

#[test]
fn test_local_pipeline_loads_and_reconciles() -> Result<(), Box<dyn std::error::Error>> {
    let root = TempDir::new()?;
    let settings = settings(&root);
    let kildedata = &settings.kildedata_root_dir;
    LocalStorage.create_dir_all(kildedata)?;
    LocalStorage.write_json(
        &kildedata.join("weather_stations_v1.json"),
        &stations("OSLO - BLINDERN"),
    )?;
    LocalStorage.write_json(
        &kildedata.join("observations_p2024-01-01_p2024-01-02.json"),
        &observations(),
    )?;

    let corrections =
        Corrections::new().drop_station("SN499999010", "iot station without metadata");
    let summary = run_local(&settings, &corrections)?;
    assert_eq!(summary, LoadSummary { inserted: 2 + 6, updated: 0 });

    let datastore = ParquetDatastore::new(Storage::default(), settings.datastore_dir.clone());
    let stations_table = datastore.query("weather_stations")?.ok_or("no station table")?;
    assert_eq!(stations_table.height(), 2);
    assert_eq!(
        stations_table.column("komm_nr")?.str()?.into_iter().collect::<Vec<_>>(),
        vec![Some("0301"), Some("4601")]
    );

    // Nothing new: every stage is a no-op.
    assert_eq!(run_local(&settings, &corrections)?, LoadSummary::default());

    // A renamed station arrives as a new snapshot version and becomes one update.
    LocalStorage.write_json(
        &kildedata.join("weather_stations_v2.json"),
        &stations("OSLO - BLINDERN II"),
    )?;
    assert_eq!(run_local(&settings, &corrections)?, LoadSummary { inserted: 0, updated: 1 });

    let stations_table = datastore.query("weather_stations")?.ok_or("no station table")?;
    let names: Vec<Option<&str>> = stations_table.column("name")?.str()?.into_iter().collect();
    assert!(names.contains(&Some("OSLO - BLINDERN II")));
    Ok(())
}

#[test]
fn test_invalid_stations_without_corrections_fail() -> Result<(), Box<dyn std::error::Error>> {
    let root = TempDir::new()?;
    let settings = settings(&root);
    LocalStorage.create_dir_all(&settings.kildedata_root_dir)?;
    LocalStorage.write_json(
        &settings.kildedata_root_dir.join("weather_stations_v1.json"),
        &stations("OSLO - BLINDERN"),
    )?;

    kildomat::run(&settings, &LocalStorage)?;
    let result = inndata::run(&settings, &LocalStorage, &Corrections::new());
    assert!(matches!(result, Err(metstat::PipelineError::Validation { .. })));
    Ok(())
}
