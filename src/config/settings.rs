//! Pipeline settings loaded from a TOML file with named environments.
//!
//! ```toml
//! [default]
//! kildedata_root_dir = "gs://metstat-kilde/frost/"
//! weather_stations_file_prefix = "weather_stations"
//!
//! [local_files]
//! kildedata_root_dir = "../data/kildedata"
//! ```
//!
//! The selected environment is merged over `[default]`, then `METSTAT_<KEY>`
//! variables override single keys. Relative local directories are resolved against the
//! settings file's directory.

use crate::config::error::ConfigError;
use crate::files::locator::{FileLocator, GS_URI_PREFIX};
use bon::Builder;
use chrono::NaiveDate;
use log::{debug, info};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_ENVIRONMENT: &str = "default";
pub const ENV_PREFIX: &str = "METSTAT_";
pub const DEFAULT_SETTINGS_FILE: &str = "config/settings.toml";

const LIST_KEYS: [&str; 1] = ["weather_station_names"];

#[derive(Debug, Clone, PartialEq, Builder)]
pub struct Settings {
    #[builder(into, default = DEFAULT_ENVIRONMENT.to_string())]
    pub environment: String,
    pub kildedata_root_dir: FileLocator,
    pub pre_inndata_dir: FileLocator,
    pub inndata_dir: FileLocator,
    pub datastore_dir: FileLocator,
    #[builder(into, default = "weather_stations".to_string())]
    pub weather_stations_file_prefix: String,
    #[builder(into, default = "observations".to_string())]
    pub observations_file_prefix: String,
    pub collect_from_date: NaiveDate,
    #[builder(default)]
    pub weather_station_names: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    kildedata_root_dir: Option<String>,
    pre_inndata_dir: Option<String>,
    inndata_dir: Option<String>,
    datastore_dir: Option<String>,
    weather_stations_file_prefix: Option<String>,
    observations_file_prefix: Option<String>,
    collect_from_date: Option<toml::Value>,
    weather_station_names: Option<Vec<String>>,
}

impl Settings {
    /// Loads `environment` from the settings file at `path`, applying `METSTAT_*`
    /// overrides from the process environment.
    pub fn load(path: &Path, environment: &str) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let base_dir = std::fs::canonicalize(&base_dir).unwrap_or(base_dir);
        info!("Loading settings [{}] from {}", environment, path.display());
        Self::from_toml(&content, &base_dir, environment, std::env::vars())
            .map_err(|e| match e {
                ConfigError::Parse(_, source) => ConfigError::Parse(path.to_path_buf(), source),
                other => other,
            })
    }

    /// Parses settings from TOML text. `base_dir` anchors relative local directories and
    /// `vars` supplies the `METSTAT_*` overrides.
    pub fn from_toml(
        content: &str,
        base_dir: &Path,
        environment: &str,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        let document: toml::Table =
            toml::from_str(content).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;

        let mut merged = environment_table(&document, DEFAULT_ENVIRONMENT).unwrap_or_default();
        if environment != DEFAULT_ENVIRONMENT {
            let selected = environment_table(&document, environment)
                .ok_or_else(|| ConfigError::UnknownEnvironment(environment.to_string()))?;
            merged.extend(selected);
        }
        apply_overrides(&mut merged, vars);

        let raw: RawSettings =
            toml::Value::Table(merged)
                .try_into()
                .map_err(|source| ConfigError::Invalid {
                    env: environment.to_string(),
                    source,
                })?;

        let directory = |key: &'static str, value: Option<String>| {
            resolve_directory(key, value.ok_or(ConfigError::MissingKey(key))?, base_dir)
        };
        let kildedata_root_dir = directory("kildedata_root_dir", raw.kildedata_root_dir)?;
        let pre_inndata_dir = directory("pre_inndata_dir", raw.pre_inndata_dir)?;
        let inndata_dir = directory("inndata_dir", raw.inndata_dir)?;
        let datastore_dir = match raw.datastore_dir {
            Some(value) => resolve_directory("datastore_dir", value, base_dir)?,
            None => default_datastore_dir()?,
        };

        let settings = Settings {
            environment: environment.to_string(),
            kildedata_root_dir,
            pre_inndata_dir,
            inndata_dir,
            datastore_dir,
            weather_stations_file_prefix: raw
                .weather_stations_file_prefix
                .ok_or(ConfigError::MissingKey("weather_stations_file_prefix"))?,
            observations_file_prefix: raw
                .observations_file_prefix
                .ok_or(ConfigError::MissingKey("observations_file_prefix"))?,
            collect_from_date: parse_date(
                "collect_from_date",
                raw.collect_from_date
                    .ok_or(ConfigError::MissingKey("collect_from_date"))?,
            )?,
            weather_station_names: raw
                .weather_station_names
                .ok_or(ConfigError::MissingKey("weather_station_names"))?,
        };
        debug!("Resolved settings: {:?}", settings);
        Ok(settings)
    }
}

fn environment_table(document: &toml::Table, name: &str) -> Option<toml::Table> {
    document.get(name).and_then(toml::Value::as_table).cloned()
}

fn apply_overrides(table: &mut toml::Table, vars: impl IntoIterator<Item = (String, String)>) {
    for (name, value) in vars {
        let Some(key) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let key = key.to_lowercase();
        if key == "env" {
            continue;
        }
        let value = if LIST_KEYS.contains(&key.as_str()) {
            toml::Value::Array(
                value
                    .split(',')
                    .map(|item| toml::Value::String(item.trim().to_string()))
                    .collect(),
            )
        } else {
            toml::Value::String(value)
        };
        debug!("Setting '{}' overridden by {}", key, name);
        table.insert(key, value);
    }
}

fn resolve_directory(
    key: &'static str,
    value: String,
    base_dir: &Path,
) -> Result<FileLocator, ConfigError> {
    match FileLocator::parse(&value) {
        FileLocator::Remote(uri) => {
            if uri.starts_with(GS_URI_PREFIX) && uri.ends_with('/') {
                Ok(FileLocator::Remote(uri))
            } else {
                Err(ConfigError::InvalidBucketDirectory { key, value })
            }
        }
        FileLocator::Local(path) if path.is_relative() => {
            Ok(FileLocator::Local(base_dir.join(path)))
        }
        local => Ok(local),
    }
}

fn parse_date(key: &'static str, value: toml::Value) -> Result<NaiveDate, ConfigError> {
    let text = match value {
        toml::Value::String(text) => text,
        toml::Value::Datetime(datetime) => datetime.to_string(),
        other => other.to_string(),
    };
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .map_err(|_| ConfigError::InvalidDate { key, value: text })
}

fn default_datastore_dir() -> Result<FileLocator, ConfigError> {
    dirs::data_local_dir()
        .map(|dir| FileLocator::Local(dir.join("metstat").join("datastore")))
        .ok_or(ConfigError::DataDirResolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SETTINGS: &str = r#"
[default]
kildedata_root_dir = "gs://metstat-kilde/frost/"
pre_inndata_dir = "gs://metstat-produkt/pre-inndata/"
inndata_dir = "gs://metstat-produkt/inndata/"
datastore_dir = "gs://metstat-produkt/datastore/"
weather_stations_file_prefix = "weather_stations"
observations_file_prefix = "observations"
collect_from_date = "2024-01-01"
weather_station_names = ["OSLO - BLINDERN", "BERGEN - FLORIDA"]

[local_files]
kildedata_root_dir = "../data/kildedata"
pre_inndata_dir = "../data/pre-inndata"
inndata_dir = "../data/inndata"
datastore_dir = "/var/lib/metstat"
collect_from_date = 2024-03-01

[broken]
kildedata_root_dir = "gs://no-trailing-slash"
"#;

    fn no_vars() -> Vec<(String, String)> {
        Vec::new()
    }

    #[test]
    fn test_default_environment() -> Result<(), ConfigError> {
        let settings =
            Settings::from_toml(SETTINGS, Path::new("/repo/config"), "default", no_vars())?;
        assert_eq!(settings.kildedata_root_dir, FileLocator::remote("gs://metstat-kilde/frost/"));
        assert_eq!(settings.collect_from_date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(settings.weather_station_names.len(), 2);
        Ok(())
    }

    #[test]
    fn test_local_environment_resolves_relative_paths() -> Result<(), ConfigError> {
        let settings =
            Settings::from_toml(SETTINGS, Path::new("/repo/config"), "local_files", no_vars())?;
        assert_eq!(
            settings.kildedata_root_dir,
            FileLocator::local("/repo/config/../data/kildedata")
        );
        assert_eq!(settings.datastore_dir, FileLocator::local("/var/lib/metstat"));
        assert_eq!(settings.observations_file_prefix, "observations");
        assert_eq!(settings.collect_from_date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        Ok(())
    }

    #[test]
    fn test_env_vars_override_keys() -> Result<(), ConfigError> {
        let vars = vec![
            ("METSTAT_OBSERVATIONS_FILE_PREFIX".to_string(), "obs".to_string()),
            ("METSTAT_WEATHER_STATION_NAMES".to_string(), "A, B,C".to_string()),
            ("METSTAT_ENV".to_string(), "ignored".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ];
        let settings = Settings::from_toml(SETTINGS, Path::new("/repo"), "default", vars)?;
        assert_eq!(settings.observations_file_prefix, "obs");
        assert_eq!(settings.weather_station_names, vec!["A", "B", "C"]);
        Ok(())
    }

    #[test]
    fn test_invalid_bucket_directory() {
        let result = Settings::from_toml(SETTINGS, Path::new("/repo"), "broken", no_vars());
        assert!(matches!(
            result,
            Err(ConfigError::InvalidBucketDirectory { key: "kildedata_root_dir", .. })
        ));
    }

    #[test]
    fn test_unknown_environment_and_missing_key() {
        let result = Settings::from_toml(SETTINGS, Path::new("/repo"), "prod", no_vars());
        assert!(matches!(result, Err(ConfigError::UnknownEnvironment(_))));

        let result = Settings::from_toml("[default]\n", Path::new("/repo"), "default", no_vars());
        assert!(matches!(result, Err(ConfigError::MissingKey("kildedata_root_dir"))));
    }

    #[test]
    fn test_load_from_file() -> Result<(), ConfigError> {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.toml");
        std::fs::write(&path, SETTINGS).unwrap();

        let settings = Settings::load(&path, "local_files")?;
        let FileLocator::Local(inndata) = settings.inndata_dir else {
            panic!("expected a local directory");
        };
        assert!(inndata.is_absolute());
        assert!(inndata.ends_with("../data/inndata"));
        Ok(())
    }

    #[test]
    fn test_builder_defaults() {
        let settings = Settings::builder()
            .kildedata_root_dir(FileLocator::local("/data/kildedata"))
            .pre_inndata_dir(FileLocator::local("/data/pre-inndata"))
            .inndata_dir(FileLocator::local("/data/inndata"))
            .datastore_dir(FileLocator::local("/data/datastore"))
            .collect_from_date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .build();
        assert_eq!(settings.environment, "default");
        assert_eq!(settings.weather_stations_file_prefix, "weather_stations");
        assert!(settings.weather_station_names.is_empty());
    }
}
