use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings file '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse settings file '{0}'")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Environment [{0}] is not defined in the settings file")]
    UnknownEnvironment(String),

    #[error("Invalid settings for environment [{env}]")]
    Invalid {
        env: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Setting '{0}' is required")]
    MissingKey(&'static str),

    #[error("Setting '{key}' = '{value}' is not a bucket directory. It must start with `gs://` and end with `/`")]
    InvalidBucketDirectory { key: &'static str, value: String },

    #[error("Setting '{key}' = '{value}' is not a YYYY-MM-DD date")]
    InvalidDate { key: &'static str, value: String },

    #[error("Failed to determine the local data directory")]
    DataDirResolution,
}
