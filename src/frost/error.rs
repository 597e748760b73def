use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrostError {
    #[error("{0} environment variable is not defined")]
    MissingClientId(&'static str),

    #[error("Network request failed for {0}")]
    NetworkRequest(String, #[source] reqwest::Error),

    #[error("Failed to decode response from {0}")]
    Decode(String, #[source] serde_json::Error),

    #[error("Request to {url} failed. Status code: {status}, Message: {message}, Reason: {reason}")]
    Api {
        url: String,
        status: reqwest::StatusCode,
        message: String,
        reason: String,
    },

    #[error("Response from {0} has no `data` array")]
    MissingData(String),

    #[error("Observation records carry no `referenceTime` to derive a timespan from")]
    MissingReferenceTime,

    #[error("No weather station named '{0}'")]
    UnknownStation(String),
}
