use crate::frost::error::FrostError;
use bon::bon;
use chrono::NaiveDate;
use log::{info, warn};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::HashMap;

pub const FROST_BASE_URL: &str = "https://frost.met.no";
pub const CLIENT_ID_VAR: &str = "FROST_CLIENT_ID";

/// Daily aggregates requested for every selected station.
pub const DAILY_ELEMENTS: [&str; 5] = [
    "min(air_temperature P1D)",
    "mean(air_temperature P1D)",
    "max(air_temperature P1D)",
    "sum(precipitation_amount P1D)",
    "max(wind_speed P1D)",
];

/// Client for the Frost API of the Norwegian Meteorological Institute.
///
/// Requests authenticate with the client id as basic-auth user and an empty password.
#[derive(Debug, Clone)]
pub struct FrostClient {
    http: Client,
    base_url: String,
    client_id: String,
}

#[bon]
impl FrostClient {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: FROST_BASE_URL.to_string(),
            client_id: client_id.into(),
        }
    }

    /// Reads the client id from `FROST_CLIENT_ID`, loading a `.env` file first if one
    /// is present.
    pub fn from_env() -> Result<Self, FrostError> {
        if let Err(e) = dotenvy::dotenv() {
            info!("No .env file loaded: {}", e);
        }
        let client_id =
            std::env::var(CLIENT_ID_VAR).map_err(|_| FrostError::MissingClientId(CLIENT_ID_VAR))?;
        Ok(Self::new(client_id))
    }

    /// Points the client at another host, e.g. a proxy or a test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// GETs `endpoint` and returns the records of the response's `data` array.
    ///
    /// A non-200 response becomes [`FrostError::Api`] carrying the `error.message` and
    /// `error.reason` the API reports.
    pub async fn fetch_data(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<Value>, FrostError> {
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        info!("Requesting {} with {:?}", url, params);

        let response = self
            .http
            .get(&url)
            .basic_auth(&self.client_id, Some(""))
            .query(params)
            .send()
            .await
            .map_err(|e| FrostError::NetworkRequest(url.clone(), e))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FrostError::NetworkRequest(url.clone(), e))?;

        if status != StatusCode::OK {
            let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            let detail = |field: &str| {
                body.pointer(&format!("/error/{field}"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            warn!("HTTP error for {}: {}", url, status);
            return Err(FrostError::Api {
                url,
                status,
                message: detail("message"),
                reason: detail("reason"),
            });
        }

        let body: Value =
            serde_json::from_slice(&bytes).map_err(|e| FrostError::Decode(url.clone(), e))?;
        match body {
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(records)) => {
                    info!("Received {} records from {}", records.len(), url);
                    Ok(records)
                }
                _ => Err(FrostError::MissingData(url)),
            },
            _ => Err(FrostError::MissingData(url)),
        }
    }

    /// All Norwegian weather stations.
    pub async fn weather_stations(&self) -> Result<Vec<Value>, FrostError> {
        self.fetch_data("sources/v0.jsonld", &[("country", "Norge".to_string())])
            .await
    }

    /// Daily observations for `source_ids` between `from_date` and `to_date`.
    ///
    /// ```no_run
    /// # use metstat::FrostClient;
    /// # use chrono::NaiveDate;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = FrostClient::from_env()?;
    /// let records = client
    ///     .observations(&["SN18700".to_string()])
    ///     .from_date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    ///     .to_date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap())
    ///     .call()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    #[builder(start_fn = observations)]
    pub async fn build_observations(
        &self,
        #[builder(start_fn)] source_ids: &[String],
        from_date: NaiveDate,
        to_date: NaiveDate,
    ) -> Result<Vec<Value>, FrostError> {
        let params = [
            ("sources", source_ids.join(",")),
            ("elements", DAILY_ELEMENTS.join(",")),
            ("referencetime", format!("{from_date}/{to_date}")),
            ("levels", "default".to_string()),
            ("timeoffsets", "default".to_string()),
        ];
        self.fetch_data("observations/v0.jsonld", &params).await
    }
}

/// `<first>_p<last>` from the dates of the first and last record's `referenceTime`.
pub fn extract_timespan(records: &[Value]) -> Result<String, FrostError> {
    fn date(record: Option<&Value>) -> Result<&str, FrostError> {
        record
            .and_then(|record| record.get("referenceTime"))
            .and_then(Value::as_str)
            .and_then(|time| time.get(..10))
            .ok_or(FrostError::MissingReferenceTime)
    }
    Ok(format!("{}_p{}", date(records.first())?, date(records.last())?))
}

/// Station ids for `names`, in the order the names are given.
pub fn station_ids(names: &[String], stations: &[Value]) -> Result<Vec<String>, FrostError> {
    let by_name: HashMap<&str, &str> = stations
        .iter()
        .filter_map(|station| {
            Some((
                station.get("name")?.as_str()?,
                station.get("id")?.as_str()?,
            ))
        })
        .collect();

    names
        .iter()
        .map(|name| {
            by_name
                .get(name.as_str())
                .map(|id| id.to_string())
                .ok_or_else(|| FrostError::UnknownStation(name.clone()))
        })
        .collect()
}
