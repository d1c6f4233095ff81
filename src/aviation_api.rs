use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::ApiConfig;
use crate::retry::{RetryPolicy, Sleeper};
use crate::tracker::FlightSource;

/// One flight record exactly as the flight-data API reports it.
///
/// Every block is optional here; the normalizer decides what is required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFlight {
    #[serde(default)]
    pub airline: Option<RawAirline>,
    #[serde(default)]
    pub flight: Option<RawFlightIdentity>,
    #[serde(default)]
    pub aircraft: Option<RawAircraft>,
    #[serde(default)]
    pub live: Option<RawLive>,
    #[serde(default)]
    pub departure: Option<RawAirport>,
    #[serde(default)]
    pub arrival: Option<RawAirport>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAirline {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub icao: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFlightIdentity {
    #[serde(default)]
    pub icao: Option<String>,
    #[serde(default)]
    pub iata: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAircraft {
    #[serde(default)]
    pub icao: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Live position block. The API is inconsistent about numbers vs numeric
/// strings, so the raw JSON values are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLive {
    #[serde(default)]
    pub latitude: Option<Value>,
    #[serde(default)]
    pub longitude: Option<Value>,
    #[serde(default)]
    pub altitude: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAirport {
    #[serde(default)]
    pub airport: Option<String>,
}

/// Interpret a JSON value as a finite number. Numeric strings are accepted.
pub fn numeric(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

impl RawLive {
    pub fn latitude(&self) -> Option<f64> {
        self.latitude.as_ref().and_then(numeric)
    }

    pub fn longitude(&self) -> Option<f64> {
        self.longitude.as_ref().and_then(numeric)
    }
}

impl RawFlight {
    /// Reported latitude/longitude, if present and numeric.
    pub fn coordinates(&self) -> (Option<f64>, Option<f64>) {
        match &self.live {
            Some(live) => (live.latitude(), live.longitude()),
            None => (None, None),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(reqwest::Error),
    #[error("flight API returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("malformed flight API response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Server errors, throttling and transport failures are worth another
    /// attempt; other client errors and bad payloads are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(e) => !e.is_decode() && !e.is_builder(),
            FetchError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            FetchError::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        // The request URL carries the access key
        FetchError::Transport(e.without_url())
    }
}

/// Client for the flight-data API (aviationstack-style `/v1/flights`).
#[derive(Clone)]
pub struct AviationApiClient {
    client: Client,
    url: String,
    access_key: String,
    limit: u32,
    timeout: Duration,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl AviationApiClient {
    pub fn new(config: &ApiConfig, access_key: String, sleeper: Arc<dyn Sleeper>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("skytrack/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: config.url.clone(),
            access_key,
            limit: config.limit,
            timeout: Duration::from_secs(config.timeout_secs),
            retry: config.retry,
            sleeper,
        })
    }

    /// Fetch the currently active flights.
    ///
    /// Never fails: exhausted retries, client errors and malformed payloads all
    /// degrade to an empty list so the caller just skips this cycle.
    pub async fn fetch_active_flights(&self) -> Vec<RawFlight> {
        let result = self
            .retry
            .run(
                self.sleeper.as_ref(),
                "flight API request",
                |attempt| {
                    if attempt > 0 {
                        metrics::counter!("aviation_api_retries_total").increment(1);
                    }
                    self.fetch_once()
                },
                FetchError::is_retryable,
            )
            .await;

        match result {
            Ok(flights) => {
                info!("Fetched {} active flights", flights.len());
                flights
            }
            Err(e) => {
                error!("Giving up on flight API for this cycle: {}", e);
                metrics::counter!("aviation_api_failures_total").increment(1);
                Vec::new()
            }
        }
    }

    async fn fetch_once(&self) -> Result<Vec<RawFlight>, FetchError> {
        debug!("Requesting active flights from {} (limit {})", self.url, self.limit);

        let limit = self.limit.to_string();
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("access_key", self.access_key.as_str()),
                ("flight_status", "active"),
                ("limit", limit.as_str()),
            ])
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Rate limited by flight API");
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }

        let payload: Value = response.json().await?;
        parse_flights(payload)
    }
}

/// Extract the flight list from the response envelope.
///
/// The envelope must carry a `data` array. Elements that do not decode as a
/// flight object are skipped.
pub fn parse_flights(payload: Value) -> Result<Vec<RawFlight>, FetchError> {
    let Value::Object(mut envelope) = payload else {
        return Err(FetchError::Malformed("top-level payload is not an object".into()));
    };
    let Some(Value::Array(items)) = envelope.remove("data") else {
        return Err(FetchError::Malformed("`data` is missing or not a list".into()));
    };

    let mut flights = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<RawFlight>(item) {
            Ok(flight) => flights.push(flight),
            Err(e) => {
                warn!("Skipping undecodable flight record #{}: {}", idx, e);
                metrics::counter!("aviation_api_undecodable_records_total").increment(1);
            }
        }
    }
    Ok(flights)
}

#[async_trait]
impl FlightSource for AviationApiClient {
    async fn fetch(&self) -> Vec<RawFlight> {
        self.fetch_active_flights().await
    }
}
