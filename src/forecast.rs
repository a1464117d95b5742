use crate::error::{OracleError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// A settlement price prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub predicted_price: Decimal,
    pub as_of: DateTime<Utc>,
    pub model_version: Option<String>,
}

/// Source of settlement prices.
///
/// `Ok(None)` means the provider is up but has nothing to offer yet; an
/// `Err` means the fetch itself failed.
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn forecast(&self) -> Result<Option<Forecast>>;
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    model_hash: Option<String>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    success: Option<bool>,
    predicted_price: Option<Decimal>,
    current_price: Option<Decimal>,
    timestamp: Option<String>,
    error: Option<String>,
    model_context_protocol: Option<ModelInfo>,
}

/// Fetches predictions from the forecasting service over HTTP.
#[derive(Clone)]
pub struct HttpForecastProvider {
    http_client: Client,
    url: String,
}

impl HttpForecastProvider {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| OracleError::Forecast(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ForecastProvider for HttpForecastProvider {
    async fn forecast(&self) -> Result<Option<Forecast>> {
        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| OracleError::Forecast(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OracleError::Forecast(format!("failed to read body: {}", e)))?;

        interpret_response(status, &body, Utc::now())
    }
}

/// Map an HTTP answer to a forecast: 503 means no data yet, any other
/// non-success status is a failure.
pub fn interpret_response(
    status: StatusCode,
    body: &str,
    fetched_at: DateTime<Utc>,
) -> Result<Option<Forecast>> {
    if status == StatusCode::SERVICE_UNAVAILABLE {
        debug!("Forecast service not ready");
        return Ok(None);
    }
    if !status.is_success() {
        return Err(OracleError::Forecast(format!("HTTP {}", status)));
    }
    parse_forecast(body, fetched_at)
}

/// Interpret a forecast service response body.
pub fn parse_forecast(body: &str, fetched_at: DateTime<Utc>) -> Result<Option<Forecast>> {
    let data: ForecastResponse = serde_json::from_str(body)
        .map_err(|e| OracleError::Forecast(format!("unparseable response: {}", e)))?;

    if data.success == Some(false) {
        return Err(OracleError::Forecast(
            data.error.unwrap_or_else(|| "provider reported failure".to_string()),
        ));
    }

    let Some(predicted_price) = data.predicted_price else {
        return Ok(None);
    };

    let as_of = data
        .timestamp
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(fetched_at);

    let (model_hash, model_version) = match data.model_context_protocol {
        Some(info) => (info.model_hash, info.model_version),
        None => (None, None),
    };

    info!(
        predicted_price = %predicted_price,
        current_price = ?data.current_price,
        model_version = ?model_version,
        model_hash = ?model_hash,
        "Forecast received"
    );

    Ok(Some(Forecast {
        predicted_price,
        as_of,
        model_version,
    }))
}

// RFC 3339, or naive ISO-8601 taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
