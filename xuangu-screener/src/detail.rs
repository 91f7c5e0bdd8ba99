//! Per-stock analysis lookup against the external analytics service.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use xuangu_common::DetailConfig;

/// Analytics endpoint path, relative to the configured base URL.
const ANALYSIS_PATH: &str = "/get-stock-analysis";

#[derive(Error, Debug)]
pub enum DetailError {
    #[error("Request timeout")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("Failed to parse response: {0}")]
    Decode(String),
}

/// HTTP client for the analytics service.
#[derive(Debug, Clone)]
pub struct DetailGateway {
    client: reqwest::Client,
    base_url: String,
}

impl DetailGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &DetailConfig) -> Self {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    /// Analysis document for `code`, or `None` on any failure.
    pub async fn fetch_detail(&self, code: &str) -> Option<Value> {
        match self.try_fetch_detail(code).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(code = %code, error = %e, "Stock analysis lookup failed");
                None
            }
        }
    }

    pub async fn try_fetch_detail(&self, code: &str) -> Result<Value, DetailError> {
        let url = format!("{}{}", self.base_url, ANALYSIS_PATH);
        debug!(url = %url, code = %code, "Fetching stock analysis");

        let response = self
            .client
            .get(&url)
            .query(&[("stock_code", code)])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DetailError::Timeout
                } else {
                    DetailError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DetailError::Status(status));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| DetailError::Decode(e.to_string()))
    }
}
