//! Boundary contracts for the screening backend: request/report shapes, the
//! wire format of stream events, and a thin HTTP client for the analyze,
//! stream, and sync endpoints.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::errors::{StreamError, SyncError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScreeningRequest {
    pub age_months: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub observations: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_b64: Option<String>,
}

impl ScreeningRequest {
    pub fn new(age_months: u32, observations: impl Into<String>) -> Self {
        Self {
            age_months,
            domain: None,
            observations: observations.into(),
            image_b64: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// Structured report from the analyze endpoint, flattened into cached cases.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScreeningReport {
    pub risk_level: String,
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub confidence: f64,
}

/// One SSE event from the inference stream endpoint.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct WireStreamEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub agent: Option<String>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub token: Option<String>,
    pub result: Option<Value>,
    pub report: Option<ScreeningReport>,
}

pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST the screening fields; returns the structured report.
    pub async fn analyze(&self, request: &ScreeningRequest) -> Result<ScreeningReport> {
        let res = self
            .client
            .post(format!("{}/analyze", self.base_url))
            .json(request)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            anyhow::bail!("analyze endpoint returned {status}: {body}");
        }

        res.json::<ScreeningReport>()
            .await
            .context("malformed analyze response")
    }

    /// POST a previously-offline case; any 2xx marks it synced.
    pub async fn sync_case<T: Serialize + Sync>(
        &self,
        case_id: &str,
        case: &T,
    ) -> Result<(), SyncError> {
        let res = self
            .client
            .post(format!("{}/sync", self.base_url))
            .json(case)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(SyncError::Rejected {
                case_id: case_id.to_string(),
                status: res.status().as_u16(),
            });
        }
        Ok(())
    }

    /// Open the inference stream; the caller consumes `bytes_stream()`.
    pub(crate) async fn open_stream(
        &self,
        request: &ScreeningRequest,
    ) -> Result<reqwest::Response, StreamError> {
        let res = self
            .client
            .post(format!("{}/stream", self.base_url))
            .json(request)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(StreamError::Status { status, body });
        }
        Ok(res)
    }
}
