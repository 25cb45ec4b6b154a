use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use serde::Serialize;

use crate::config::PlatformApiConfig;
use crate::error::{PipelineError, Result};
use crate::formats::SourceRecord;
use crate::retry::{RetryPolicy, with_backoff};

const SERVICE: &str = "metadata update";

/// One converted source, as handed to downstream consumers.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub name: String,
    pub platform: String,
    pub path: PathBuf,
    pub records: Vec<SourceRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub sent: usize,
    pub failed: usize,
    pub first_error: Option<String>,
}

/// Pushes already-updated catalogs to an external platform.
pub trait MetadataUpdater {
    fn update(&self, batches: &[SourceBatch]) -> Result<UpdateReport>;
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    source: &'a str,
    platform: &'a str,
    sources: &'a [SourceRecord],
}

#[derive(Debug, Clone)]
pub struct HttpMetadataUpdater {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    platform: String,
    retry: RetryPolicy,
}

impl HttpMetadataUpdater {
    /// Builds an updater for `platform` from its API settings. The API key is
    /// read from the environment variable the settings name.
    pub fn from_config(platform: &str, config: &PlatformApiConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("{} is not set", config.api_key_env))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("build metadata update http client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            platform: platform.to_owned(),
            retry: config.retry.clone(),
        })
    }

    fn post_once(&self, batch: &SourceBatch) -> Result<()> {
        let body = UpdateRequest {
            source: &batch.name,
            platform: &batch.platform,
            sources: &batch.records,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|err| {
                PipelineError::external(SERVICE, format!("POST {}: {err}", self.endpoint), true)
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let raw = response.text().unwrap_or_default();
        let retryable = status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
        Err(PipelineError::external(
            SERVICE,
            format!("HTTP {} from {}: {}", status.as_u16(), self.endpoint, raw.trim()),
            retryable,
        ))
    }
}

impl MetadataUpdater for HttpMetadataUpdater {
    fn update(&self, batches: &[SourceBatch]) -> Result<UpdateReport> {
        let mut report = UpdateReport::default();
        for batch in batches.iter().filter(|b| b.platform == self.platform) {
            let sent = with_backoff("metadata update", &self.retry, || self.post_once(batch));
            match sent {
                Ok(()) => {
                    tracing::info!(source = %batch.name, records = batch.records.len(), "metadata updated");
                    report.sent += 1;
                }
                Err(err) => {
                    tracing::warn!(source = %batch.name, error = %err, "metadata update failed");
                    if report.first_error.is_none() {
                        report.first_error = Some(format!("{}: {err}", batch.name));
                    }
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

/// Stands in for an updater that could not be built; every call fails with
/// the construction error.
#[derive(Debug, Clone)]
pub struct UnavailableUpdater {
    reason: String,
}

impl UnavailableUpdater {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl MetadataUpdater for UnavailableUpdater {
    fn update(&self, _batches: &[SourceBatch]) -> Result<UpdateReport> {
        Err(PipelineError::external(SERVICE, &self.reason, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_updater_fails_without_retry() {
        let err = UnavailableUpdater::new("YOUTUBE_API_KEY is not set")
            .update(&[])
            .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "metadata update: YOUTUBE_API_KEY is not set");
    }

    #[test]
    fn missing_api_key_is_reported_by_name() {
        let config = PlatformApiConfig {
            enabled: true,
            endpoint: "http://127.0.0.1:9/metadata".to_owned(),
            api_key_env: "CATALOGIFY_TEST_KEY_THAT_IS_NEVER_SET".to_owned(),
            ..PlatformApiConfig::default()
        };
        let err = HttpMetadataUpdater::from_config("YouTube", &config).unwrap_err();
        assert!(err.to_string().contains("CATALOGIFY_TEST_KEY_THAT_IS_NEVER_SET is not set"));
    }
}
