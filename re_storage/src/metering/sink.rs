use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::meter::UsageEvent;
use crate::config::MeteringConfig;
use crate::error::ConfigError;

/// Ingest endpoint used when the config does not override it.
pub const DEFAULT_INGEST_URL: &str = "http://127.0.0.1:8088/v1/usage";

#[async_trait]
pub trait MeteringSink: Send + Sync {
    async fn emit(&self, event: &UsageEvent) -> Result<()>;
}

pub type DynMeteringSink = Arc<dyn MeteringSink>;

/// Posts usage events as JSON to the metering ingestion service.
pub struct HttpMeteringSink {
    client: reqwest::Client,
    ingest_url: String,
    token: String,
}

impl HttpMeteringSink {
    pub fn new(ingest_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build metering HTTP client")?;

        Ok(Self {
            client,
            ingest_url: ingest_url.into(),
            token: token.into(),
        })
    }

    pub fn from_config(config: &MeteringConfig) -> Result<Self, ConfigError> {
        let token = std::fs::read_to_string(&config.credentials_file).map_err(|source| {
            ConfigError::Read {
                path: config.credentials_file.display().to_string(),
                source,
            }
        })?;
        let ingest_url = config
            .ingest_url
            .clone()
            .unwrap_or_else(|| DEFAULT_INGEST_URL.to_string());

        Self::new(ingest_url, token.trim())
            .map_err(|e| ConfigError::Invalid(format!("metering sink: {e:#}")))
    }

    pub fn ingest_url(&self) -> &str {
        &self.ingest_url
    }
}

#[async_trait]
impl MeteringSink for HttpMeteringSink {
    async fn emit(&self, event: &UsageEvent) -> Result<()> {
        self.client
            .post(&self.ingest_url)
            .bearer_auth(&self.token)
            .json(event)
            .send()
            .await
            .with_context(|| format!("Failed to send usage event for {}", event.customer_id))?
            .error_for_status()
            .with_context(|| format!("Usage event for {} rejected", event.customer_id))?;
        Ok(())
    }
}
