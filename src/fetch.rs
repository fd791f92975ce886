use crate::config::SourceConfig;
use crate::types::{Category, CategoryStat, DistrictBoundary, IncomeRecord};
use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::future::Future;
use tracing::debug;

/// Everything the map needs from the outside world.
pub trait DataSource: Send + Sync {
    fn boundaries(&self) -> impl Future<Output = Result<Vec<DistrictBoundary>>> + Send;
    fn income(&self) -> impl Future<Output = Result<Vec<IncomeRecord>>> + Send;
    fn category_stats(
        &self,
        category: Category,
    ) -> impl Future<Output = Result<Vec<CategoryStat>>> + Send;
}

/// Reads each dataset from an HTTP endpoint or, for non-URL locations, a local file.
#[derive(Clone)]
pub struct HttpSource {
    client: Client,
    config: SourceConfig,
}

impl HttpSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    async fn get_json<T: DeserializeOwned>(&self, location: &str) -> Result<T> {
        if !is_url(location) {
            let bytes = tokio::fs::read(location)
                .await
                .with_context(|| format!("Failed to read {}", location))?;
            return serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse JSON from {}", location));
        }

        debug!("GET {}", location);
        let resp = self
            .client
            .get(location)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", location))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("HTTP {} from {}", status, location);
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("Failed to decode JSON from {}", location))
    }
}

fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

impl DataSource for HttpSource {
    async fn boundaries(&self) -> Result<Vec<DistrictBoundary>> {
        self.get_json(&self.config.boundaries).await
    }

    async fn income(&self) -> Result<Vec<IncomeRecord>> {
        self.get_json(&self.config.income).await
    }

    async fn category_stats(&self, category: Category) -> Result<Vec<CategoryStat>> {
        self.get_json(self.config.category(category)).await
    }
}
