//! HTTP client for per-source token attributes.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use crate::models::{SourceType, TokenSnapshot};

use super::types::TokenAttributesResponse;
use super::TokenAttributeProvider;

/// Client for the token attribute feeds (read-only).
pub struct AttributeClient {
    client: Client,
    base_url: Url,
}

impl AttributeClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = base_url.into();
        let base_url = Url::parse(&base_url)
            .with_context(|| format!("Invalid attribute API URL: {}", base_url))?;

        Ok(Self { client, base_url })
    }

    fn token_url(&self, source: SourceType, token_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Attribute API URL cannot have a path: {}", self.base_url))?
            .pop_if_empty()
            .extend(["sources", source.as_str(), "tokens", token_id]);
        Ok(url)
    }
}

#[async_trait]
impl TokenAttributeProvider for AttributeClient {
    async fn get_token(&self, source: SourceType, token_id: &str) -> Result<Option<TokenSnapshot>> {
        let url = self.token_url(source, token_id)?;

        debug!(url = %url, "Fetching token attributes");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to fetch token attributes")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Token attribute request failed: {} - {}", status, body);
        }

        let item: TokenAttributesResponse = response
            .json()
            .await
            .context("Failed to parse token attribute response")?;

        Ok(Some(item.into_snapshot(source)))
    }
}
