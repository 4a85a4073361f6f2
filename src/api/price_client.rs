//! HTTP client for the price-quote API.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backoff::{future::retry, Error as BackoffError, ExponentialBackoff};
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use crate::models::PriceQuote;

use super::types::PriceResponse;
use super::PriceProvider;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transient failures are retried for at most this long.
const DEFAULT_RETRY_WINDOW: Duration = Duration::from_secs(20);

/// Client for spot prices (read-only).
pub struct PriceClient {
    client: Client,
    base_url: Url,
    retry_window: Duration,
}

impl PriceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = base_url.into();
        let base_url = Url::parse(&base_url)
            .with_context(|| format!("Invalid price API URL: {}", base_url))?;

        Ok(Self {
            client,
            base_url,
            retry_window: DEFAULT_RETRY_WINDOW,
        })
    }

    /// Shorten or extend the retry window for transient failures.
    pub fn with_retry_window(mut self, window: Duration) -> Self {
        self.retry_window = window;
        self
    }

    /// The token id is one encoded path segment.
    fn price_url(&self, token_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Price API URL cannot have a path: {}", self.base_url))?
            .pop_if_empty()
            .extend(["tokens", token_id, "price"]);
        Ok(url)
    }
}

#[async_trait]
impl PriceProvider for PriceClient {
    async fn get_token_price(&self, token_id: &str) -> Result<Option<PriceQuote>> {
        let url = self.price_url(token_id)?;
        let url = &url;
        let client = &self.client;

        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(250),
            max_elapsed_time: Some(self.retry_window),
            ..Default::default()
        };

        retry(policy, || async move {
            debug!(url = %url, "Fetching price");

            let response = client.get(url.clone()).send().await.map_err(|e| {
                BackoffError::transient(anyhow::Error::new(e).context("Failed to fetch price"))
            })?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                return Err(BackoffError::transient(anyhow!("Price request failed: {}", status)));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(BackoffError::permanent(anyhow!(
                    "Price request failed: {} - {}",
                    status,
                    body
                )));
            }

            let body: PriceResponse = response.json().await.map_err(|e| {
                BackoffError::permanent(
                    anyhow::Error::new(e).context("Failed to parse price response"),
                )
            })?;
            Ok(body.into_quote())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let client = PriceClient::new("http://localhost:9000/", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(
            client.price_url("abc").unwrap().as_str(),
            "http://localhost:9000/tokens/abc/price"
        );
    }

    #[test]
    fn test_token_id_cannot_rewrite_path_or_query() {
        let client = PriceClient::new("http://localhost:9000/api", DEFAULT_TIMEOUT).unwrap();
        let url = client.price_url("../admin?x=1#frag").unwrap();

        assert_eq!(
            url.as_str(),
            "http://localhost:9000/api/tokens/..%2Fadmin%3Fx=1%23frag/price"
        );
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        assert!(PriceClient::new("not a url", DEFAULT_TIMEOUT).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_an_error_not_a_panic() {
        let client = PriceClient::new("http://127.0.0.1:9", Duration::from_millis(200))
            .unwrap()
            .with_retry_window(Duration::from_millis(300));

        let result = client.get_token_price("abc").await;
        assert!(result.is_err());
    }
}
