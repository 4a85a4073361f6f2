//! External providers: spot prices and per-source token attributes.

mod attribute_client;
mod price_client;
mod types;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{PriceQuote, SourceType, TokenSnapshot};

pub use attribute_client::AttributeClient;
pub use price_client::{PriceClient, DEFAULT_TIMEOUT};

/// Source of spot prices. An unknown token is `Ok(None)`, not an error.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    async fn get_token_price(&self, token_id: &str) -> Result<Option<PriceQuote>>;
}

/// Source of current token attributes for a given feed.
#[async_trait]
pub trait TokenAttributeProvider: Send + Sync {
    async fn get_token(&self, source: SourceType, token_id: &str) -> Result<Option<TokenSnapshot>>;
}
