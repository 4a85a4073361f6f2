//! Response types for the price and token-attribute APIs.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::models::{PriceQuote, SourceType, TokenSnapshot};

/// Response from `GET /tokens/{id}/price`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceResponse {
    pub price: Option<Decimal>,
    #[serde(default)]
    pub fdv: Option<Decimal>,
    #[serde(default)]
    pub market_cap: Option<Decimal>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
}

impl PriceResponse {
    /// A response without a price is treated as "not found".
    pub fn into_quote(self) -> Option<PriceQuote> {
        let price = self.price?;
        Some(PriceQuote {
            price,
            fdv: self.fdv,
            market_cap: self.market_cap,
            name: self.name,
            symbol: self.symbol,
        })
    }
}

/// Response from `GET /sources/{source}/tokens/{id}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAttributesResponse {
    #[serde(alias = "tokenid")]
    pub token_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default, alias = "mcap")]
    pub market_cap: Option<Decimal>,
    #[serde(default)]
    pub liquidity: Option<Decimal>,
    #[serde(default)]
    pub smart_balance: Option<Decimal>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub age_hours: Option<i64>,
    #[serde(default)]
    pub attention_score: Option<Decimal>,
    #[serde(default)]
    pub volume_24h: Option<Decimal>,
}

impl TokenAttributesResponse {
    pub fn into_snapshot(self, source: SourceType) -> TokenSnapshot {
        let name = if self.name.is_empty() {
            self.token_id.clone()
        } else {
            self.name
        };
        TokenSnapshot {
            token_id: self.token_id,
            name,
            symbol: self.symbol,
            source,
            market_cap: self.market_cap,
            liquidity: self.liquidity,
            smart_balance: self.smart_balance,
            tags: self.tags,
            age_hours: self.age_hours,
            has_attention_data: self.attention_score.is_some(),
            attention_score: self.attention_score,
            volume_24h: self.volume_24h,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_response_parsing() {
        let json = r#"{"price": 0.0042, "fdv": "1200000", "marketCap": 980000, "symbol": "PEPE"}"#;
        let quote = serde_json::from_str::<PriceResponse>(json)
            .unwrap()
            .into_quote()
            .unwrap();

        assert_eq!(quote.price, dec!(0.0042));
        assert_eq!(quote.market_cap, Some(dec!(980000)));
        assert_eq!(quote.symbol.as_deref(), Some("PEPE"));
        assert_eq!(quote.name, None);
    }

    #[test]
    fn test_price_response_without_price() {
        let json = r#"{"name": "Unlisted"}"#;
        let response: PriceResponse = serde_json::from_str(json).unwrap();
        assert!(response.into_quote().is_none());
    }

    #[test]
    fn test_attributes_map_attention_availability() {
        let json = r#"{
            "tokenId": "So1abc",
            "mcap": 2500000,
            "liquidity": "180000",
            "tags": ["meme"],
            "ageHours": 36,
            "attentionScore": 71.5
        }"#;
        let snapshot = serde_json::from_str::<TokenAttributesResponse>(json)
            .unwrap()
            .into_snapshot(SourceType::AttentionScore);

        assert_eq!(snapshot.name, "So1abc");
        assert_eq!(snapshot.market_cap, Some(dec!(2500000)));
        assert!(snapshot.has_attention_data);
        assert_eq!(snapshot.age_hours, Some(36));
        assert_eq!(snapshot.source, SourceType::AttentionScore);
    }
}
