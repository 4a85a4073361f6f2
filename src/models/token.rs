//! Token snapshots and price quotes supplied by the external providers.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Feed a token was discovered through. Selects the strategy variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    PortfolioSummary,
    AttentionScore,
    VolumeSpike,
    PumpDetection,
}

impl SourceType {
    pub const ALL: [SourceType; 4] = [
        SourceType::PortfolioSummary,
        SourceType::AttentionScore,
        SourceType::VolumeSpike,
        SourceType::PumpDetection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::PortfolioSummary => "portfolio_summary",
            SourceType::AttentionScore => "attention_score",
            SourceType::VolumeSpike => "volume_spike",
            SourceType::PumpDetection => "pump_detection",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "portfolio_summary" | "portfolio" => Ok(Self::PortfolioSummary),
            "attention_score" | "attention" => Ok(Self::AttentionScore),
            "volume_spike" | "volume" => Ok(Self::VolumeSpike),
            "pump_detection" | "pump" => Ok(Self::PumpDetection),
            other => anyhow::bail!("Unknown source type: {}", other),
        }
    }
}

/// Spot quote returned by the price provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: Decimal,
    #[serde(default)]
    pub fdv: Option<Decimal>,
    #[serde(default)]
    pub market_cap: Option<Decimal>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
}

/// Current attribute snapshot of a token as reported by its source feed.
///
/// Every numeric attribute is optional: feeds differ in what they report,
/// and a missing attribute fails any gate that requires it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub token_id: String,
    pub name: String,
    #[serde(default)]
    pub symbol: Option<String>,
    pub source: SourceType,
    #[serde(default)]
    pub market_cap: Option<Decimal>,
    #[serde(default)]
    pub liquidity: Option<Decimal>,
    #[serde(default)]
    pub smart_balance: Option<Decimal>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Hours since the token was created
    #[serde(default)]
    pub age_hours: Option<i64>,
    #[serde(default)]
    pub has_attention_data: bool,
    #[serde(default)]
    pub attention_score: Option<Decimal>,
    #[serde(default)]
    pub volume_24h: Option<Decimal>,
}

impl TokenSnapshot {
    /// Snapshot with only identity filled in.
    pub fn new(token_id: impl Into<String>, name: impl Into<String>, source: SourceType) -> Self {
        Self {
            token_id: token_id.into(),
            name: name.into(),
            symbol: None,
            source,
            market_cap: None,
            liquidity: None,
            smart_balance: None,
            tags: Vec::new(),
            age_hours: None,
            has_attention_data: false,
            attention_score: None,
            volume_24h: None,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_parsing() {
        for source in SourceType::ALL {
            assert_eq!(source.as_str().parse::<SourceType>().unwrap(), source);
        }
        assert_eq!("pump-detection".parse::<SourceType>().unwrap(), SourceType::PumpDetection);
        assert!("twitter".parse::<SourceType>().is_err());
    }

    #[test]
    fn test_tags_are_case_insensitive() {
        let mut token = TokenSnapshot::new("tok", "Token", SourceType::VolumeSpike);
        token.tags = vec!["Meme".to_string(), "solana".to_string()];

        assert!(token.has_tag("meme"));
        assert!(token.has_tag("SOLANA"));
        assert!(!token.has_tag("ai"));
    }
}
