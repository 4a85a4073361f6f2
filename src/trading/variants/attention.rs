//! Tokens ranked by the social attention feed.
//!
//! Attention availability is checked first: without feed data the remaining
//! gates say nothing about the signal that surfaced the token.

use async_trait::async_trait;

use crate::models::{SourceType, StrategyConfig, TokenSnapshot};

use super::gates::{passes_gates, Gate};
use super::investor::Investor;
use super::StrategyVariant;

pub(super) const GATES: &[Gate] = &[
    Gate::AttentionData,
    Gate::MarketCap,
    Gate::Liquidity,
    Gate::Age,
    Gate::Tags,
];

pub struct AttentionVariant {
    investor: Investor,
}

impl AttentionVariant {
    pub fn new(investor: Investor) -> Self {
        Self { investor }
    }
}

#[async_trait]
impl StrategyVariant for AttentionVariant {
    fn source(&self) -> SourceType {
        SourceType::AttentionScore
    }

    fn check_entry_conditions(&self, token: &TokenSnapshot, config: &StrategyConfig) -> bool {
        passes_gates(GATES, token, config)
    }

    async fn execute_investment(
        &self,
        execution_id: i64,
        token: &TokenSnapshot,
        config: &StrategyConfig,
    ) -> bool {
        self.investor.invest(execution_id, token, config).await
    }
}
