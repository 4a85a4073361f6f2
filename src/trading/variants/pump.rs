//! Young tokens caught by the pump detector.

use async_trait::async_trait;

use crate::models::{SourceType, StrategyConfig, TokenSnapshot};

use super::gates::{passes_gates, Gate};
use super::investor::Investor;
use super::StrategyVariant;

pub(super) const GATES: &[Gate] = &[
    Gate::Age,
    Gate::MarketCap,
    Gate::Liquidity,
    Gate::AttentionData,
];

pub struct PumpVariant {
    investor: Investor,
}

impl PumpVariant {
    pub fn new(investor: Investor) -> Self {
        Self { investor }
    }
}

#[async_trait]
impl StrategyVariant for PumpVariant {
    fn source(&self) -> SourceType {
        SourceType::PumpDetection
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
