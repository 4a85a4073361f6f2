//! Entry gates shared by the strategy variants.

use tracing::debug;

use crate::models::{EntryConditions, StrategyConfig, TokenSnapshot};

/// One attribute check from a strategy's entry conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Token carries every required tag
    Tags,
    SmartBalance,
    MarketCap,
    Liquidity,
    /// Token age within the configured range
    Age,
    /// Attention feed has data when the strategy requires it
    AttentionData,
}

impl Gate {
    pub fn name(&self) -> &'static str {
        match self {
            Gate::Tags => "tags",
            Gate::SmartBalance => "smart_balance",
            Gate::MarketCap => "market_cap",
            Gate::Liquidity => "liquidity",
            Gate::Age => "age",
            Gate::AttentionData => "attention_data",
        }
    }

    pub fn check(&self, token: &TokenSnapshot, conditions: &EntryConditions) -> bool {
        match self {
            Gate::Tags => conditions.required_tags.iter().all(|tag| token.has_tag(tag)),
            Gate::SmartBalance => conditions
                .min_smart_balance
                .map_or(true, |min| token.smart_balance.is_some_and(|v| v >= min)),
            Gate::MarketCap => conditions
                .min_market_cap
                .map_or(true, |min| token.market_cap.is_some_and(|v| v >= min)),
            Gate::Liquidity => conditions
                .min_liquidity
                .map_or(true, |min| token.liquidity.is_some_and(|v| v >= min)),
            Gate::Age => {
                let above_min = conditions
                    .min_age_hours
                    .map_or(true, |min| token.age_hours.is_some_and(|age| age >= min));
                let below_max = conditions
                    .max_age_hours
                    .map_or(true, |max| token.age_hours.is_some_and(|age| age <= max));
                above_min && below_max
            }
            Gate::AttentionData => !conditions.require_attention_data || token.has_attention_data,
        }
    }
}

/// Run `gates` in order, stopping at the first failure.
pub fn passes_gates(gates: &[Gate], token: &TokenSnapshot, config: &StrategyConfig) -> bool {
    for gate in gates {
        if !gate.check(token, &config.entry_conditions) {
            debug!(
                token_id = %token.token_id,
                strategy_id = config.id,
                gate = gate.name(),
                "Entry gate failed"
            );
            return false;
        }
    }
    true
}
