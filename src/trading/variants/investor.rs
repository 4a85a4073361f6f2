//! Investment placement shared by every variant.

use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::api::PriceProvider;
use crate::db::Database;
use crate::models::{EntryType, ExecutionState, NewTrade, StrategyConfig, TokenSnapshot};

/// Prices a fill, sizes it against the strategy caps and records it.
#[derive(Clone)]
pub struct Investor {
    prices: Arc<dyn PriceProvider>,
    db: Arc<Database>,
}

impl Investor {
    pub fn new(prices: Arc<dyn PriceProvider>, db: Arc<Database>) -> Self {
        Self { prices, db }
    }

    /// Place the entry fill. `false` whenever nothing was bought.
    pub async fn invest(&self, execution_id: i64, token: &TokenSnapshot, config: &StrategyConfig) -> bool {
        match self.try_invest(execution_id, token, config).await {
            Ok(Some(execution)) => {
                info!(
                    execution_id,
                    token_id = %token.token_id,
                    strategy_id = config.id,
                    invested = %execution.invested_amount,
                    coins = %execution.remaining_coins,
                    entry = %execution.avg_entry_price,
                    "Investment placed"
                );
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!(
                    execution_id,
                    token_id = %token.token_id,
                    strategy_id = config.id,
                    error = %e,
                    "Investment failed"
                );
                false
            }
        }
    }

    async fn try_invest(
        &self,
        execution_id: i64,
        token: &TokenSnapshot,
        config: &StrategyConfig,
    ) -> Result<Option<ExecutionState>> {
        let Some(quote) = self.prices.get_token_price(&token.token_id).await? else {
            warn!(execution_id, token_id = %token.token_id, "No price available, skipping investment");
            return Ok(None);
        };
        if quote.price <= Decimal::ZERO {
            warn!(execution_id, token_id = %token.token_id, price = %quote.price, "Non-positive price");
            return Ok(None);
        }

        let amount = self.fill_amount(config).await?;
        if amount <= Decimal::ZERO {
            warn!(
                execution_id,
                token_id = %token.token_id,
                strategy_id = config.id,
                "No allocation left under strategy caps"
            );
            return Ok(None);
        }

        let description = match (config.investment.entry_type, &config.investment.dca) {
            (EntryType::Dca, Some(rule)) => {
                // Later intervals are not scheduled
                warn!(
                    execution_id,
                    intervals = rule.intervals,
                    "DCA entry places only the first interval"
                );
                format!("DCA interval 1/{} for {}", rule.intervals, config.name)
            }
            _ => format!("BULK entry for {}", config.name),
        };

        let trade = NewTrade::buy(
            execution_id,
            &token.token_id,
            &token.name,
            amount,
            quote.price,
            description,
        );
        let execution = self.db.record_investment(execution_id, &trade).await?;
        Ok(Some(execution))
    }

    /// First fill amount after the position and portfolio caps.
    async fn fill_amount(&self, config: &StrategyConfig) -> Result<Decimal> {
        let investment = &config.investment;
        let mut amount = investment.initial_fill_amount();

        if let Some(cap) = investment.max_position_size {
            amount = amount.min(cap);
        }
        if let Some(cap) = investment.max_portfolio_allocation {
            let exposure = self.db.strategy_exposure(config.id).await?;
            let headroom = (cap - exposure).max(Decimal::ZERO);
            debug!(strategy_id = config.id, exposure = %exposure, headroom = %headroom, "Portfolio cap");
            amount = amount.min(headroom);
        }

        Ok(amount)
    }
}
