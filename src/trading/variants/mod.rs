//! Strategy variants: one per token source.
//!
//! A variant decides which entry gates apply to tokens from its source and
//! how the entry fill is placed. The framework drives every variant through
//! the same lifecycle.

mod attention;
mod gates;
mod investor;
mod portfolio_summary;
mod pump;
mod volume_spike;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::api::PriceProvider;
use crate::db::Database;
use crate::models::{ChartConditions, SourceType, StrategyConfig, TokenSnapshot};

use attention::AttentionVariant;
use investor::Investor;
use portfolio_summary::PortfolioSummaryVariant;
use pump::PumpVariant;
use volume_spike::VolumeSpikeVariant;

#[async_trait]
pub trait StrategyVariant: Send + Sync {
    fn source(&self) -> SourceType;

    /// Whether the token's current attributes pass the strategy's gates.
    fn check_entry_conditions(&self, token: &TokenSnapshot, config: &StrategyConfig) -> bool;

    /// Chart rules are not evaluated yet; every token passes.
    fn validate_chart_conditions(&self, _token: &TokenSnapshot, _chart: Option<&ChartConditions>) -> bool {
        true
    }

    /// Buy into the token for an ACTIVE execution. Returns whether a fill
    /// was recorded; failures are logged, never propagated.
    async fn execute_investment(
        &self,
        execution_id: i64,
        token: &TokenSnapshot,
        config: &StrategyConfig,
    ) -> bool;
}

/// Variant lookup by token source.
pub struct VariantRegistry {
    variants: HashMap<SourceType, Arc<dyn StrategyVariant>>,
}

impl VariantRegistry {
    /// Registry with the built-in variant for every source.
    pub fn new(prices: Arc<dyn PriceProvider>, db: Arc<Database>) -> Self {
        let investor = Investor::new(prices, db);
        let variants: Vec<Arc<dyn StrategyVariant>> = vec![
            Arc::new(PortfolioSummaryVariant::new(investor.clone())),
            Arc::new(AttentionVariant::new(investor.clone())),
            Arc::new(VolumeSpikeVariant::new(investor.clone())),
            Arc::new(PumpVariant::new(investor)),
        ];

        Self {
            variants: variants
                .into_iter()
                .map(|variant| (variant.source(), variant))
                .collect(),
        }
    }

    pub fn get(&self, source: SourceType) -> Option<Arc<dyn StrategyVariant>> {
        self.variants.get(&source).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::gates::Gate;
    use super::*;
    use crate::models::{ExecutionStatus, NewStrategy};
    use crate::test_support::{memory_db, sample_new_strategy, sample_token, FixedPrices};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    async fn registry_with(prices: FixedPrices) -> (VariantRegistry, Arc<Database>) {
        let db = Arc::new(memory_db().await);
        (VariantRegistry::new(Arc::new(prices), db.clone()), db)
    }

    #[tokio::test]
    async fn test_registry_covers_every_source() {
        let (registry, _db) = registry_with(FixedPrices::default()).await;
        for source in SourceType::ALL {
            let variant = registry.get(source).unwrap();
            assert_eq!(variant.source(), source);
        }
    }

    #[test]
    fn test_gate_subsets_per_source() {
        assert!(portfolio_summary::GATES.contains(&Gate::SmartBalance));
        assert!(!volume_spike::GATES.contains(&Gate::SmartBalance));
        assert!(!volume_spike::GATES.contains(&Gate::AttentionData));
        assert_eq!(attention::GATES.first(), Some(&Gate::AttentionData));
        assert!(pump::GATES.contains(&Gate::Age));
        assert!(!pump::GATES.contains(&Gate::Tags));
    }

    #[tokio::test]
    async fn test_volume_spike_ignores_smart_balance() {
        let (registry, _db) = registry_with(FixedPrices::default()).await;
        let mut new = sample_new_strategy();
        new.entry_conditions.min_smart_balance = Some(dec!(1000000));
        let config = crate::models::StrategyConfig::from_new(1, new, chrono::Utc::now());
        let token = sample_token();

        let portfolio = registry.get(SourceType::PortfolioSummary).unwrap();
        let volume = registry.get(SourceType::VolumeSpike).unwrap();
        assert!(!portfolio.check_entry_conditions(&token, &config));
        assert!(volume.check_entry_conditions(&token, &config));
    }

    #[tokio::test]
    async fn test_attention_requires_feed_data() {
        let (registry, _db) = registry_with(FixedPrices::default()).await;
        let mut new = sample_new_strategy();
        new.entry_conditions.require_attention_data = true;
        let config = crate::models::StrategyConfig::from_new(1, new, chrono::Utc::now());
        let mut token = sample_token();
        token.has_attention_data = false;

        let attention = registry.get(SourceType::AttentionScore).unwrap();
        assert!(!attention.check_entry_conditions(&token, &config));
        assert!(attention.validate_chart_conditions(&token, None));
    }

    async fn active_execution(db: &Database, new: &NewStrategy) -> (crate::models::StrategyConfig, i64) {
        let config = db.create_strategy(new).await.unwrap();
        let execution = db.create_execution(&config, &sample_token()).await.unwrap();
        (config, execution.id)
    }

    #[tokio::test]
    async fn test_bulk_investment_records_fill() {
        let (registry, db) = registry_with(FixedPrices::with("tok", dec!(0.5))).await;
        let (config, execution_id) = active_execution(&db, &sample_new_strategy()).await;

        let variant = registry.get(SourceType::PortfolioSummary).unwrap();
        assert!(variant.execute_investment(execution_id, &sample_token(), &config).await);

        let execution = db.get_execution(execution_id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Invested);
        assert_eq!(execution.invested_amount, dec!(1000));
        assert_eq!(execution.remaining_coins, dec!(2000));
        assert_eq!(execution.avg_entry_price, dec!(0.5));
    }

    #[tokio::test]
    async fn test_no_price_means_no_fill() {
        let (registry, db) = registry_with(FixedPrices::default()).await;
        let (config, execution_id) = active_execution(&db, &sample_new_strategy()).await;

        let variant = registry.get(SourceType::PortfolioSummary).unwrap();
        assert!(!variant.execute_investment(execution_id, &sample_token(), &config).await);

        let execution = db.get_execution(execution_id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Active);
        assert!(db.get_trades(execution_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provider_error_is_swallowed() {
        let prices = FixedPrices::with("tok", dec!(1));
        prices.fail("tok");
        let (registry, db) = registry_with(prices).await;
        let (config, execution_id) = active_execution(&db, &sample_new_strategy()).await;

        let variant = registry.get(SourceType::PortfolioSummary).unwrap();
        assert!(!variant.execute_investment(execution_id, &sample_token(), &config).await);
    }

    #[tokio::test]
    async fn test_caps_limit_fill() {
        let (registry, db) = registry_with(FixedPrices::with("tok", dec!(1))).await;
        let mut new = sample_new_strategy();
        new.investment.max_position_size = Some(dec!(400));
        let (config, execution_id) = active_execution(&db, &new).await;

        let variant = registry.get(SourceType::PortfolioSummary).unwrap();
        assert!(variant.execute_investment(execution_id, &sample_token(), &config).await);

        let execution = db.get_execution(execution_id).await.unwrap().unwrap();
        assert_eq!(execution.invested_amount, dec!(400));
    }

    #[tokio::test]
    async fn test_portfolio_allocation_shrinks_later_fills() {
        let prices = FixedPrices::default();
        for token_id in ["tok", "tok2", "tok3"] {
            prices.set(token_id, dec!(1));
        }
        let (registry, db) = registry_with(prices).await;
        let mut new = sample_new_strategy();
        new.investment.max_portfolio_allocation = Some(dec!(1500));
        let config = db.create_strategy(&new).await.unwrap();
        let variant = registry.get(SourceType::PortfolioSummary).unwrap();

        let mut fills = Vec::new();
        for token_id in ["tok", "tok2", "tok3"] {
            let mut token = sample_token();
            token.token_id = token_id.to_string();
            let execution = db.create_execution(&config, &token).await.unwrap();
            let placed = variant.execute_investment(execution.id, &token, &config).await;
            let execution = db.get_execution(execution.id).await.unwrap().unwrap();
            fills.push((placed, execution.invested_amount));
        }

        assert_eq!(
            fills,
            vec![(true, dec!(1000)), (true, dec!(500)), (false, Decimal::ZERO)]
        );
        assert_eq!(db.strategy_exposure(config.id).await.unwrap(), dec!(1500));
    }

    #[tokio::test]
    async fn test_dca_places_first_interval() {
        let (registry, db) = registry_with(FixedPrices::with("tok", dec!(2))).await;
        let mut new = sample_new_strategy();
        new.investment.entry_type = crate::models::EntryType::Dca;
        new.investment.dca = Some(crate::models::DcaRule {
            intervals: 4,
            delay_minutes: 30,
            amount_per_interval: None,
            max_price_deviation_pct: None,
        });
        let (config, execution_id) = active_execution(&db, &new).await;

        let variant = registry.get(SourceType::PortfolioSummary).unwrap();
        assert!(variant.execute_investment(execution_id, &sample_token(), &config).await);

        let trades = db.get_trades(execution_id).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].amount, dec!(250));
        assert_eq!(trades[0].coins, dec!(125));
    }
}
