//! Strategy framework: drives tokens through entry, investment, profit
//! taking and stop loss for every configured strategy.
//!
//! Handles:
//! - Idempotent execution creation per (token, strategy)
//! - Entry and chart gating through the token's variant
//! - Investment placement and attempt counting
//! - Sells for profit targets, trailing stops, hold-time exits and stop losses

use std::sync::Arc;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::api::PriceProvider;
use crate::db::Database;
use crate::models::{
    ExecutionState, ExecutionStatus, MoonBag, NewTrade, ProfitTakingInstructions, ProfitTarget,
    SourceType, StrategyConfig, TokenSnapshot,
};

use super::exits::{self, ExitReason, ExitSignal};
use super::ledger::plan_sell;
use super::variants::{StrategyVariant, VariantRegistry};

/// Where a pushed token came from. Manual pushes reach superuser strategies
/// only; scheduled pushes reach the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOrigin {
    Manual,
    Scheduled,
}

impl PushOrigin {
    pub fn targets_superuser(&self) -> bool {
        matches!(self, PushOrigin::Manual)
    }
}

pub struct StrategyFramework {
    db: Arc<Database>,
    prices: Arc<dyn PriceProvider>,
    variants: VariantRegistry,
}

impl StrategyFramework {
    pub fn new(db: Arc<Database>, prices: Arc<dyn PriceProvider>) -> Self {
        let variants = VariantRegistry::new(prices.clone(), db.clone());
        Self {
            db,
            prices,
            variants,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn variant(&self, source: SourceType) -> Result<Arc<dyn StrategyVariant>> {
        self.variants
            .get(source)
            .with_context(|| format!("No strategy variant registered for {}", source))
    }

    /// Current spot price, `None` when the provider has none.
    pub async fn current_price(&self, token_id: &str) -> Result<Option<Decimal>> {
        let quote = self.prices.get_token_price(token_id).await?;
        Ok(quote.map(|q| q.price))
    }

    // ==================== Entry ====================

    /// Run one strategy for a token.
    ///
    /// Returns the already-open execution when there is one, `None` when the
    /// token is rejected, and otherwise the newly created execution (INVESTED
    /// when the investment went through, ACTIVE when it did not).
    pub async fn handle_strategy(
        &self,
        variant: &dyn StrategyVariant,
        token: &TokenSnapshot,
        config: &StrategyConfig,
    ) -> Result<Option<ExecutionState>> {
        if let Some(existing) = self.db.find_open_execution(&token.token_id, config.id).await? {
            debug!(
                execution_id = existing.id,
                token_id = %token.token_id,
                strategy_id = config.id,
                status = %existing.status,
                "Execution already open"
            );
            return Ok(Some(existing));
        }

        if !variant.check_entry_conditions(token, config) {
            debug!(token_id = %token.token_id, strategy_id = config.id, "Entry conditions not met");
            return Ok(None);
        }

        if let Some(max_tokens) = config.investment.max_tokens {
            let open = self.db.count_open_executions(config.id).await?;
            if open >= max_tokens {
                info!(
                    token_id = %token.token_id,
                    strategy_id = config.id,
                    open,
                    max_tokens,
                    "Strategy at max open tokens"
                );
                return Ok(None);
            }
        }

        self.handle_strategy_for_token_without_validation(variant, token, config)
            .await
            .map(Some)
    }

    /// Create the execution and invest without the existence, entry or
    /// capacity checks.
    pub async fn handle_strategy_for_token_without_validation(
        &self,
        variant: &dyn StrategyVariant,
        token: &TokenSnapshot,
        config: &StrategyConfig,
    ) -> Result<ExecutionState> {
        let execution = self.db.create_execution(config, token).await?;
        if execution.status != ExecutionStatus::Active || execution.investment_attempts > 0 {
            // Opened by an earlier push; the monitor owns its retries
            return Ok(execution);
        }

        info!(
            execution_id = execution.id,
            token_id = %token.token_id,
            strategy_id = config.id,
            source = %config.source,
            "Execution started"
        );

        if !variant.validate_chart_conditions(token, config.chart_conditions.as_ref()) {
            info!(execution_id = execution.id, "Chart conditions not met, staying active");
            return Ok(execution);
        }

        self.invest(variant, &execution, token, config).await
    }

    /// Re-attempt the investment of an ACTIVE execution with fresh token
    /// attributes. Every attempt that does not invest is counted.
    pub async fn retry_investment(
        &self,
        execution: &ExecutionState,
        token: &TokenSnapshot,
        config: &StrategyConfig,
    ) -> Result<ExecutionState> {
        let variant = self.variant(config.source)?;

        if !variant.check_entry_conditions(token, config)
            || !variant.validate_chart_conditions(token, config.chart_conditions.as_ref())
        {
            return self
                .note_failed_attempt(execution, "entry conditions no longer met")
                .await;
        }

        self.invest(variant.as_ref(), execution, token, config).await
    }

    /// Count an attempt that produced no fill.
    pub async fn note_failed_attempt(&self, execution: &ExecutionState, reason: &str) -> Result<ExecutionState> {
        let attempts = self.db.record_failed_attempt(execution.id).await?;
        warn!(
            execution_id = execution.id,
            token_id = %execution.token_id,
            attempts,
            reason,
            "Investment not placed"
        );

        let mut execution = execution.clone();
        execution.investment_attempts = attempts;
        Ok(execution)
    }

    async fn invest(
        &self,
        variant: &dyn StrategyVariant,
        execution: &ExecutionState,
        token: &TokenSnapshot,
        config: &StrategyConfig,
    ) -> Result<ExecutionState> {
        if variant.execute_investment(execution.id, token, config).await {
            return self
                .db
                .get_execution(execution.id)
                .await?
                .with_context(|| format!("Execution {} vanished after investment", execution.id));
        }

        self.note_failed_attempt(execution, "investment failed").await
    }

    // ==================== Pushes ====================

    /// Offer a token to every active strategy of its source that matches the
    /// push origin. A failing strategy does not stop the others.
    pub async fn push_token(&self, token: &TokenSnapshot, origin: PushOrigin) -> Result<Vec<ExecutionState>> {
        let variant = self.variant(token.source)?;
        let strategies = self
            .db
            .get_active_strategies(token.source, origin.targets_superuser())
            .await?;

        let mut executions = Vec::new();
        for config in &strategies {
            match self.handle_strategy(variant.as_ref(), token, config).await {
                Ok(Some(execution)) => executions.push(execution),
                Ok(None) => {}
                Err(e) => error!(
                    token_id = %token.token_id,
                    strategy_id = config.id,
                    error = %e,
                    "Strategy failed for pushed token"
                ),
            }
        }

        info!(
            token_id = %token.token_id,
            source = %token.source,
            ?origin,
            strategies = strategies.len(),
            executions = executions.len(),
            "Token pushed"
        );
        Ok(executions)
    }

    /// Push a token to one strategy. `force` skips the entry and capacity
    /// checks.
    pub async fn push_token_to_strategy(
        &self,
        token: &TokenSnapshot,
        strategy_id: i64,
        force: bool,
    ) -> Result<Option<ExecutionState>> {
        let config = self
            .db
            .get_strategy(strategy_id)
            .await?
            .with_context(|| format!("Strategy {} not found", strategy_id))?;

        if !config.active {
            anyhow::bail!("Strategy {} is inactive", strategy_id);
        }
        if config.source != token.source {
            anyhow::bail!(
                "Strategy {} trades {} tokens, not {}",
                strategy_id,
                config.source,
                token.source
            );
        }

        let variant = self.variant(config.source)?;
        if force {
            self.handle_strategy_for_token_without_validation(variant.as_ref(), token, &config)
                .await
                .map(Some)
        } else {
            self.handle_strategy(variant.as_ref(), token, &config).await
        }
    }

    // ==================== Exits ====================

    pub fn get_profit_targets(
        &self,
        execution: &ExecutionState,
        current_price: Decimal,
        instructions: &ProfitTakingInstructions,
    ) -> Option<ProfitTarget> {
        exits::select_profit_target(execution, current_price, instructions)
    }

    pub fn is_stop_loss_hit(
        &self,
        execution: &ExecutionState,
        current_price: Decimal,
        config: &StrategyConfig,
    ) -> bool {
        exits::is_stop_loss_hit(execution, current_price, &config.risk)
    }

    /// Sell `target.size_pct` of the remaining coins, keeping the moon bag
    /// when the position qualifies for one.
    ///
    /// Fired targets are not remembered. The sell lowers the average entry
    /// price, so at an unchanged price the same target fires again on the
    /// next cycle until the cost basis is recovered and the average reaches 0.
    pub async fn take_profits(
        &self,
        execution: &ExecutionState,
        config: &StrategyConfig,
        target: &ProfitTarget,
        current_price: Decimal,
    ) -> Result<ExecutionState> {
        let description = format!(
            "Profit target {}% hit, selling {}%",
            target.price_pct, target.size_pct
        );
        self.sell(
            execution,
            target.size_pct,
            current_price,
            config.profit_taking.active_moon_bag(),
            ExecutionStatus::Completed,
            description,
        )
        .await
    }

    /// Sell everything. No moon bag is kept on a stop loss.
    pub async fn execute_stop_loss(
        &self,
        execution: &ExecutionState,
        config: &StrategyConfig,
        current_price: Decimal,
    ) -> Result<ExecutionState> {
        let target = ProfitTarget::full_exit();
        let description = format!("Stop loss at -{}%", config.risk.stop_loss_pct);
        self.sell(
            execution,
            target.size_pct,
            current_price,
            None,
            ExecutionStatus::StoppedOut,
            description,
        )
        .await
    }

    /// Apply an exit decided by [`exits::evaluate_exit`].
    pub async fn apply_exit(
        &self,
        execution: &ExecutionState,
        config: &StrategyConfig,
        signal: &ExitSignal,
        current_price: Decimal,
    ) -> Result<ExecutionState> {
        match signal.reason {
            ExitReason::StopLoss => self.execute_stop_loss(execution, config, current_price).await,
            ExitReason::ProfitTarget => {
                self.take_profits(execution, config, &signal.target, current_price)
                    .await
            }
            ExitReason::TrailingStop | ExitReason::MaxHoldTime => {
                self.sell(
                    execution,
                    signal.target.size_pct,
                    current_price,
                    config.profit_taking.active_moon_bag(),
                    ExecutionStatus::Completed,
                    signal.reason.as_str().to_string(),
                )
                .await
            }
        }
    }

    async fn sell(
        &self,
        execution: &ExecutionState,
        size_pct: Decimal,
        current_price: Decimal,
        moon_bag: Option<&MoonBag>,
        full_exit_status: ExecutionStatus,
        description: String,
    ) -> Result<ExecutionState> {
        let plan = plan_sell(execution, size_pct, current_price, moon_bag, full_exit_status);
        if plan.is_noop() {
            debug!(execution_id = execution.id, "Nothing to sell");
            return Ok(execution.clone());
        }

        let trade = NewTrade::sell(
            execution.id,
            &execution.token_id,
            &execution.token_name,
            plan.sell_coins,
            current_price,
            description,
        );
        let updated = self
            .db
            .record_sell(execution, &trade, &plan)
            .await
            .with_context(|| format!("Failed to record sell for execution {}", execution.id))?;

        info!(
            execution_id = updated.id,
            token_id = %updated.token_id,
            coins = %plan.sell_coins,
            amount = %plan.sell_amount,
            price = %current_price,
            remaining = %updated.remaining_coins,
            moon_bag = %plan.moon_bag_coins,
            status = %updated.status,
            "Sell executed"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewStrategy, RiskManagement};
    use crate::test_support::{memory_db, sample_new_strategy, sample_token, FixedPrices};
    use crate::trading::LedgerTotals;
    use rust_decimal_macros::dec;

    async fn framework_at(price: Decimal) -> (StrategyFramework, Arc<FixedPrices>) {
        let db = Arc::new(memory_db().await);
        let prices = Arc::new(FixedPrices::with("tok", price));
        (StrategyFramework::new(db, prices.clone()), prices)
    }

    async fn invested_at_one(framework: &StrategyFramework, new: NewStrategy) -> (StrategyConfig, ExecutionState) {
        let config = framework.db().create_strategy(&new).await.unwrap();
        let variant = framework.variant(config.source).unwrap();
        let execution = framework
            .handle_strategy(variant.as_ref(), &sample_token(), &config)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Invested);
        (config, execution)
    }

    #[tokio::test]
    async fn test_push_is_idempotent() {
        let (framework, _prices) = framework_at(dec!(1)).await;
        framework.db().create_strategy(&sample_new_strategy()).await.unwrap();
        let token = sample_token();

        let first = framework.push_token(&token, PushOrigin::Scheduled).await.unwrap();
        let second = framework.push_token(&token, PushOrigin::Scheduled).await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(framework.db().get_trades(first[0].id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_push_origin_selects_strategies() {
        let (framework, _prices) = framework_at(dec!(1)).await;
        let mut manual = sample_new_strategy();
        manual.superuser = true;
        let manual = framework.db().create_strategy(&manual).await.unwrap();
        framework.db().create_strategy(&sample_new_strategy()).await.unwrap();

        let executions = framework
            .push_token(&sample_token(), PushOrigin::Manual)
            .await
            .unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].strategy_id, manual.id);
    }

    #[tokio::test]
    async fn test_entry_rejection_creates_nothing() {
        let (framework, _prices) = framework_at(dec!(1)).await;
        let mut new = sample_new_strategy();
        new.entry_conditions.required_tags = vec!["ai".to_string()];
        framework.db().create_strategy(&new).await.unwrap();

        let executions = framework
            .push_token(&sample_token(), PushOrigin::Scheduled)
            .await
            .unwrap();
        assert!(executions.is_empty());
        assert!(framework.db().list_executions(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_max_tokens_caps_open_executions() {
        let (framework, prices) = framework_at(dec!(1)).await;
        prices.set("tok2", dec!(1));
        let mut new = sample_new_strategy();
        new.investment.max_tokens = Some(1);
        let config = framework.db().create_strategy(&new).await.unwrap();
        let variant = framework.variant(config.source).unwrap();

        let first = framework
            .handle_strategy(variant.as_ref(), &sample_token(), &config)
            .await
            .unwrap();
        assert!(first.is_some());

        let mut other = sample_token();
        other.token_id = "tok2".to_string();
        let second = framework
            .handle_strategy(variant.as_ref(), &other, &config)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_missing_price_keeps_execution_active() {
        let (framework, _prices) = framework_at(dec!(1)).await;
        let config = framework.db().create_strategy(&sample_new_strategy()).await.unwrap();
        let variant = framework.variant(config.source).unwrap();
        let mut token = sample_token();
        token.token_id = "unpriced".to_string();

        let execution = framework
            .handle_strategy(variant.as_ref(), &token, &config)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Active);
        assert_eq!(execution.investment_attempts, 1);
    }

    #[tokio::test]
    async fn test_round_trip_partial_profit() {
        let (framework, _prices) = framework_at(dec!(1.0)).await;
        let (config, execution) = invested_at_one(&framework, sample_new_strategy()).await;
        assert_eq!(execution.invested_amount, dec!(1000));
        assert_eq!(execution.remaining_coins, dec!(1000));

        let target = ProfitTarget {
            price_pct: dec!(40),
            size_pct: dec!(50),
        };
        let price = dec!(1.5);
        assert_eq!(
            framework.get_profit_targets(&execution, price, &ProfitTakingInstructions {
                targets: vec![target],
                ..Default::default()
            }),
            Some(target)
        );

        let after = framework
            .take_profits(&execution, &config, &target, price)
            .await
            .unwrap();

        assert_eq!(after.remaining_coins, dec!(500));
        assert_eq!(after.amount_taken_out, dec!(750));
        assert_eq!(after.avg_entry_price, dec!(0.5));
        assert_eq!(after.status, ExecutionStatus::Invested);

        let trades = framework.db().get_trades(after.id).await.unwrap();
        assert!(LedgerTotals::from_trades(&trades).matches(&after));
    }

    #[tokio::test]
    async fn test_full_exit_keeps_moon_bag() {
        let (framework, _prices) = framework_at(dec!(1.0)).await;
        let mut new = sample_new_strategy();
        new.profit_taking.moon_bag = Some(MoonBag {
            enabled: true,
            size_pct: dec!(20),
            min_profit_pct: dec!(50),
        });
        let (config, execution) = invested_at_one(&framework, new).await;

        let target = ProfitTarget {
            price_pct: dec!(100),
            size_pct: dec!(100),
        };
        let after = framework
            .take_profits(&execution, &config, &target, dec!(3))
            .await
            .unwrap();

        assert_eq!(after.remaining_coins, dec!(200));
        assert_eq!(after.amount_taken_out, dec!(2400));
        assert_eq!(after.status, ExecutionStatus::CompletedWithMoonbag);
        assert!(after.status.is_terminal());

        // A terminal execution frees the pair for a new attempt
        assert!(framework
            .db()
            .find_open_execution("tok", config.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_stop_loss_sells_everything() {
        let (framework, _prices) = framework_at(dec!(1.0)).await;
        let mut new = sample_new_strategy();
        new.risk = RiskManagement {
            stop_loss_enabled: true,
            stop_loss_pct: dec!(10),
        };
        new.profit_taking.moon_bag = Some(MoonBag {
            enabled: true,
            size_pct: dec!(20),
            min_profit_pct: dec!(-100),
        });
        let (config, execution) = invested_at_one(&framework, new).await;

        let price = dec!(0.89);
        assert!(framework.is_stop_loss_hit(&execution, price, &config));

        let after = framework
            .execute_stop_loss(&execution, &config, price)
            .await
            .unwrap();

        assert_eq!(after.status, ExecutionStatus::StoppedOut);
        assert_eq!(after.remaining_coins, Decimal::ZERO);
        assert_eq!(after.amount_taken_out, dec!(890));

        let trades = framework.db().get_trades(after.id).await.unwrap();
        assert!(LedgerTotals::from_trades(&trades).matches(&after));
    }

    #[tokio::test]
    async fn test_push_to_strategy_checks_source_and_state() {
        let (framework, _prices) = framework_at(dec!(1)).await;
        let config = framework.db().create_strategy(&sample_new_strategy()).await.unwrap();

        let mut wrong_source = sample_token();
        wrong_source.source = SourceType::VolumeSpike;
        assert!(framework
            .push_token_to_strategy(&wrong_source, config.id, false)
            .await
            .is_err());

        framework.db().set_strategy_active(config.id, false).await.unwrap();
        assert!(framework
            .push_token_to_strategy(&sample_token(), config.id, false)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_forced_push_skips_entry_gates() {
        let (framework, _prices) = framework_at(dec!(1)).await;
        let mut new = sample_new_strategy();
        new.entry_conditions.required_tags = vec!["ai".to_string()];
        let config = framework.db().create_strategy(&new).await.unwrap();

        let rejected = framework
            .push_token_to_strategy(&sample_token(), config.id, false)
            .await
            .unwrap();
        assert!(rejected.is_none());

        let forced = framework
            .push_token_to_strategy(&sample_token(), config.id, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(forced.status, ExecutionStatus::Invested);
    }
}
