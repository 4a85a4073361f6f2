//! Execution monitor: periodic pass over every open execution.
//!
//! Each cycle:
//! - Applies stop losses, profit targets, trailing stops and hold-time exits
//!   to INVESTED executions at the current price
//! - Retries the investment of HIGH conviction ACTIVE executions
//! - Fails ACTIVE executions that ran out of attempts
//!
//! Cycles never overlap: an in-process lock orders cycles of one monitor and
//! a lease row in the database orders monitors in different processes. One
//! execution's failure or timeout is logged and counted without stopping the
//! rest of the cycle.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::TokenAttributeProvider;
use crate::models::{ExecutionState, ExecutionStatus, StrategyConfig};
use crate::trading::{evaluate_exit, EngineConfig, ExitReason, StrategyFramework};

/// How often a manual trigger re-checks a lease held elsewhere.
const LEASE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Counters for one monitoring cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub processed: u32,
    pub stop_losses: u32,
    pub profit_targets_hit: u32,
    pub trailing_stops: u32,
    pub time_exits: u32,
    pub investments_made: u32,
    pub failed_executions: u32,
    pub skipped_no_price: u32,
    pub errors: u32,
}

impl fmt::Display for MonitorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} stop_losses={} profit_targets={} trailing_stops={} time_exits={} \
             investments={} failed={} skipped_no_price={} errors={}",
            self.processed,
            self.stop_losses,
            self.profit_targets_hit,
            self.trailing_stops,
            self.time_exits,
            self.investments_made,
            self.failed_executions,
            self.skipped_no_price,
            self.errors
        )
    }
}

pub struct ExecutionMonitor {
    framework: Arc<StrategyFramework>,
    attributes: Arc<dyn TokenAttributeProvider>,
    config: EngineConfig,

    // Lease holder name in the database
    instance_id: String,

    // Held for the whole cycle
    cycle_lock: Mutex<()>,

    // Set while a manual cycle runs so the periodic loop skips its tick
    paused: AtomicBool,
}

impl ExecutionMonitor {
    pub fn new(
        framework: Arc<StrategyFramework>,
        attributes: Arc<dyn TokenAttributeProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            framework,
            attributes,
            config,
            instance_id: Uuid::new_v4().to_string(),
            cycle_lock: Mutex::new(()),
            paused: AtomicBool::new(false),
        }
    }

    /// Run cycles until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        info!(
            poll_interval = self.config.poll_interval_secs,
            execution_timeout = self.config.execution_timeout_secs,
            "Starting execution monitor"
        );

        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }

            if self.paused.load(Ordering::SeqCst) {
                debug!("Monitor paused, skipping tick");
                continue;
            }

            if let Some(stats) = self.run_cycle().await {
                if stats.errors > 0 {
                    warn!(%stats, "Cycle finished with errors");
                }
            }
        }

        info!("Execution monitor stopped");
        Ok(())
    }

    /// Run one cycle now, outside the periodic schedule.
    ///
    /// A cycle running elsewhere on the same database is waited for, never
    /// overlapped. Gives up after one lease period.
    pub async fn trigger_now(&self) -> Result<MonitorStats> {
        self.paused.store(true, Ordering::SeqCst);
        let result = self.run_cycle_when_free().await;
        self.paused.store(false, Ordering::SeqCst);
        result
    }

    async fn run_cycle_when_free(&self) -> Result<MonitorStats> {
        let deadline = Instant::now() + self.config.cycle_lease();
        loop {
            if let Some(stats) = self.run_cycle().await {
                return Ok(stats);
            }
            if Instant::now() >= deadline {
                bail!(
                    "Another monitor held the cycle lease for {}s",
                    self.config.cycle_lease().as_secs()
                );
            }
            tokio::time::sleep(LEASE_POLL_INTERVAL).await;
        }
    }

    /// One pass over every open execution.
    ///
    /// Returns None without touching any execution while another monitor
    /// holds the cycle lease.
    pub async fn run_cycle(&self) -> Option<MonitorStats> {
        let _guard = self.cycle_lock.lock().await;
        let cycle_id = Uuid::new_v4();
        let mut stats = MonitorStats::default();

        match self.renew_lease().await {
            Ok(true) => {}
            Ok(false) => {
                debug!(%cycle_id, "Cycle lease held by another monitor, skipping");
                return None;
            }
            Err(e) => {
                error!(%cycle_id, error = %e, "Failed to acquire cycle lease");
                stats.errors += 1;
                return Some(stats);
            }
        }

        self.process_open_executions(cycle_id, &mut stats).await;

        if let Err(e) = self
            .framework
            .db()
            .release_cycle_lease(&self.instance_id)
            .await
        {
            warn!(%cycle_id, error = %e, "Failed to release cycle lease");
        }

        info!(%cycle_id, %stats, "Monitoring cycle complete");
        Some(stats)
    }

    async fn renew_lease(&self) -> Result<bool> {
        self.framework
            .db()
            .try_acquire_cycle_lease(&self.instance_id, self.config.cycle_lease())
            .await
    }

    async fn process_open_executions(&self, cycle_id: Uuid, stats: &mut MonitorStats) {
        let open = match self.framework.db().get_open_executions_with_config().await {
            Ok(open) => open,
            Err(e) => {
                error!(%cycle_id, error = %e, "Failed to load open executions");
                stats.errors += 1;
                return;
            }
        };

        debug!(%cycle_id, count = open.len(), "Monitoring cycle started");

        for (execution, config) in open {
            let Some(config) = config else {
                error!(
                    %cycle_id,
                    execution_id = execution.id,
                    token_id = %execution.token_id,
                    strategy_id = execution.strategy_id,
                    "No usable strategy config for execution"
                );
                stats.errors += 1;
                continue;
            };

            match self.renew_lease().await {
                Ok(true) => {}
                Ok(false) => {
                    error!(%cycle_id, "Cycle lease lost, ending cycle early");
                    stats.errors += 1;
                    return;
                }
                Err(e) => {
                    error!(%cycle_id, error = %e, "Failed to renew cycle lease, ending cycle early");
                    stats.errors += 1;
                    return;
                }
            }

            stats.processed += 1;
            let outcome = tokio::time::timeout(
                self.config.execution_timeout(),
                self.process_execution(&execution, &config, stats),
            )
            .await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        %cycle_id,
                        execution_id = execution.id,
                        token_id = %execution.token_id,
                        error = %e,
                        "Execution processing failed"
                    );
                    stats.errors += 1;
                }
                Err(_) => {
                    error!(
                        %cycle_id,
                        execution_id = execution.id,
                        token_id = %execution.token_id,
                        timeout_secs = self.config.execution_timeout_secs,
                        "Execution processing timed out"
                    );
                    stats.errors += 1;
                }
            }
        }
    }

    async fn process_execution(
        &self,
        execution: &ExecutionState,
        config: &StrategyConfig,
        stats: &mut MonitorStats,
    ) -> Result<()> {
        if !execution.status.info().can_trade {
            return Ok(());
        }

        match execution.status {
            ExecutionStatus::Invested => self.process_invested(execution, config, stats).await,
            ExecutionStatus::Active => self.process_active(execution, config, stats).await,
            _ => Ok(()),
        }
    }

    async fn process_invested(
        &self,
        execution: &ExecutionState,
        config: &StrategyConfig,
        stats: &mut MonitorStats,
    ) -> Result<()> {
        let price = match self.framework.current_price(&execution.token_id).await? {
            Some(price) if price > Decimal::ZERO => price,
            _ => {
                warn!(
                    execution_id = execution.id,
                    token_id = %execution.token_id,
                    "No price available, skipping"
                );
                stats.skipped_no_price += 1;
                return Ok(());
            }
        };

        let mut execution = execution.clone();
        if execution.peak_price.map_or(true, |peak| price > peak) {
            self.framework.db().update_peak_price(execution.id, price).await?;
            execution.peak_price = Some(price);
        }

        let Some(signal) = evaluate_exit(&execution, price, config, Utc::now()) else {
            return Ok(());
        };

        self.framework
            .apply_exit(&execution, config, &signal, price)
            .await?;

        match signal.reason {
            ExitReason::StopLoss => stats.stop_losses += 1,
            ExitReason::ProfitTarget => stats.profit_targets_hit += 1,
            ExitReason::TrailingStop => stats.trailing_stops += 1,
            ExitReason::MaxHoldTime => stats.time_exits += 1,
        }
        Ok(())
    }

    async fn process_active(
        &self,
        execution: &ExecutionState,
        config: &StrategyConfig,
        stats: &mut MonitorStats,
    ) -> Result<()> {
        if !config.conviction.retries_investment() || !config.active {
            return Ok(());
        }

        let max_attempts = self.config.max_investment_attempts;
        if execution.investment_attempts >= max_attempts {
            self.fail(execution, stats).await?;
            return Ok(());
        }

        let updated = match self
            .attributes
            .get_token(config.source, &execution.token_id)
            .await?
        {
            Some(token) => {
                self.framework
                    .retry_investment(execution, &token, config)
                    .await?
            }
            None => {
                self.framework
                    .note_failed_attempt(execution, "token not reported by source")
                    .await?
            }
        };

        if updated.status == ExecutionStatus::Invested {
            stats.investments_made += 1;
        } else if updated.investment_attempts >= max_attempts {
            self.fail(&updated, stats).await?;
        }
        Ok(())
    }

    async fn fail(&self, execution: &ExecutionState, stats: &mut MonitorStats) -> Result<()> {
        if self.framework.db().mark_failed(execution.id).await? {
            warn!(
                execution_id = execution.id,
                token_id = %execution.token_id,
                attempts = execution.investment_attempts,
                "Investment attempts exhausted, execution failed"
            );
            stats.failed_executions += 1;
        }
        Ok(())
    }
}
