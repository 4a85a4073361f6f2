//! Exit rules for invested executions: stop loss, profit targets, trailing
//! stop and maximum hold time.
//!
//! Evaluation order is fixed. A stop loss always wins; profit targets come
//! next; the trailing stop and hold-time exits only fire when no target does.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

use crate::models::{
    ExecutionState, ProfitTakingInstructions, ProfitTarget, RiskManagement, StrategyConfig,
    TrailingStop,
};

/// Reason for a position-reducing sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    ProfitTarget,
    TrailingStop,
    MaxHoldTime,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop-loss triggered",
            ExitReason::ProfitTarget => "profit target hit",
            ExitReason::TrailingStop => "trailing stop triggered",
            ExitReason::MaxHoldTime => "max hold time reached",
        }
    }
}

/// Exit decided for this cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitSignal {
    pub reason: ExitReason,
    pub target: ProfitTarget,
}

/// Highest target whose threshold the current profit meets.
///
/// Returns `None` below the minimum-profit gate or when the execution has no
/// cost basis to measure profit against.
pub fn select_profit_target(
    execution: &ExecutionState,
    current_price: Decimal,
    instructions: &ProfitTakingInstructions,
) -> Option<ProfitTarget> {
    let profit_pct = execution.profit_pct(current_price)?;
    if profit_pct < instructions.min_profit_pct {
        return None;
    }

    instructions
        .targets_by_threshold_desc()
        .into_iter()
        .find(|target| profit_pct >= target.price_pct)
}

/// Loss at or beyond the configured stop.
pub fn is_stop_loss_hit(execution: &ExecutionState, current_price: Decimal, risk: &RiskManagement) -> bool {
    if !risk.stop_loss_enabled
        || execution.invested_amount <= Decimal::ZERO
        || execution.avg_entry_price <= Decimal::ZERO
    {
        return false;
    }

    execution
        .profit_pct(current_price)
        .is_some_and(|pct| pct <= -risk.stop_loss_pct)
}

/// Price fell `trail_pct` below the peak after the peak armed the stop.
pub fn is_trailing_stop_hit(
    execution: &ExecutionState,
    current_price: Decimal,
    trailing: &TrailingStop,
) -> bool {
    let Some(peak) = execution.peak_price else {
        return false;
    };
    if peak <= Decimal::ZERO {
        return false;
    }

    // With the cost basis fully recovered the stop is armed from the start
    let armed = match execution.profit_pct(peak) {
        Some(peak_profit) => peak_profit >= trailing.activation_pct,
        None => true,
    };
    armed && current_price <= peak * (dec!(100) - trailing.trail_pct) / dec!(100)
}

pub fn is_max_hold_exceeded(execution: &ExecutionState, max_hold_hours: i64, now: DateTime<Utc>) -> bool {
    execution
        .holding_hours(now)
        .is_some_and(|held| held >= max_hold_hours)
}

/// Decide the single exit, if any, for an invested execution this cycle.
pub fn evaluate_exit(
    execution: &ExecutionState,
    current_price: Decimal,
    config: &StrategyConfig,
    now: DateTime<Utc>,
) -> Option<ExitSignal> {
    if !execution.has_position() {
        return None;
    }

    if is_stop_loss_hit(execution, current_price, &config.risk) {
        warn!(
            execution_id = execution.id,
            token_id = %execution.token_id,
            price = %current_price,
            entry = %execution.avg_entry_price,
            stop = %config.risk.stop_loss_pct,
            "Stop loss triggered"
        );
        return Some(ExitSignal {
            reason: ExitReason::StopLoss,
            target: ProfitTarget::full_exit(),
        });
    }

    let profit = &config.profit_taking;
    if let Some(target) = select_profit_target(execution, current_price, profit) {
        debug!(
            execution_id = execution.id,
            token_id = %execution.token_id,
            threshold = %target.price_pct,
            size = %target.size_pct,
            "Profit target matched"
        );
        return Some(ExitSignal {
            reason: ExitReason::ProfitTarget,
            target,
        });
    }

    if let Some(trailing) = &profit.trailing_stop {
        if is_trailing_stop_hit(execution, current_price, trailing) {
            info!(
                execution_id = execution.id,
                token_id = %execution.token_id,
                peak = ?execution.peak_price,
                price = %current_price,
                "Trailing stop triggered"
            );
            return Some(ExitSignal {
                reason: ExitReason::TrailingStop,
                target: ProfitTarget::full_exit(),
            });
        }
    }

    if let Some(max_hold) = profit.max_hold_hours {
        if is_max_hold_exceeded(execution, max_hold, now) {
            info!(
                execution_id = execution.id,
                token_id = %execution.token_id,
                max_hold_hours = max_hold,
                "Max hold time reached"
            );
            return Some(ExitSignal {
                reason: ExitReason::MaxHoldTime,
                target: ProfitTarget::full_exit(),
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{invested_execution, sample_strategy};
    use chrono::Duration;

    fn targets(thresholds: &[(Decimal, Decimal)]) -> ProfitTakingInstructions {
        ProfitTakingInstructions {
            targets: thresholds
                .iter()
                .map(|&(price_pct, size_pct)| ProfitTarget { price_pct, size_pct })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_highest_met_target_wins() {
        let exec = invested_execution(dec!(1000), dec!(1000));
        let instructions = targets(&[
            (dec!(10), dec!(10)),
            (dec!(50), dec!(50)),
            (dec!(25), dec!(25)),
        ]);

        let target = select_profit_target(&exec, dec!(1.30), &instructions).unwrap();
        assert_eq!(target.price_pct, dec!(25));

        let target = select_profit_target(&exec, dec!(1.60), &instructions).unwrap();
        assert_eq!(target.price_pct, dec!(50));

        assert!(select_profit_target(&exec, dec!(1.05), &instructions).is_none());
    }

    #[test]
    fn test_min_profit_gate() {
        let exec = invested_execution(dec!(1000), dec!(1000));
        let mut instructions = targets(&[(dec!(10), dec!(50))]);
        instructions.min_profit_pct = dec!(20);

        assert!(select_profit_target(&exec, dec!(1.15), &instructions).is_none());
        assert!(select_profit_target(&exec, dec!(1.25), &instructions).is_some());
    }

    #[test]
    fn test_stop_loss_threshold() {
        let exec = invested_execution(dec!(1000), dec!(1000));
        let risk = RiskManagement {
            stop_loss_enabled: true,
            stop_loss_pct: dec!(10),
        };

        assert!(is_stop_loss_hit(&exec, dec!(0.89), &risk));
        assert!(is_stop_loss_hit(&exec, dec!(0.90), &risk));
        assert!(!is_stop_loss_hit(&exec, dec!(0.91), &risk));

        let disabled = RiskManagement {
            stop_loss_enabled: false,
            ..risk
        };
        assert!(!is_stop_loss_hit(&exec, dec!(0.5), &disabled));
    }

    #[test]
    fn test_stop_loss_needs_cost_basis() {
        let mut exec = invested_execution(dec!(1000), dec!(1000));
        exec.avg_entry_price = Decimal::ZERO;
        let risk = RiskManagement {
            stop_loss_enabled: true,
            stop_loss_pct: dec!(10),
        };

        assert!(!is_stop_loss_hit(&exec, dec!(0.1), &risk));
    }

    #[test]
    fn test_stop_loss_takes_precedence_over_targets() {
        let exec = invested_execution(dec!(1000), dec!(1000));
        let mut config = sample_strategy();
        config.risk = RiskManagement {
            stop_loss_enabled: true,
            stop_loss_pct: dec!(10),
        };
        // A gate and threshold low enough that the target also matches
        config.profit_taking = targets(&[(dec!(-50), dec!(25))]);
        config.profit_taking.min_profit_pct = dec!(-100);
        assert!(select_profit_target(&exec, dec!(0.85), &config.profit_taking).is_some());

        let signal = evaluate_exit(&exec, dec!(0.85), &config, Utc::now()).unwrap();
        assert_eq!(signal.reason, ExitReason::StopLoss);
        assert_eq!(signal.target.size_pct, dec!(100));
    }

    #[test]
    fn test_trailing_stop_arms_after_activation() {
        let mut exec = invested_execution(dec!(1000), dec!(1000));
        let trailing = TrailingStop {
            activation_pct: dec!(30),
            trail_pct: dec!(10),
        };

        exec.peak_price = Some(dec!(1.2));
        assert!(!is_trailing_stop_hit(&exec, dec!(1.0), &trailing));

        exec.peak_price = Some(dec!(2.0));
        assert!(!is_trailing_stop_hit(&exec, dec!(1.85), &trailing));
        assert!(is_trailing_stop_hit(&exec, dec!(1.8), &trailing));
    }

    #[test]
    fn test_max_hold_exit_when_nothing_else_fires() {
        let exec = invested_execution(dec!(1000), dec!(1000));
        let mut config = sample_strategy();
        config.profit_taking = targets(&[(dec!(100), dec!(50))]);
        config.profit_taking.max_hold_hours = Some(4);

        let signal = evaluate_exit(&exec, dec!(1.1), &config, Utc::now()).unwrap();
        assert_eq!(signal.reason, ExitReason::MaxHoldTime);

        let signal = evaluate_exit(&exec, dec!(1.1), &config, Utc::now() - Duration::hours(2));
        assert!(signal.is_none());
    }
}
