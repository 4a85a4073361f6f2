//! Execution state: one attempt to apply a strategy to one token.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Matched, not yet invested
    Active,
    /// Holds a non-zero position
    Invested,
    Completed,
    CompletedWithMoonbag,
    StoppedOut,
    Failed,
}

/// Behaviour attached to a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusInfo {
    pub description: &'static str,
    /// The monitor may still place trades for the execution
    pub can_trade: bool,
    pub terminal: bool,
}

const STATUS_TABLE: [(ExecutionStatus, StatusInfo); 6] = [
    (
        ExecutionStatus::Active,
        StatusInfo {
            description: "Entry matched, waiting for investment",
            can_trade: true,
            terminal: false,
        },
    ),
    (
        ExecutionStatus::Invested,
        StatusInfo {
            description: "Position open and managed",
            can_trade: true,
            terminal: false,
        },
    ),
    (
        ExecutionStatus::Completed,
        StatusInfo {
            description: "Position fully exited",
            can_trade: false,
            terminal: true,
        },
    ),
    (
        ExecutionStatus::CompletedWithMoonbag,
        StatusInfo {
            description: "Profit taken, moon bag retained unmanaged",
            can_trade: false,
            terminal: true,
        },
    ),
    (
        ExecutionStatus::StoppedOut,
        StatusInfo {
            description: "Position exited on stop loss",
            can_trade: false,
            terminal: true,
        },
    ),
    (
        ExecutionStatus::Failed,
        StatusInfo {
            description: "Investment could not be placed",
            can_trade: false,
            terminal: true,
        },
    ),
];

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Active => "ACTIVE",
            ExecutionStatus::Invested => "INVESTED",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::CompletedWithMoonbag => "COMPLETED_WITH_MOONBAG",
            ExecutionStatus::StoppedOut => "STOPPED_OUT",
            ExecutionStatus::Failed => "FAILED",
        }
    }

    pub fn info(&self) -> StatusInfo {
        STATUS_TABLE
            .iter()
            .find(|(status, _)| status == self)
            .map(|(_, info)| *info)
            .unwrap_or(StatusInfo {
                description: "",
                can_trade: false,
                terminal: true,
            })
    }

    pub fn is_terminal(&self) -> bool {
        self.info().terminal
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STATUS_TABLE
            .iter()
            .map(|(status, _)| *status)
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("Unknown execution status: {}", s))
    }
}

/// Balances and status of one (token, strategy) attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionState {
    pub id: i64,
    pub strategy_id: i64,
    pub token_id: String,
    pub token_name: String,

    /// Amount the strategy allotted to this token
    pub allotted_amount: Decimal,

    /// Sum of all buy amounts
    pub invested_amount: Decimal,

    pub remaining_coins: Decimal,

    /// Cost basis per remaining coin, net of amounts already taken out
    pub avg_entry_price: Decimal,

    /// Sum of all sell proceeds
    pub amount_taken_out: Decimal,

    pub status: ExecutionStatus,

    /// Highest price observed while invested
    pub peak_price: Option<Decimal>,

    /// Investment attempts that did not produce a fill
    pub investment_attempts: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub invested_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    /// Return relative to the average entry price, in percent.
    ///
    /// `None` when the execution has no usable cost basis.
    pub fn profit_pct(&self, current_price: Decimal) -> Option<Decimal> {
        if self.avg_entry_price <= Decimal::ZERO {
            return None;
        }
        Some((current_price - self.avg_entry_price) / self.avg_entry_price * dec!(100))
    }

    /// Realized proceeds plus the value of remaining coins, relative to the
    /// amount invested, in percent.
    pub fn total_return_pct(&self, current_price: Decimal) -> Option<Decimal> {
        if self.invested_amount <= Decimal::ZERO {
            return None;
        }
        let total_value = self.amount_taken_out + self.position_value(current_price);
        Some((total_value - self.invested_amount) / self.invested_amount * dec!(100))
    }

    /// Market value of the remaining coins.
    pub fn position_value(&self, current_price: Decimal) -> Decimal {
        self.remaining_coins * current_price
    }

    /// Invested amount not yet recovered through sells.
    pub fn open_cost_basis(&self) -> Decimal {
        (self.invested_amount - self.amount_taken_out).max(Decimal::ZERO)
    }

    /// Whole hours the position has been held.
    pub fn holding_hours(&self, now: DateTime<Utc>) -> Option<i64> {
        self.invested_at.map(|at| (now - at).num_hours())
    }

    pub fn has_position(&self) -> bool {
        self.remaining_coins > Decimal::ZERO
    }
}
