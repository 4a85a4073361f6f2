//! Ledger accounting: balances derived from the trade log and the math
//! behind every position-reducing sell.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{ExecutionState, ExecutionStatus, MoonBag, TradeLog, TradeSide};

/// Sums over an execution's trade log.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LedgerTotals {
    pub bought_amount: Decimal,
    pub sold_amount: Decimal,
    pub bought_coins: Decimal,
    pub sold_coins: Decimal,
}

impl LedgerTotals {
    pub fn from_trades(trades: &[TradeLog]) -> Self {
        trades.iter().fold(Self::default(), |mut totals, trade| {
            match trade.side {
                TradeSide::Buy => {
                    totals.bought_amount += trade.amount;
                    totals.bought_coins += trade.coins;
                }
                TradeSide::Sell => {
                    totals.sold_amount += trade.amount;
                    totals.sold_coins += trade.coins;
                }
            }
            totals
        })
    }

    pub fn invested_amount(&self) -> Decimal {
        self.bought_amount
    }

    pub fn remaining_coins(&self) -> Decimal {
        (self.bought_coins - self.sold_coins).max(Decimal::ZERO)
    }

    /// Net cost basis per remaining coin; zero when nothing remains.
    pub fn avg_entry_price(&self) -> Decimal {
        let remaining = self.remaining_coins();
        if remaining.is_zero() {
            return Decimal::ZERO;
        }
        ((self.bought_amount - self.sold_amount) / remaining).max(Decimal::ZERO)
    }

    /// Whether the execution's stored balances agree with the log.
    pub fn matches(&self, execution: &ExecutionState) -> bool {
        self.remaining_coins() == execution.remaining_coins
            && self.sold_amount == execution.amount_taken_out
            && self.bought_amount == execution.invested_amount
    }
}

/// Outcome of a planned sell, applied atomically with its trade row.
#[derive(Debug, Clone, PartialEq)]
pub struct SellPlan {
    pub sell_coins: Decimal,
    pub sell_amount: Decimal,
    pub remaining_coins: Decimal,
    pub amount_taken_out: Decimal,
    pub avg_entry_price: Decimal,
    pub status: ExecutionStatus,
    /// Coins reserved as moon bag (zero when not eligible)
    pub moon_bag_coins: Decimal,
}

impl SellPlan {
    pub fn is_noop(&self) -> bool {
        self.sell_coins.is_zero()
    }
}

/// Moon bag qualifies when enabled and the position's total return exceeds
/// the configured gate.
pub fn moon_bag_eligible(execution: &ExecutionState, price: Decimal, moon_bag: &MoonBag) -> bool {
    moon_bag.enabled
        && execution
            .total_return_pct(price)
            .is_some_and(|ret| ret > moon_bag.min_profit_pct)
}

/// Plan a sell of `size_pct` of the remaining coins at `price`.
///
/// The sell size is always a fraction of the current remaining coins, so it
/// can never exceed the position. `full_exit_status` is used when nothing
/// remains afterwards.
pub fn plan_sell(
    execution: &ExecutionState,
    size_pct: Decimal,
    price: Decimal,
    moon_bag: Option<&MoonBag>,
    full_exit_status: ExecutionStatus,
) -> SellPlan {
    let remaining = execution.remaining_coins.max(Decimal::ZERO);
    let size_pct = size_pct.clamp(Decimal::ZERO, dec!(100));

    let mut sell_coins = remaining * size_pct / dec!(100);

    let eligible_bag = moon_bag.filter(|bag| moon_bag_eligible(execution, price, bag));
    let moon_bag_coins = eligible_bag
        .map(|bag| remaining * bag.size_pct.clamp(Decimal::ZERO, dec!(100)) / dec!(100))
        .unwrap_or(Decimal::ZERO);
    if eligible_bag.is_some() {
        sell_coins = sell_coins.min(remaining - moon_bag_coins);
    }
    let sell_coins = sell_coins.clamp(Decimal::ZERO, remaining);

    let sell_amount = sell_coins * price;
    let remaining_coins = remaining - sell_coins;
    let amount_taken_out = execution.amount_taken_out + sell_amount;

    let avg_entry_price = if remaining_coins > Decimal::ZERO {
        ((execution.invested_amount - amount_taken_out) / remaining_coins).max(Decimal::ZERO)
    } else {
        execution.avg_entry_price
    };

    let status = if remaining_coins.is_zero() {
        full_exit_status
    } else if eligible_bag.is_some() && remaining_coins <= moon_bag_coins {
        ExecutionStatus::CompletedWithMoonbag
    } else {
        ExecutionStatus::Invested
    };

    SellPlan {
        sell_coins,
        sell_amount,
        remaining_coins,
        amount_taken_out,
        avg_entry_price,
        status,
        moon_bag_coins,
    }
}
