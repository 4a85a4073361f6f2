//! Trade log: append-only record of every fill against an execution.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(TradeSide::Buy),
            "SELL" => Some(TradeSide::Sell),
            _ => None,
        }
    }
}

/// Stored fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLog {
    pub id: i64,

    pub execution_id: i64,

    pub token_id: String,

    pub token_name: String,

    pub side: TradeSide,

    /// Quote-currency value of the fill
    pub amount: Decimal,

    /// Fill price per coin
    pub price: Decimal,

    /// Coins bought or sold
    pub coins: Decimal,

    #[serde(default)]
    pub description: String,

    pub created_at: DateTime<Utc>,
}

/// Fill about to be appended to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrade {
    pub execution_id: i64,
    pub token_id: String,
    pub token_name: String,
    pub side: TradeSide,
    pub amount: Decimal,
    pub price: Decimal,
    pub coins: Decimal,
    pub description: String,
}

impl NewTrade {
    /// Buy `amount` worth of coins at `price`.
    pub fn buy(
        execution_id: i64,
        token_id: &str,
        token_name: &str,
        amount: Decimal,
        price: Decimal,
        description: impl Into<String>,
    ) -> Self {
        let coins = if price.is_zero() {
            Decimal::ZERO
        } else {
            amount / price
        };
        Self {
            execution_id,
            token_id: token_id.to_string(),
            token_name: token_name.to_string(),
            side: TradeSide::Buy,
            amount,
            price,
            coins,
            description: description.into(),
        }
    }

    /// Sell `coins` at `price`.
    pub fn sell(
        execution_id: i64,
        token_id: &str,
        token_name: &str,
        coins: Decimal,
        price: Decimal,
        description: impl Into<String>,
    ) -> Self {
        Self {
            execution_id,
            token_id: token_id.to_string(),
            token_name: token_name.to_string(),
            side: TradeSide::Sell,
            amount: coins * price,
            price,
            coins,
            description: description.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_buy_derives_coins() {
        let trade = NewTrade::buy(7, "tok", "Token", dec!(1000), dec!(0.25), "BULK entry");

        assert_eq!(trade.side, TradeSide::Buy);
        assert_eq!(trade.coins, dec!(4000));
        assert_eq!(trade.amount, dec!(1000));
    }

    #[test]
    fn test_sell_derives_amount() {
        let trade = NewTrade::sell(7, "tok", "Token", dec!(500), dec!(1.5), "target 40%");

        assert_eq!(trade.side, TradeSide::Sell);
        assert_eq!(trade.amount, dec!(750));
    }

    #[test]
    fn test_side_parsing() {
        assert_eq!(TradeSide::parse("buy"), Some(TradeSide::Buy));
        assert_eq!(TradeSide::parse(TradeSide::Sell.as_str()), Some(TradeSide::Sell));
        assert_eq!(TradeSide::parse("hold"), None);
    }
}
