//! Data models for strategies, executions, trades and token snapshots.

mod execution;
mod strategy;
mod token;
mod trade;

pub use execution::{ExecutionState, ExecutionStatus};
pub use strategy::{
    decode_section, encode_section, ChartConditions, ConvictionLevel, DcaRule, EntryConditions,
    EntryType, InvestmentInstructions, MoonBag, NewStrategy, ProfitTakingInstructions,
    ProfitTarget, RiskManagement, StrategyConfig, TrailingStop, CONFIG_SCHEMA_VERSION,
};
pub use token::{PriceQuote, SourceType, TokenSnapshot};
pub use trade::{NewTrade, TradeLog, TradeSide};
