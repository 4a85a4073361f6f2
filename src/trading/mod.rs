//! Trading logic: strategy variants, the framework driving them, exit rules
//! and ledger accounting.

mod config;
mod exits;
mod framework;
mod ledger;
mod variants;

pub use config::EngineConfig;
pub use exits::{evaluate_exit, ExitReason};
pub use framework::{PushOrigin, StrategyFramework};
pub use ledger::{plan_sell, LedgerTotals, SellPlan};
