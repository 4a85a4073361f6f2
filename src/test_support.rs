//! Shared fixtures for unit tests: executions, strategies, an in-memory
//! database and in-process providers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::api::{PriceProvider, TokenAttributeProvider};
use crate::db::Database;
use crate::models::{
    ConvictionLevel, EntryConditions, EntryType, ExecutionState, ExecutionStatus,
    InvestmentInstructions, NewStrategy, PriceQuote, ProfitTakingInstructions, RiskManagement,
    SourceType, StrategyConfig, TokenSnapshot, CONFIG_SCHEMA_VERSION,
};

/// Invested execution bought at `invested / coins`, held for five hours.
pub fn invested_execution(invested: Decimal, coins: Decimal) -> ExecutionState {
    let now = Utc::now();
    ExecutionState {
        id: 1,
        strategy_id: 1,
        token_id: "tok".to_string(),
        token_name: "Token".to_string(),
        allotted_amount: invested,
        invested_amount: invested,
        remaining_coins: coins,
        avg_entry_price: invested / coins,
        amount_taken_out: Decimal::ZERO,
        status: ExecutionStatus::Invested,
        peak_price: None,
        investment_attempts: 0,
        created_at: now - Duration::hours(5),
        updated_at: now,
        invested_at: Some(now - Duration::hours(5)),
    }
}

/// Definition with permissive gates, a 1000 BULK allocation and no exits.
pub fn sample_new_strategy() -> NewStrategy {
    NewStrategy {
        schema_version: CONFIG_SCHEMA_VERSION,
        name: "sample".to_string(),
        description: None,
        source: SourceType::PortfolioSummary,
        entry_conditions: EntryConditions::default(),
        chart_conditions: None,
        investment: InvestmentInstructions {
            entry_type: EntryType::Bulk,
            allocated_amount: dec!(1000),
            max_position_size: None,
            max_portfolio_allocation: None,
            max_tokens: None,
            dca: None,
        },
        profit_taking: ProfitTakingInstructions::default(),
        risk: RiskManagement::default(),
        conviction: ConvictionLevel::High,
        active: true,
        superuser: false,
    }
}

pub fn sample_strategy() -> StrategyConfig {
    StrategyConfig::from_new(1, sample_new_strategy(), Utc::now())
}

/// Token that passes every default gate.
pub fn sample_token() -> TokenSnapshot {
    let mut token = TokenSnapshot::new("tok", "Token", SourceType::PortfolioSummary);
    token.market_cap = Some(dec!(2000000));
    token.liquidity = Some(dec!(150000));
    token.smart_balance = Some(dec!(25000));
    token.tags = vec!["meme".to_string()];
    token.age_hours = Some(48);
    token.has_attention_data = true;
    token.attention_score = Some(dec!(70));
    token
}

pub async fn memory_db() -> Database {
    Database::new("sqlite::memory:").await.unwrap()
}

/// SQLite file shared by several `Database` handles, as separate processes
/// would share it. Removed on drop.
pub struct SharedDbFile {
    path: PathBuf,
}

impl SharedDbFile {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("strategist-{}.db", uuid::Uuid::new_v4()));
        Self { path }
    }

    /// Open another independent handle on the file.
    pub async fn open(&self) -> Database {
        Database::new(&format!("sqlite:{}?mode=rwc", self.path.display()))
            .await
            .unwrap()
    }
}

impl Drop for SharedDbFile {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let mut path = self.path.clone().into_os_string();
            path.push(suffix);
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Price provider backed by a settable map. Unknown tokens have no price.
#[derive(Default)]
pub struct FixedPrices {
    prices: Mutex<HashMap<String, Decimal>>,
    failing: Mutex<Vec<String>>,
}

impl FixedPrices {
    pub fn with(token_id: &str, price: Decimal) -> Self {
        let prices = Self::default();
        prices.set(token_id, price);
        prices
    }

    pub fn set(&self, token_id: &str, price: Decimal) {
        self.prices.lock().unwrap().insert(token_id.to_string(), price);
    }

    /// Make lookups for `token_id` fail with a transport error.
    pub fn fail(&self, token_id: &str) {
        self.failing.lock().unwrap().push(token_id.to_string());
    }
}

#[async_trait]
impl PriceProvider for FixedPrices {
    async fn get_token_price(&self, token_id: &str) -> Result<Option<PriceQuote>> {
        if self.failing.lock().unwrap().iter().any(|t| t == token_id) {
            anyhow::bail!("price feed unavailable for {}", token_id);
        }
        let price = self.prices.lock().unwrap().get(token_id).copied();
        Ok(price.map(|price| PriceQuote {
            price,
            fdv: None,
            market_cap: None,
            name: None,
            symbol: None,
        }))
    }
}

/// Attribute provider returning stored snapshots regardless of source.
#[derive(Default)]
pub struct StaticAttributes {
    tokens: Mutex<HashMap<String, TokenSnapshot>>,
}

impl StaticAttributes {
    pub fn insert(&self, token: TokenSnapshot) {
        self.tokens.lock().unwrap().insert(token.token_id.clone(), token);
    }
}

#[async_trait]
impl TokenAttributeProvider for StaticAttributes {
    async fn get_token(&self, source: SourceType, token_id: &str) -> Result<Option<TokenSnapshot>> {
        let token = self.tokens.lock().unwrap().get(token_id).cloned();
        Ok(token.map(|mut token| {
            token.source = source;
            token
        }))
    }
}
