//! SQLite persistence for strategies, executions and the trade log.
//!
//! Stores everything the engine needs to resume after a restart:
//! - Strategy configurations (nested sections as versioned JSON)
//! - Execution states, one per (token, strategy) attempt
//! - The append-only trade log
//!
//! Amounts, prices and coin quantities are stored as decimal TEXT so ledger
//! arithmetic survives a round trip exactly. Every balance change commits in
//! the same transaction as the trade row that caused it.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, error, info};

use crate::models::{
    decode_section, encode_section, ExecutionState, ExecutionStatus, NewStrategy, NewTrade,
    SourceType, StrategyConfig, TokenSnapshot, TradeLog, TradeSide, CONFIG_SCHEMA_VERSION,
};
use crate::trading::{LedgerTotals, SellPlan};

/// SQL list of statuses the monitor manages.
const OPEN_STATUSES: &str = "('ACTIVE', 'INVESTED')";

/// Name of the lease row serializing monitoring cycles across processes.
const CYCLE_LEASE: &str = "monitor";

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored strategy row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredStrategy {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub source: String,
    pub schema_version: i64,
    pub entry_conditions: String,
    pub chart_conditions: Option<String>,
    pub investment: String,
    pub profit_taking: String,
    pub risk: String,
    pub conviction: String,
    pub is_active: bool,
    pub superuser: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredStrategy {
    /// Decode the nested sections into a typed config.
    pub fn decode(self) -> Result<StrategyConfig> {
        if self.schema_version != i64::from(CONFIG_SCHEMA_VERSION) {
            return Err(crate::error::ConfigError::UnsupportedSchema {
                found: u32::try_from(self.schema_version).unwrap_or(u32::MAX),
                expected: CONFIG_SCHEMA_VERSION,
            }
            .into());
        }

        let chart_conditions = match self.chart_conditions.as_deref() {
            Some(json) => Some(decode_section("chart_conditions", json)?),
            None => None,
        };

        Ok(StrategyConfig {
            id: self.id,
            name: self.name,
            description: self.description,
            source: SourceType::from_str(&self.source)?,
            entry_conditions: decode_section("entry_conditions", &self.entry_conditions)?,
            chart_conditions,
            investment: decode_section("investment", &self.investment)?,
            profit_taking: decode_section("profit_taking", &self.profit_taking)?,
            risk: decode_section("risk", &self.risk)?,
            conviction: self.conviction.parse()?,
            active: self.is_active,
            superuser: self.superuser,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Stored execution row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredExecution {
    pub id: i64,
    pub strategy_id: i64,
    pub token_id: String,
    pub token_name: String,
    pub allotted_amount: String,
    pub invested_amount: String,
    pub remaining_coins: String,
    pub avg_entry_price: String,
    pub amount_taken_out: String,
    pub status: String,
    pub peak_price: Option<String>,
    pub investment_attempts: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub invested_at: Option<DateTime<Utc>>,
}

impl StoredExecution {
    pub fn decode(self) -> Result<ExecutionState> {
        let peak_price = match self.peak_price.as_deref() {
            Some(value) => Some(parse_decimal("peak_price", value)?),
            None => None,
        };

        Ok(ExecutionState {
            id: self.id,
            strategy_id: self.strategy_id,
            token_id: self.token_id,
            token_name: self.token_name,
            allotted_amount: parse_decimal("allotted_amount", &self.allotted_amount)?,
            invested_amount: parse_decimal("invested_amount", &self.invested_amount)?,
            remaining_coins: parse_decimal("remaining_coins", &self.remaining_coins)?,
            avg_entry_price: parse_decimal("avg_entry_price", &self.avg_entry_price)?,
            amount_taken_out: parse_decimal("amount_taken_out", &self.amount_taken_out)?,
            status: self.status.parse()?,
            peak_price,
            investment_attempts: u32::try_from(self.investment_attempts).unwrap_or(0),
            created_at: self.created_at,
            updated_at: self.updated_at,
            invested_at: self.invested_at,
        })
    }
}

/// Stored trade row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTrade {
    pub id: i64,
    pub execution_id: i64,
    pub token_id: String,
    pub token_name: String,
    pub side: String,
    pub amount: String,
    pub price: String,
    pub coins: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl StoredTrade {
    pub fn decode(self) -> Result<TradeLog> {
        let side = TradeSide::parse(&self.side)
            .with_context(|| format!("Unknown trade side {} on trade {}", self.side, self.id))?;

        Ok(TradeLog {
            id: self.id,
            execution_id: self.execution_id,
            token_id: self.token_id,
            token_name: self.token_name,
            side,
            amount: parse_decimal("amount", &self.amount)?,
            price: parse_decimal("price", &self.price)?,
            coins: parse_decimal("coins", &self.coins)?,
            description: self.description,
            created_at: self.created_at,
        })
    }
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value).with_context(|| format!("Invalid decimal in {}: {}", field, value))
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let mut options = SqlitePoolOptions::new().max_connections(5);
        if database_url.contains(":memory:") {
            // Every connection to an in-memory database is a separate database
            options = options
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>);
        }

        let pool = options
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Create tables and indexes if they do not exist.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategy_configs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT,
                source TEXT NOT NULL,
                schema_version INTEGER NOT NULL,
                entry_conditions TEXT NOT NULL,
                chart_conditions TEXT,
                investment TEXT NOT NULL,
                profit_taking TEXT NOT NULL,
                risk TEXT NOT NULL,
                conviction TEXT NOT NULL DEFAULT 'MEDIUM',
                is_active INTEGER NOT NULL DEFAULT 1,
                superuser INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_states (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                strategy_id INTEGER NOT NULL,
                token_id TEXT NOT NULL,
                token_name TEXT NOT NULL DEFAULT '',
                allotted_amount TEXT NOT NULL,
                invested_amount TEXT NOT NULL DEFAULT '0',
                remaining_coins TEXT NOT NULL DEFAULT '0',
                avg_entry_price TEXT NOT NULL DEFAULT '0',
                amount_taken_out TEXT NOT NULL DEFAULT '0',
                status TEXT NOT NULL,
                peak_price TEXT,
                investment_attempts INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                invested_at TEXT,
                FOREIGN KEY (strategy_id) REFERENCES strategy_configs(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                execution_id INTEGER NOT NULL,
                token_id TEXT NOT NULL,
                token_name TEXT NOT NULL DEFAULT '',
                side TEXT NOT NULL,
                amount TEXT NOT NULL,
                price TEXT NOT NULL,
                coins TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                FOREIGN KEY (execution_id) REFERENCES execution_states(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Single row naming the process allowed to run a monitoring cycle
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cycle_leases (
                name TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // At most one open execution per (token, strategy)
        sqlx::query(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_execution_open_token \
             ON execution_states(token_id, strategy_id) WHERE status IN {}",
            OPEN_STATUSES
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_execution_status ON execution_states(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trade_logs_execution ON trade_logs(execution_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_strategy_source ON strategy_configs(source, is_active)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Strategies ====================

    /// Store a validated strategy definition.
    pub async fn create_strategy(&self, strategy: &NewStrategy) -> Result<StrategyConfig> {
        strategy.validate()?;

        let now = Utc::now();
        let chart_conditions = match &strategy.chart_conditions {
            Some(chart) => Some(encode_section("chart_conditions", chart)?),
            None => None,
        };

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO strategy_configs (
                name, description, source, schema_version, entry_conditions, chart_conditions,
                investment, profit_taking, risk, conviction, is_active, superuser,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&strategy.name)
        .bind(&strategy.description)
        .bind(strategy.source.as_str())
        .bind(i64::from(strategy.schema_version))
        .bind(encode_section("entry_conditions", &strategy.entry_conditions)?)
        .bind(chart_conditions)
        .bind(encode_section("investment", &strategy.investment)?)
        .bind(encode_section("profit_taking", &strategy.profit_taking)?)
        .bind(encode_section("risk", &strategy.risk)?)
        .bind(strategy.conviction.as_str())
        .bind(strategy.active)
        .bind(strategy.superuser)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert strategy")?;

        info!(strategy_id = id, name = %strategy.name, source = %strategy.source, "Strategy created");

        Ok(StrategyConfig::from_new(id, strategy.clone(), now))
    }

    pub async fn get_strategy(&self, id: i64) -> Result<Option<StrategyConfig>> {
        let row = sqlx::query_as::<_, StoredStrategy>("SELECT * FROM strategy_configs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(StoredStrategy::decode).transpose()
    }

    /// All strategies, newest first.
    pub async fn list_strategies(&self) -> Result<Vec<StrategyConfig>> {
        let rows = sqlx::query_as::<_, StoredStrategy>("SELECT * FROM strategy_configs ORDER BY id DESC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch strategies")?;

        rows.into_iter().map(StoredStrategy::decode).collect()
    }

    /// Activate or deactivate a strategy. Strategies are never deleted.
    pub async fn set_strategy_active(&self, id: i64, active: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE strategy_configs SET is_active = ?, updated_at = ? WHERE id = ?",
        )
        .bind(active)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Active strategies for a source, limited to one push origin.
    pub async fn get_active_strategies(
        &self,
        source: SourceType,
        superuser: bool,
    ) -> Result<Vec<StrategyConfig>> {
        let rows = sqlx::query_as::<_, StoredStrategy>(
            "SELECT * FROM strategy_configs WHERE source = ? AND superuser = ? AND is_active = 1 ORDER BY id",
        )
        .bind(source.as_str())
        .bind(superuser)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch active strategies")?;

        let mut strategies = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match row.decode() {
                Ok(config) => strategies.push(config),
                Err(e) => error!(strategy_id = id, error = %e, "Skipping undecodable strategy"),
            }
        }
        Ok(strategies)
    }

    // ==================== Executions ====================

    pub async fn get_execution(&self, id: i64) -> Result<Option<ExecutionState>> {
        let row = sqlx::query_as::<_, StoredExecution>("SELECT * FROM execution_states WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(StoredExecution::decode).transpose()
    }

    /// The ACTIVE or INVESTED execution for a (token, strategy) pair.
    pub async fn find_open_execution(
        &self,
        token_id: &str,
        strategy_id: i64,
    ) -> Result<Option<ExecutionState>> {
        let row = sqlx::query_as::<_, StoredExecution>(&format!(
            "SELECT * FROM execution_states WHERE token_id = ? AND strategy_id = ? AND status IN {}",
            OPEN_STATUSES
        ))
        .bind(token_id)
        .bind(strategy_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredExecution::decode).transpose()
    }

    /// Create an ACTIVE execution.
    ///
    /// When an open execution already exists for the pair (including one
    /// created concurrently), that execution is returned instead.
    pub async fn create_execution(
        &self,
        strategy: &StrategyConfig,
        token: &TokenSnapshot,
    ) -> Result<ExecutionState> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, StoredExecution>(
            r#"
            INSERT OR IGNORE INTO execution_states (
                strategy_id, token_id, token_name, allotted_amount, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(strategy.id)
        .bind(&token.token_id)
        .bind(&token.name)
        .bind(strategy.investment.allocated_amount.to_string())
        .bind(ExecutionStatus::Active.as_str())
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to insert execution")?;

        match row {
            Some(row) => {
                let execution = row.decode()?;
                debug!(
                    execution_id = execution.id,
                    token_id = %execution.token_id,
                    strategy_id = strategy.id,
                    "Execution created"
                );
                Ok(execution)
            }
            None => self
                .find_open_execution(&token.token_id, strategy.id)
                .await?
                .context("Execution insert ignored but no open execution found"),
        }
    }

    /// Executions filtered by status, newest first.
    pub async fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
        limit: i64,
    ) -> Result<Vec<ExecutionState>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, StoredExecution>(
                    "SELECT * FROM execution_states WHERE status = ? ORDER BY id DESC LIMIT ?",
                )
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, StoredExecution>(
                    "SELECT * FROM execution_states ORDER BY id DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(StoredExecution::decode).collect()
    }

    /// Open executions of one strategy.
    pub async fn get_open_executions_for_strategy(&self, strategy_id: i64) -> Result<Vec<ExecutionState>> {
        let rows = sqlx::query_as::<_, StoredExecution>(&format!(
            "SELECT * FROM execution_states WHERE strategy_id = ? AND status IN {}",
            OPEN_STATUSES
        ))
        .bind(strategy_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredExecution::decode).collect()
    }

    pub async fn count_open_executions(&self, strategy_id: i64) -> Result<u32> {
        let (count,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM execution_states WHERE strategy_id = ? AND status IN {}",
            OPEN_STATUSES
        ))
        .bind(strategy_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Cost basis still at risk across a strategy's open executions.
    pub async fn strategy_exposure(&self, strategy_id: i64) -> Result<Decimal> {
        let open = self.get_open_executions_for_strategy(strategy_id).await?;
        Ok(open.iter().map(ExecutionState::open_cost_basis).sum())
    }

    /// Every open execution paired with its strategy.
    ///
    /// The config is `None` when the strategy row is missing or cannot be
    /// decoded; the reason is logged here.
    pub async fn get_open_executions_with_config(
        &self,
    ) -> Result<Vec<(ExecutionState, Option<StrategyConfig>)>> {
        let rows = sqlx::query_as::<_, StoredExecution>(&format!(
            "SELECT * FROM execution_states WHERE status IN {} ORDER BY id",
            OPEN_STATUSES
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch open executions")?;

        let strategy_rows = sqlx::query_as::<_, StoredStrategy>(&format!(
            "SELECT * FROM strategy_configs WHERE id IN \
             (SELECT DISTINCT strategy_id FROM execution_states WHERE status IN {})",
            OPEN_STATUSES
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch strategies for open executions")?;

        let mut configs: HashMap<i64, StrategyConfig> = HashMap::new();
        for row in strategy_rows {
            let id = row.id;
            match row.decode() {
                Ok(config) => {
                    configs.insert(id, config);
                }
                Err(e) => error!(strategy_id = id, error = %e, "Failed to decode strategy"),
            }
        }

        rows.into_iter()
            .map(|row| {
                let execution = row.decode()?;
                let config = configs.get(&execution.strategy_id).cloned();
                Ok::<_, anyhow::Error>((execution, config))
            })
            .collect()
    }

    /// Record an investment attempt that produced no fill.
    pub async fn record_failed_attempt(&self, execution_id: i64) -> Result<u32> {
        let (attempts,): (i64,) = sqlx::query_as(
            r#"
            UPDATE execution_states SET
                investment_attempts = investment_attempts + 1,
                updated_at = ?
            WHERE id = ?
            RETURNING investment_attempts
            "#,
        )
        .bind(Utc::now())
        .bind(execution_id)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to count attempt for execution {}", execution_id))?;

        Ok(u32::try_from(attempts).unwrap_or(u32::MAX))
    }

    /// Give up on an ACTIVE execution.
    pub async fn mark_failed(&self, execution_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE execution_states SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(ExecutionStatus::Failed.as_str())
        .bind(Utc::now())
        .bind(execution_id)
        .bind(ExecutionStatus::Active.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn update_peak_price(&self, execution_id: i64, peak_price: Decimal) -> Result<()> {
        sqlx::query("UPDATE execution_states SET peak_price = ?, updated_at = ? WHERE id = ?")
            .bind(peak_price.to_string())
            .bind(Utc::now())
            .bind(execution_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Cycle lease ====================

    /// Take or renew the monitoring-cycle lease for `holder`.
    ///
    /// Succeeds when the lease is free, expired, or already held by
    /// `holder`. Returns false while another holder's lease is live.
    pub async fn try_acquire_cycle_lease(&self, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        let row: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO cycle_leases (name, holder, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE cycle_leases.holder = excluded.holder OR cycle_leases.expires_at <= ?
            RETURNING holder
            "#,
        )
        .bind(CYCLE_LEASE)
        .bind(holder)
        .bind(now.saturating_add(ttl_ms))
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to acquire cycle lease")?;

        Ok(row.is_some())
    }

    /// Give the lease up if `holder` still owns it.
    pub async fn release_cycle_lease(&self, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM cycle_leases WHERE name = ? AND holder = ?")
            .bind(CYCLE_LEASE)
            .bind(holder)
            .execute(&self.pool)
            .await
            .context("Failed to release cycle lease")?;

        Ok(())
    }

    // ==================== Trade log ====================

    pub async fn get_trades(&self, execution_id: i64) -> Result<Vec<TradeLog>> {
        let rows = sqlx::query_as::<_, StoredTrade>(
            "SELECT * FROM trade_logs WHERE execution_id = ? ORDER BY id",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch trades")?;

        rows.into_iter().map(StoredTrade::decode).collect()
    }

    /// Append a BUY fill and rebalance the execution from its full ledger.
    ///
    /// Invested amount, remaining coins and average entry price are
    /// recomputed from every trade row, and the execution moves to INVESTED.
    pub async fn record_investment(&self, execution_id: i64, trade: &NewTrade) -> Result<ExecutionState> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let trade_id = insert_trade(&mut tx, trade, now).await?;

        let trades = sqlx::query_as::<_, StoredTrade>(
            "SELECT * FROM trade_logs WHERE execution_id = ? ORDER BY id",
        )
        .bind(execution_id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(StoredTrade::decode)
        .collect::<Result<Vec<_>>>()?;
        let totals = LedgerTotals::from_trades(&trades);

        let row = sqlx::query_as::<_, StoredExecution>(&format!(
            r#"
            UPDATE execution_states SET
                invested_amount = ?,
                remaining_coins = ?,
                avg_entry_price = ?,
                amount_taken_out = ?,
                status = ?,
                peak_price = COALESCE(peak_price, ?),
                invested_at = COALESCE(invested_at, ?),
                updated_at = ?
            WHERE id = ? AND status IN {}
            RETURNING *
            "#,
            OPEN_STATUSES
        ))
        .bind(totals.invested_amount().to_string())
        .bind(totals.remaining_coins().to_string())
        .bind(totals.avg_entry_price().to_string())
        .bind(totals.sold_amount.to_string())
        .bind(ExecutionStatus::Invested.as_str())
        .bind(trade.price.to_string())
        .bind(now)
        .bind(now)
        .bind(execution_id)
        .fetch_optional(&mut *tx)
        .await?
        .with_context(|| format!("Execution {} is not open", execution_id))?;

        tx.commit().await?;

        debug!(execution_id, trade_id, "Investment recorded");
        row.decode()
    }

    /// Append a SELL fill and apply the planned balances and status.
    ///
    /// The plan was computed from `execution`; the update only applies while
    /// the stored balances still equal that snapshot. A sell planned against
    /// stale balances fails and its trade row is rolled back.
    pub async fn record_sell(
        &self,
        execution: &ExecutionState,
        trade: &NewTrade,
        plan: &SellPlan,
    ) -> Result<ExecutionState> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let trade_id = insert_trade(&mut tx, trade, now).await?;

        let row = sqlx::query_as::<_, StoredExecution>(
            r#"
            UPDATE execution_states SET
                remaining_coins = ?,
                amount_taken_out = ?,
                avg_entry_price = ?,
                status = ?,
                updated_at = ?
            WHERE id = ? AND status = ? AND remaining_coins = ? AND amount_taken_out = ?
            RETURNING *
            "#,
        )
        .bind(plan.remaining_coins.to_string())
        .bind(plan.amount_taken_out.to_string())
        .bind(plan.avg_entry_price.to_string())
        .bind(plan.status.as_str())
        .bind(now)
        .bind(execution.id)
        .bind(ExecutionStatus::Invested.as_str())
        .bind(execution.remaining_coins.to_string())
        .bind(execution.amount_taken_out.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .with_context(|| {
            format!(
                "Execution {} is no longer invested with the balances the sell was planned from",
                execution.id
            )
        })?;

        tx.commit().await?;

        debug!(execution_id = execution.id, trade_id, status = %plan.status, "Sell recorded");
        row.decode()
    }
}

/// Append one trade row and return its id.
async fn insert_trade(conn: &mut SqliteConnection, trade: &NewTrade, now: DateTime<Utc>) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO trade_logs (
            execution_id, token_id, token_name, side, amount, price, coins, description, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(trade.execution_id)
    .bind(&trade.token_id)
    .bind(&trade.token_name)
    .bind(trade.side.as_str())
    .bind(trade.amount.to_string())
    .bind(trade.price.to_string())
    .bind(trade.coins.to_string())
    .bind(&trade.description)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("Failed to append trade for execution {}", trade.execution_id))?;

    Ok(id)
}
