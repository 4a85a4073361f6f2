//! Strategy configuration: entry gates, investment sizing, profit taking,
//! risk management and moon-bag rules.
//!
//! Nested sections are persisted as JSON blobs tagged with a schema version
//! and decoded once at load time into the typed structures below.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use super::SourceType;

/// Version of the nested section layout written by this build.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// How the allocated amount is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryType {
    /// Single fill for the whole allocation
    Bulk,
    /// Allocation split into scheduled intervals
    Dca,
}

/// Strategy priority. Only HIGH conviction executions are retried
/// automatically when their investment could not be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConvictionLevel {
    High,
    #[default]
    Medium,
    Low,
}

impl ConvictionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConvictionLevel::High => "HIGH",
            ConvictionLevel::Medium => "MEDIUM",
            ConvictionLevel::Low => "LOW",
        }
    }

    pub fn retries_investment(&self) -> bool {
        matches!(self, ConvictionLevel::High)
    }
}

impl fmt::Display for ConvictionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConvictionLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HIGH" => Ok(Self::High),
            "MEDIUM" => Ok(Self::Medium),
            "LOW" => Ok(Self::Low),
            other => anyhow::bail!("Unknown conviction level: {}", other),
        }
    }
}

/// Attribute gates a token must pass before a strategy considers it.
///
/// Every threshold is optional; an unset threshold is not checked. A set
/// threshold fails when the token does not report the attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryConditions {
    /// Tags the token must carry (subset check)
    #[serde(default)]
    pub required_tags: Vec<String>,

    #[serde(default)]
    pub min_market_cap: Option<Decimal>,

    #[serde(default)]
    pub min_liquidity: Option<Decimal>,

    /// Minimum balance held by tracked smart wallets
    #[serde(default)]
    pub min_smart_balance: Option<Decimal>,

    #[serde(default)]
    pub min_age_hours: Option<i64>,

    #[serde(default)]
    pub max_age_hours: Option<i64>,

    /// Require the attention feed to have data for the token
    #[serde(default)]
    pub require_attention_data: bool,
}

/// Technical-analysis gate. Not evaluated yet; carried so strategies can
/// declare it ahead of time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartConditions {
    #[serde(default)]
    pub rules: Vec<String>,
}

/// Dollar-cost averaging schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaRule {
    /// Number of fills the allocation is split into
    pub intervals: u32,

    /// Delay between fills
    #[serde(default)]
    pub delay_minutes: u32,

    /// Amount per fill; defaults to allocated_amount / intervals
    #[serde(default)]
    pub amount_per_interval: Option<Decimal>,

    /// Maximum deviation from the first fill price for later fills
    #[serde(default)]
    pub max_price_deviation_pct: Option<Decimal>,
}

/// Investment sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentInstructions {
    pub entry_type: EntryType,

    /// Amount allotted to one token, in quote currency
    pub allocated_amount: Decimal,

    /// Cap on a single fill
    #[serde(default)]
    pub max_position_size: Option<Decimal>,

    /// Cap on the open cost basis across all of this strategy's executions
    #[serde(default)]
    pub max_portfolio_allocation: Option<Decimal>,

    /// Cap on concurrently open executions for this strategy
    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub dca: Option<DcaRule>,
}

impl InvestmentInstructions {
    /// Amount of the first (and only synchronous) fill before caps.
    pub fn initial_fill_amount(&self) -> Decimal {
        match (self.entry_type, &self.dca) {
            (EntryType::Dca, Some(rule)) => rule.amount_per_interval.unwrap_or_else(|| {
                if rule.intervals == 0 {
                    self.allocated_amount
                } else {
                    self.allocated_amount / Decimal::from(rule.intervals)
                }
            }),
            _ => self.allocated_amount,
        }
    }
}

/// Sell `size_pct` of the remaining position once profit reaches `price_pct`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfitTarget {
    pub price_pct: Decimal,
    pub size_pct: Decimal,
}

impl ProfitTarget {
    /// Synthetic target used for stop-loss and other full exits.
    pub fn full_exit() -> Self {
        Self {
            price_pct: Decimal::ZERO,
            size_pct: dec!(100),
        }
    }
}

/// Trailing stop measured from the highest price seen while invested.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingStop {
    /// Profit the peak must have reached before the stop arms
    pub activation_pct: Decimal,
    /// Drop from the peak that triggers the exit
    pub trail_pct: Decimal,
}

/// Fraction of the position kept unmanaged after a profitable exit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoonBag {
    #[serde(default)]
    pub enabled: bool,
    /// Share of remaining coins to preserve
    pub size_pct: Decimal,
    /// Total return the position must exceed to qualify
    #[serde(default)]
    pub min_profit_pct: Decimal,
}

/// Profit-taking rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfitTakingInstructions {
    #[serde(default)]
    pub targets: Vec<ProfitTarget>,

    /// Profit gate below which no target is considered
    #[serde(default)]
    pub min_profit_pct: Decimal,

    #[serde(default)]
    pub max_hold_hours: Option<i64>,

    #[serde(default)]
    pub trailing_stop: Option<TrailingStop>,

    #[serde(default)]
    pub moon_bag: Option<MoonBag>,
}

impl ProfitTakingInstructions {
    /// Targets ordered by descending price threshold.
    pub fn targets_by_threshold_desc(&self) -> Vec<ProfitTarget> {
        let mut targets = self.targets.clone();
        targets.sort_by(|a, b| b.price_pct.cmp(&a.price_pct));
        targets
    }

    /// Moon-bag rule when present and switched on.
    pub fn active_moon_bag(&self) -> Option<&MoonBag> {
        self.moon_bag.as_ref().filter(|m| m.enabled)
    }
}

/// Loss protection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskManagement {
    #[serde(default)]
    pub stop_loss_enabled: bool,
    #[serde(default)]
    pub stop_loss_pct: Decimal,
}

impl Default for RiskManagement {
    fn default() -> Self {
        Self {
            stop_loss_enabled: false,
            stop_loss_pct: dec!(20),
        }
    }
}

fn default_schema_version() -> u32 {
    CONFIG_SCHEMA_VERSION
}

fn default_true() -> bool {
    true
}

/// Strategy definition as submitted by an administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStrategy {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub source: SourceType,

    pub entry_conditions: EntryConditions,

    #[serde(default)]
    pub chart_conditions: Option<ChartConditions>,

    pub investment: InvestmentInstructions,

    #[serde(default)]
    pub profit_taking: ProfitTakingInstructions,

    #[serde(default)]
    pub risk: RiskManagement,

    #[serde(default)]
    pub conviction: ConvictionLevel,

    #[serde(default = "default_true")]
    pub active: bool,

    /// Strategy receives manually pushed tokens instead of scheduled ones
    #[serde(default)]
    pub superuser: bool,
}

impl NewStrategy {
    /// Parse a JSON definition and validate it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let strategy: NewStrategy = serde_json::from_str(json).map_err(|source| {
            ConfigError::Malformed {
                section: "strategy",
                source,
            }
        })?;
        strategy.validate()?;
        Ok(strategy)
    }

    /// Reject malformed definitions before they are stored.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema_version != CONFIG_SCHEMA_VERSION {
            return Err(ConfigError::UnsupportedSchema {
                found: self.schema_version,
                expected: CONFIG_SCHEMA_VERSION,
            });
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingField("name"));
        }

        let entry = &self.entry_conditions;
        if let (Some(min), Some(max)) = (entry.min_age_hours, entry.max_age_hours) {
            if min > max {
                return Err(ConfigError::invalid(
                    "entry_conditions.min_age_hours",
                    format!("{} exceeds max_age_hours {}", min, max),
                ));
            }
        }
        if entry.min_age_hours.is_some_and(|h| h < 0) || entry.max_age_hours.is_some_and(|h| h < 0) {
            return Err(ConfigError::invalid("entry_conditions.age", "must be non-negative"));
        }

        let investment = &self.investment;
        if investment.allocated_amount <= Decimal::ZERO {
            return Err(ConfigError::invalid(
                "investment.allocated_amount",
                "must be positive",
            ));
        }
        for (field, cap) in [
            ("investment.max_position_size", investment.max_position_size),
            ("investment.max_portfolio_allocation", investment.max_portfolio_allocation),
        ] {
            if cap.is_some_and(|c| c <= Decimal::ZERO) {
                return Err(ConfigError::invalid(field, "must be positive when set"));
            }
        }
        if investment.max_tokens == Some(0) {
            return Err(ConfigError::invalid("investment.max_tokens", "must be at least 1"));
        }
        if investment.entry_type == EntryType::Dca {
            let rule = investment
                .dca
                .as_ref()
                .ok_or(ConfigError::MissingField("investment.dca"))?;
            if rule.intervals == 0 {
                return Err(ConfigError::invalid("investment.dca.intervals", "must be at least 1"));
            }
            if rule.amount_per_interval.is_some_and(|a| a <= Decimal::ZERO) {
                return Err(ConfigError::invalid(
                    "investment.dca.amount_per_interval",
                    "must be positive when set",
                ));
            }
        }

        let profit = &self.profit_taking;
        for target in &profit.targets {
            if target.price_pct <= Decimal::ZERO {
                return Err(ConfigError::invalid(
                    "profit_taking.targets.price_pct",
                    format!("{} is not a positive threshold", target.price_pct),
                ));
            }
            if target.size_pct <= Decimal::ZERO || target.size_pct > dec!(100) {
                return Err(ConfigError::invalid(
                    "profit_taking.targets.size_pct",
                    format!("{} is outside (0, 100]", target.size_pct),
                ));
            }
        }
        if profit.max_hold_hours.is_some_and(|h| h <= 0) {
            return Err(ConfigError::invalid("profit_taking.max_hold_hours", "must be positive"));
        }
        if let Some(trailing) = &profit.trailing_stop {
            if trailing.trail_pct <= Decimal::ZERO || trailing.trail_pct >= dec!(100) {
                return Err(ConfigError::invalid(
                    "profit_taking.trailing_stop.trail_pct",
                    "must be within (0, 100)",
                ));
            }
            if trailing.activation_pct < Decimal::ZERO {
                return Err(ConfigError::invalid(
                    "profit_taking.trailing_stop.activation_pct",
                    "must be non-negative",
                ));
            }
        }
        if let Some(moon_bag) = &profit.moon_bag {
            if moon_bag.size_pct < Decimal::ZERO || moon_bag.size_pct >= dec!(100) {
                return Err(ConfigError::invalid(
                    "profit_taking.moon_bag.size_pct",
                    "must be within [0, 100)",
                ));
            }
        }

        if self.risk.stop_loss_enabled
            && (self.risk.stop_loss_pct <= Decimal::ZERO || self.risk.stop_loss_pct > dec!(100))
        {
            return Err(ConfigError::invalid("risk.stop_loss_pct", "must be within (0, 100]"));
        }

        Ok(())
    }
}

/// Stored strategy with its decoded sections.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub source: SourceType,
    pub entry_conditions: EntryConditions,
    pub chart_conditions: Option<ChartConditions>,
    pub investment: InvestmentInstructions,
    pub profit_taking: ProfitTakingInstructions,
    pub risk: RiskManagement,
    pub conviction: ConvictionLevel,
    pub active: bool,
    pub superuser: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StrategyConfig {
    pub fn from_new(id: i64, new: NewStrategy, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: new.name,
            description: new.description,
            source: new.source,
            entry_conditions: new.entry_conditions,
            chart_conditions: new.chart_conditions,
            investment: new.investment,
            profit_taking: new.profit_taking,
            risk: new.risk,
            conviction: new.conviction,
            active: new.active,
            superuser: new.superuser,
            created_at,
            updated_at: created_at,
        }
    }
}

/// Encode one nested section for storage.
pub fn encode_section<T: Serialize>(section: &'static str, value: &T) -> Result<String, ConfigError> {
    serde_json::to_string(value).map_err(|source| ConfigError::Malformed { section, source })
}

/// Decode one stored nested section.
pub fn decode_section<T: DeserializeOwned>(section: &'static str, json: &str) -> Result<T, ConfigError> {
    serde_json::from_str(json).map_err(|source| ConfigError::Malformed { section, source })
}
