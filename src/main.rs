//! Token Strategy Execution Engine
//!
//! Runs configurable trading strategies over tokens surfaced by external
//! discovery feeds: entry gating, investment, profit taking with moon bags,
//! and stop losses, monitored on a fixed schedule.

mod api;
mod db;
mod error;
mod models;
mod monitor;
mod trading;

#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::api::{AttributeClient, PriceClient, TokenAttributeProvider};
use crate::db::Database;
use crate::models::{ExecutionState, ExecutionStatus, NewStrategy, SourceType, TokenSnapshot};
use crate::monitor::ExecutionMonitor;
use crate::trading::{EngineConfig, PushOrigin, StrategyFramework};

/// Strategy execution engine CLI.
#[derive(Parser)]
#[command(name = "token-strategist")]
#[command(about = "Run trading strategies over discovered tokens", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:./strategist.db?mode=rwc")]
    database: String,

    /// Base URL of the price API
    #[arg(long, env = "PRICE_API_URL", default_value = "http://localhost:8080")]
    price_api: String,

    /// Base URL of the token attribute API
    #[arg(long, env = "ATTRIBUTE_API_URL", default_value = "http://localhost:8081")]
    attribute_api: String,

    /// HTTP request timeout in seconds
    #[arg(long, default_value = "30")]
    request_timeout: u64,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a strategy from a JSON definition
    CreateStrategy {
        /// Path to the strategy JSON file
        file: PathBuf,
    },

    /// List all strategies
    Strategies,

    /// Activate a strategy
    Activate { id: i64 },

    /// Deactivate a strategy (it is kept for history)
    Deactivate { id: i64 },

    /// Push a token through every active strategy for its source
    Push {
        /// Token identifier
        token_id: String,

        /// Source feed (portfolio_summary, attention_score, volume_spike, pump_detection)
        #[arg(short, long)]
        source: String,

        /// Manual push: reaches superuser strategies instead of scheduled ones
        #[arg(long)]
        manual: bool,
    },

    /// Push a token to one strategy
    PushTo {
        token_id: String,
        strategy_id: i64,

        /// Skip entry and capacity checks
        #[arg(long)]
        force: bool,
    },

    /// Run the execution monitor until Ctrl-C
    Monitor {
        /// Seconds between cycles
        #[arg(short, long, default_value = "60")]
        interval: u64,

        /// Investment attempts before a HIGH conviction execution fails
        #[arg(long, default_value = "5")]
        max_attempts: u32,

        /// Per-execution processing timeout in seconds
        #[arg(long, default_value = "90")]
        execution_timeout: u64,
    },

    /// Run one monitoring cycle now
    MonitorOnce {
        #[arg(long, default_value = "5")]
        max_attempts: u32,
    },

    /// List executions
    Executions {
        /// Filter by status (ACTIVE, INVESTED, COMPLETED, ...)
        #[arg(long)]
        status: Option<String>,

        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Show the trade log of one execution
    Trades { execution_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(cli.log_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut engine = EngineConfig {
        request_timeout_secs: cli.request_timeout,
        ..Default::default()
    };

    // Initialize database and providers
    let db = Arc::new(Database::new(&cli.database).await?);
    let prices = Arc::new(
        PriceClient::new(&cli.price_api, engine.request_timeout())?
            .with_retry_window(engine.price_retry_window()),
    );
    let attributes = Arc::new(AttributeClient::new(&cli.attribute_api, engine.request_timeout())?);
    let framework = Arc::new(StrategyFramework::new(db.clone(), prices));

    match cli.command {
        Commands::CreateStrategy { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let strategy = NewStrategy::from_json(&json)
                .with_context(|| format!("Rejected strategy definition {}", file.display()))?;

            let created = db.create_strategy(&strategy).await?;
            println!(
                "Created strategy {} ({}) for {} tokens",
                created.id, created.name, created.source
            );
        }

        Commands::Strategies => {
            let strategies = db.list_strategies().await?;
            if strategies.is_empty() {
                println!("No strategies. Use 'token-strategist create-strategy <file>' to add one.");
                return Ok(());
            }

            println!(
                "\n{:>5} {:<24} {:<18} {:<8} {:>10} {:<7} {:<6}",
                "ID", "NAME", "SOURCE", "CONV", "ALLOC", "ACTIVE", "SUPER"
            );
            println!("{}", "-".repeat(84));

            for s in strategies {
                println!(
                    "{:>5} {:<24} {:<18} {:<8} {:>10} {:<7} {:<6}",
                    s.id,
                    truncate(&s.name, 22),
                    s.source.as_str(),
                    s.conviction.as_str(),
                    s.investment.allocated_amount,
                    if s.active { "yes" } else { "no" },
                    if s.superuser { "yes" } else { "no" }
                );
            }
        }

        Commands::Activate { id } => set_active(&db, id, true).await?,

        Commands::Deactivate { id } => set_active(&db, id, false).await?,

        Commands::Push {
            token_id,
            source,
            manual,
        } => {
            let source: SourceType = source.parse()?;
            let token = fetch_token(attributes.as_ref(), source, &token_id).await?;
            let origin = if manual {
                PushOrigin::Manual
            } else {
                PushOrigin::Scheduled
            };

            let executions = framework.push_token(&token, origin).await?;
            if executions.is_empty() {
                println!("No strategy accepted {}", token_id);
            } else {
                print_executions(&executions);
            }
        }

        Commands::PushTo {
            token_id,
            strategy_id,
            force,
        } => {
            let strategy = db
                .get_strategy(strategy_id)
                .await?
                .with_context(|| format!("Strategy {} not found", strategy_id))?;
            let token = fetch_token(attributes.as_ref(), strategy.source, &token_id).await?;

            match framework
                .push_token_to_strategy(&token, strategy_id, force)
                .await?
            {
                Some(execution) => print_executions(&[execution]),
                None => println!("Strategy {} rejected {}", strategy_id, token_id),
            }
        }

        Commands::Monitor {
            interval,
            max_attempts,
            execution_timeout,
        } => {
            engine.poll_interval_secs = interval;
            engine.max_investment_attempts = max_attempts;
            engine.execution_timeout_secs = execution_timeout;

            info!(
                interval = interval,
                max_attempts = max_attempts,
                "Starting strategy monitor"
            );

            let monitor = ExecutionMonitor::new(framework, attributes, engine);
            monitor.run().await?;
        }

        Commands::MonitorOnce { max_attempts } => {
            engine.max_investment_attempts = max_attempts;
            let monitor = ExecutionMonitor::new(framework, attributes, engine);
            let stats = monitor.trigger_now().await?;
            println!("{}", stats);
        }

        Commands::Executions { status, limit } => {
            let status = status
                .as_deref()
                .map(str::parse::<ExecutionStatus>)
                .transpose()?;
            let executions = db.list_executions(status, limit).await?;

            if executions.is_empty() {
                println!("No executions.");
                return Ok(());
            }
            print_executions(&executions);
        }

        Commands::Trades { execution_id } => {
            let trades = db.get_trades(execution_id).await?;
            if trades.is_empty() {
                println!("No trades for execution {}", execution_id);
                return Ok(());
            }

            println!(
                "\n{:>6} {:<5} {:>14} {:>14} {:>16}  {}",
                "ID", "SIDE", "AMOUNT", "PRICE", "COINS", "DESCRIPTION"
            );
            println!("{}", "-".repeat(90));

            for t in trades {
                println!(
                    "{:>6} {:<5} {:>14.4} {:>14.8} {:>16.4}  {}",
                    t.id,
                    t.side.as_str(),
                    t.amount,
                    t.price,
                    t.coins,
                    t.description
                );
            }
        }
    }

    Ok(())
}

async fn set_active(db: &Database, id: i64, active: bool) -> Result<()> {
    if !db.set_strategy_active(id, active).await? {
        anyhow::bail!("Strategy {} not found", id);
    }
    println!(
        "Strategy {} {}",
        id,
        if active { "activated" } else { "deactivated" }
    );
    Ok(())
}

async fn fetch_token(
    attributes: &dyn TokenAttributeProvider,
    source: SourceType,
    token_id: &str,
) -> Result<TokenSnapshot> {
    attributes
        .get_token(source, token_id)
        .await?
        .with_context(|| format!("Token {} not reported by {}", token_id, source))
}

fn print_executions(executions: &[ExecutionState]) {
    println!(
        "\n{:>6} {:>6} {:<20} {:<22} {:>12} {:>16} {:>12} {:>12}",
        "ID", "STRAT", "TOKEN", "STATUS", "INVESTED", "REMAINING", "AVG ENTRY", "TAKEN OUT"
    );
    println!("{}", "-".repeat(116));

    for e in executions {
        println!(
            "{:>6} {:>6} {:<20} {:<22} {:>12.2} {:>16.4} {:>12.8} {:>12.2}",
            e.id,
            e.strategy_id,
            truncate(&e.token_name, 18),
            e.status.as_str(),
            e.invested_amount,
            e.remaining_coins,
            e.avg_entry_price,
            e.amount_taken_out
        );
    }
}

/// Truncate a string to max length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
