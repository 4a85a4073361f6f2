//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::DEFAULT_TIMEOUT;

/// Runtime settings for the framework and the execution monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between monitoring cycles
    pub poll_interval_secs: u64,

    /// Timeout for a single provider HTTP request
    pub request_timeout_secs: u64,

    /// How long transient price failures are retried
    pub price_retry_window_secs: u64,

    /// Budget for processing one execution within a cycle
    pub execution_timeout_secs: u64,

    /// Investment attempts before a HIGH conviction execution is failed
    pub max_investment_attempts: u32,

    /// Lifetime of the cross-process cycle lease, renewed per execution
    pub cycle_lease_secs: u64,
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn price_retry_window(&self) -> Duration {
        Duration::from_secs(self.price_retry_window_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    /// Never shorter than two execution timeouts, so a live cycle renews
    /// its lease before it lapses.
    pub fn cycle_lease(&self) -> Duration {
        Duration::from_secs(
            self.cycle_lease_secs
                .max(self.execution_timeout_secs.saturating_mul(2)),
        )
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,       // One cycle per minute
            request_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            price_retry_window_secs: 20,
            execution_timeout_secs: 90,   // Covers a retried price fetch plus writes
            max_investment_attempts: 5,
            cycle_lease_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_lease_outlives_execution_timeout() {
        let config = EngineConfig {
            execution_timeout_secs: 400,
            ..Default::default()
        };
        assert_eq!(config.cycle_lease(), Duration::from_secs(800));
        assert_eq!(EngineConfig::default().cycle_lease(), Duration::from_secs(300));
    }
}
