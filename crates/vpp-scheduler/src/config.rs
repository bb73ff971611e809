//! Scheduler tuning and reconciliation policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SchedulerError, SchedulerResult};

/// What resync does with dumped items that no desired value claims and the
/// descriptor reports as externally created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExternalItemPolicy {
    /// Leave them alone as `Discovered` nodes.
    #[default]
    Keep,
    /// Take ownership: relabel them as agent-owned and keep them configured,
    /// with no dataplane call.
    Adopt,
}

/// How resync treats descriptors whose dump comes from an agent-side cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachedDumpPolicy {
    /// Take the cache as the dataplane state.
    #[default]
    Trust,
    /// Ignore the cache and re-create every desired item of the descriptor.
    Reapply,
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Attempts for a retriable failure within one transaction.
    pub max_attempts_per_txn: u32,
    /// Attempts across transactions after which a retriable failure is terminal.
    pub max_total_attempts: u32,
    /// Backoff before the first in-transaction retry.
    pub initial_backoff_ms: u64,
    /// Upper bound for the doubled backoff.
    pub max_backoff_ms: u64,
    pub external_items: ExternalItemPolicy,
    pub cached_dumps: CachedDumpPolicy,
    /// Number of transaction results kept for inspection.
    pub history_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_txn: 3,
            max_total_attempts: 10,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            external_items: ExternalItemPolicy::Keep,
            cached_dumps: CachedDumpPolicy::Trust,
            history_size: 32,
        }
    }
}

impl SchedulerConfig {
    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }

    /// Checks the configuration for values the scheduler cannot work with.
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.max_attempts_per_txn == 0 {
            return Err(SchedulerError::Config(
                "max_attempts_per_txn must be at least 1".to_string(),
            ));
        }
        if self.max_total_attempts < self.max_attempts_per_txn {
            return Err(SchedulerError::Config(format!(
                "max_total_attempts ({}) must not be lower than max_attempts_per_txn ({})",
                self.max_total_attempts, self.max_attempts_per_txn
            )));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(SchedulerError::Config(
                "initial_backoff_ms exceeds max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}
