use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

/// Backoff between attempts of a version-checked read-transform-write loop
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct BackoffPolicy {
    /// Maximum number of attempts (0 means unlimited; conflicts are then never surfaced)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.base_delay_ms > self.max_delay_ms {
            return Err(invalid(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }

    /// Whether another attempt is allowed after `attempts` failed ones.
    pub fn allows(
        &self,
        attempts: usize,
    ) -> bool {
        self.max_retries == 0 || attempts < self.max_retries
    }

    /// Jittered exponential delay before attempt number `attempt` (1-based).
    pub fn delay_for(
        &self,
        attempt: usize,
    ) -> Duration {
        if self.max_delay_ms == 0 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(16) as u32;
        let ceiling = self.base_delay_ms.saturating_mul(1u64 << exp).min(self.max_delay_ms).max(1);
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }
}

fn default_max_retries() -> usize {
    0
}
fn default_base_delay_ms() -> u64 {
    1
}
fn default_max_delay_ms() -> u64 {
    50
}
