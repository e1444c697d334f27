//! Retry budget and backoff for failed task attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use cadence_core::TaskStatus;

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts a task gets, the first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Multiplier for each subsequent wait (exponential factor).
    pub backoff_factor: f64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Add random jitter (±25% of computed delay) to avoid thundering herd.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 30_000,
            backoff_factor: 2.0,
            max_delay_ms: 600_000,
            jitter: false,
        }
    }
}

/// Where a task goes after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureTransition {
    pub status: TaskStatus,
    pub retry_count: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl RetryPolicy {
    /// Compute the delay after failed attempt `attempt_number` (1-indexed).
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        if attempt_number == 0 {
            return Duration::ZERO;
        }
        let delay_ms = self.base_delay_ms as f64
            * self.backoff_factor.powi((attempt_number - 1) as i32);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64) as u64;

        let delay_ms = if self.jitter {
            // ±25% random jitter.
            let jitter = (delay_ms / 4) as i64;
            let offset: i64 = if jitter > 0 {
                (rand_offset() % (jitter as u64 * 2)) as i64 - jitter
            } else {
                0
            };
            (delay_ms as i64 + offset).max(0) as u64
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms)
    }

    /// Whether a task that has failed `attempts` times gets another attempt.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Transition for a task whose attempt just failed while it carried
    /// `retry_count` earlier failures.
    pub fn after_failure(&self, retry_count: u32, now: DateTime<Utc>) -> FailureTransition {
        let attempts = retry_count.saturating_add(1);
        if self.should_retry(attempts) {
            let delay = chrono::Duration::from_std(self.delay_for(attempts))
                .unwrap_or_else(|_| chrono::Duration::milliseconds(self.max_delay_ms as i64));
            FailureTransition {
                status: TaskStatus::Pending,
                retry_count: attempts,
                next_attempt_at: Some(now + delay),
            }
        } else {
            FailureTransition {
                status: TaskStatus::Failed,
                retry_count: attempts.min(self.max_attempts.max(1)),
                next_attempt_at: None,
            }
        }
    }
}

/// Simple xorshift64 for jitter without pulling in a full rand dep.
fn rand_offset() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEED: AtomicU64 = AtomicU64::new(0x123456789abcdef0);
    let x = SEED.load(Ordering::Relaxed);
    let x = x ^ (x << 13);
    let x = x ^ (x >> 7);
    let x = x ^ (x << 17);
    SEED.store(x, Ordering::Relaxed);
    x
}
