//! Retry / Backoff Policy (C10) — a value object computing per-attempt
//! delays for API-invoking handlers. The engine itself never retries a
//! handler invocation; this is consumed by handlers/services that opt in.

use serde::{Deserialize, Serialize};

/// Backoff shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryStrategy {
    Linear,
    Exponential,
    Fibonacci,
    Constant,
}

/// Computes per-attempt delays for a retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub strategy: RetryStrategy,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            strategy: RetryStrategy::Exponential,
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Constructs a policy, asserting the invariants from the data model:
    /// `max_delay_ms >= initial_delay_ms`, `backoff_factor > 0`, `max_attempts >= 0`.
    pub fn new(
        max_attempts: u32,
        initial_delay_ms: u64,
        max_delay_ms: u64,
        strategy: RetryStrategy,
        backoff_factor: f64,
        jitter: bool,
    ) -> Self {
        debug_assert!(max_delay_ms >= initial_delay_ms);
        debug_assert!(backoff_factor > 0.0);
        Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
            strategy,
            backoff_factor,
            jitter,
        }
    }

    /// Delay before attempt `attempt`. Attempt 0 (the first try) never
    /// waits; subsequent attempts apply the configured strategy, clamp to
    /// `max_delay_ms`, then optionally perturb by up to ±20% (jitter).
    ///
    /// `rng` supplies the jitter fraction in `[-0.2, 0.2]`; pass `|| 0.0` for
    /// deterministic callers (tests, `total_possible_delay_ms`).
    pub fn calculate_delay_with_rng(&self, attempt: u32, rng: impl FnOnce() -> f64) -> u64 {
        if attempt == 0 {
            return 0;
        }

        let base = match self.strategy {
            RetryStrategy::Constant => self.initial_delay_ms as f64,
            RetryStrategy::Linear => self.initial_delay_ms as f64 * attempt as f64,
            RetryStrategy::Exponential => {
                self.initial_delay_ms as f64 * self.backoff_factor.powi(attempt as i32 - 1)
            }
            RetryStrategy::Fibonacci => self.initial_delay_ms as f64 * fibonacci(attempt) as f64,
        };

        let clamped = base.min(self.max_delay_ms as f64);

        let with_jitter = if self.jitter {
            let fraction = rng().clamp(-0.2, 0.2);
            (clamped * (1.0 + fraction)).max(0.0)
        } else {
            clamped
        };

        with_jitter.round().min(self.max_delay_ms as f64) as u64
    }

    /// `calculate_delay` without jitter randomness (jitter disabled for the
    /// purposes of this call, matching S4's deterministic expectation).
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        self.calculate_delay_with_rng(attempt, || 0.0)
    }

    /// Upper bound on total delay across all retry attempts (R2): sums
    /// `calculate_delay(k)` for `k in [1, max_attempts]` with jitter at its
    /// maximum (+20%), so a caller can budget a worst-case timeout.
    pub fn total_possible_delay_ms(&self) -> u64 {
        (1..=self.max_attempts)
            .map(|attempt| self.calculate_delay_with_rng(attempt, || 0.2))
            .sum()
    }

    /// Whether another attempt should be made after `attempt` has failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

fn fibonacci(n: u32) -> u64 {
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 1..n {
        let next = a + b;
        a = b;
        b = next;
    }
    a
}
