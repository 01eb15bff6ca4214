//! Reconnect backoff strategies.

use rand::Rng;
use std::time::Duration;

/// How successive reconnect delays grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    Fibonacci,
    Exponential,
}

/// Computes reconnect delays for a sequence of failed attempts.
///
/// `randomisation_factor` jitters each delay by `delay * U(-f, f)`, where
/// `U` is uniform on `[-f, f]`. `fail_after` caps the number of attempts
/// [`Backoff::next_delay`] will produce before returning `None`, giving up
/// the reconnect loop entirely; `None` means retry forever.
#[derive(Debug, Clone)]
pub struct Backoff {
    growth: Growth,
    initial_delay: Duration,
    max_delay: Duration,
    randomisation_factor: f64,
    fail_after: Option<u32>,
}

impl Backoff {
    pub fn new(growth: Growth, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            growth,
            initial_delay,
            max_delay,
            randomisation_factor: 0.0,
            fail_after: None,
        }
    }

    pub fn with_randomisation_factor(mut self, factor: f64) -> Self {
        self.randomisation_factor = factor.clamp(0.0, 1.0);
        self
    }

    pub fn with_fail_after(mut self, attempts: u32) -> Self {
        self.fail_after = Some(attempts);
        self
    }

    /// The base (unjittered) delay before the `attempt`-th reconnect try,
    /// `attempt` starting at 1. Capped at `max_delay`.
    fn base_delay(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        let scaled = match self.growth {
            Growth::Exponential => initial * 2f64.powi(attempt as i32 - 1),
            Growth::Fibonacci => initial * fibonacci(attempt) as f64,
        };
        Duration::from_secs_f64(scaled.min(max).max(0.0))
    }

    /// The delay to wait before the `attempt`-th reconnect try, or `None`
    /// if `attempt` exceeds `fail_after` and the caller should stop
    /// retrying.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if let Some(limit) = self.fail_after {
            if attempt > limit {
                return None;
            }
        }
        let base = self.base_delay(attempt);
        if self.randomisation_factor == 0.0 {
            return Some(base);
        }
        let jitter = rand::thread_rng().gen_range(-self.randomisation_factor..=self.randomisation_factor);
        let jittered = base.as_secs_f64() * (1.0 + jitter);
        Some(Duration::from_secs_f64(jittered.max(0.0)))
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
