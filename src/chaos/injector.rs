//! Latency and failure decisions.

use std::sync::Mutex;
use std::time::Duration;

use axum::http::StatusCode;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::policy::{ChaosPolicy, DEFAULT_FAILURE_STATUS};

/// Source of uniform randomness shared by concurrent requests.
///
/// Implementations must be safe to call from many tasks at once without
/// external locking.
pub trait RandomSource: Send + Sync {
    /// Uniform fraction in `[0, 1)`.
    fn fraction(&self) -> f64;

    /// Uniform integer in `[0, bound)`. `bound` is never zero.
    fn below(&self, bound: u64) -> u64;
}

/// Thread-local generator, one per worker thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn fraction(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }

    fn below(&self, bound: u64) -> u64 {
        rand::thread_rng().gen_range(0..bound)
    }
}

/// Deterministic generator behind a mutex.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut guard = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl RandomSource for SeededRandom {
    fn fraction(&self) -> f64 {
        self.with_rng(|rng| rng.gen::<f64>())
    }

    fn below(&self, bound: u64) -> u64 {
        self.with_rng(|rng| rng.gen_range(0..bound))
    }
}

/// What the injector decided for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectionOutcome {
    pub delay: Duration,
    /// Status to answer with instead of forwarding.
    pub short_circuit: Option<StatusCode>,
}

impl InjectionOutcome {
    pub fn is_short_circuit(&self) -> bool {
        self.short_circuit.is_some()
    }
}

/// Decides injected delay and synthetic failures.
#[derive(Debug, Default)]
pub struct FaultInjector<R = ThreadRandom> {
    rng: R,
}

impl FaultInjector<ThreadRandom> {
    pub fn new() -> Self {
        Self { rng: ThreadRandom }
    }
}

impl<R: RandomSource> FaultInjector<R> {
    pub fn with_source(rng: R) -> Self {
        Self { rng }
    }

    /// Draw the delay and failure decision for one request.
    pub fn inject(&self, policy: &ChaosPolicy) -> InjectionOutcome {
        InjectionOutcome {
            delay: self.draw_delay(policy),
            short_circuit: self.draw_failure(policy),
        }
    }

    fn draw_delay(&self, policy: &ChaosPolicy) -> Duration {
        let latency = policy.latency;
        if latency.is_zero() {
            return Duration::ZERO;
        }
        let spread = latency.spread();
        let ms = if spread > 0 {
            latency.min_ms + self.rng.below(spread)
        } else {
            latency.min_ms
        };
        Duration::from_millis(ms)
    }

    fn draw_failure(&self, policy: &ChaosPolicy) -> Option<StatusCode> {
        if self.rng.fraction() >= policy.fail_rate.fraction() {
            return None;
        }
        let code = match policy.error_codes.len() {
            0 => DEFAULT_FAILURE_STATUS,
            1 => policy.error_codes[0],
            n => policy.error_codes[self.rng.below(n as u64) as usize],
        };
        Some(code)
    }
}

/// Suspend the current request for the injected delay.
///
/// Only the calling task sleeps; no lock or pooled connection is held.
pub async fn apply_delay(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
