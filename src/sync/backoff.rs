// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Capped exponential retry delays, tracked per key.

use crate::constants::retry;
use crate::error::RetryClass;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Exponential backoff: `initial * 2^attempt`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    pub fn fast() -> Self {
        Self::new(
            Duration::from_secs(retry::FAST_INITIAL_SECS),
            Duration::from_secs(retry::FAST_MAX_SECS),
        )
    }

    pub fn slow() -> Self {
        Self::new(
            Duration::from_secs(retry::SLOW_INITIAL_SECS),
            Duration::from_secs(retry::SLOW_MAX_SECS),
        )
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(20);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Consecutive failure counters per key
#[derive(Debug)]
pub struct FailureTracker<K> {
    failures: Mutex<HashMap<K, u32>>,
}

impl<K: Eq + Hash + Clone> FailureTracker<K> {
    pub fn new() -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure and return the delay before the next attempt, or
    /// `None` when the error class is not retried.
    pub fn next_delay(&self, key: &K, class: RetryClass) -> Option<Duration> {
        let backoff = match class {
            RetryClass::Never => return None,
            RetryClass::Slow => Backoff::slow(),
            RetryClass::Fast => Backoff::fast(),
        };

        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let attempt = failures.entry(key.clone()).or_insert(0);
        let delay = backoff.delay(*attempt);
        *attempt = attempt.saturating_add(1);
        Some(delay)
    }

    pub fn reset(&self, key: &K) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    #[cfg(test)]
    pub fn failures(&self, key: &K) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}
