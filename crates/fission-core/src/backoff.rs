// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Exponential backoff.
//!
//! One policy type shared by the specializer, the message queue handler and
//! the webhook publisher. A policy is `(max_retries, initial_delay,
//! multiplier)`; [`Backoff::retry`] adds a predicate deciding which errors are
//! worth another attempt.

use std::future::Future;
use std::time::Duration;

/// Backoff policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Retries after the first attempt (0 = a single attempt).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Factor applied to the delay after every retry.
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Create a policy.
    pub fn new(max_retries: u32, initial_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_retries,
            initial_delay,
            multiplier,
        }
    }

    /// Total attempts allowed, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-indexed).
    ///
    /// First retry: `initial_delay`; second: `initial_delay * multiplier`; ...
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        if !millis.is_finite() || millis >= u64::MAX as f64 {
            return Duration::from_millis(u64::MAX);
        }
        Duration::from_millis(millis.round() as u64)
    }

    /// Run `op` until it succeeds, the predicate rejects the error, or
    /// attempts run out.
    ///
    /// `op` receives the 0-indexed attempt number. The last error is returned
    /// when retrying stops.
    pub async fn retry<T, E, F, Fut, P>(&self, mut op: F, mut should_retry: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt >= self.max_retries || !should_retry(&e) {
                        return Err(e);
                    }
                    attempt += 1;
                    let delay = self.delay_for_retry(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
