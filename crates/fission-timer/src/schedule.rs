// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Schedule expressions.
//!
//! Two forms are accepted:
//!
//! - cron expressions with five or six fields (seconds first when six) and
//!   the `@hourly`/`@daily`/... shorthands, parsed by `croner`
//! - `@every <duration>` with Go-style durations such as `30s`, `1m30s`,
//!   `1.5h` or `250ms`

use std::time::Duration;

use chrono::{DateTime, Utc};
use croner::Cron;
use fission_core::Error;

const EVERY_PREFIX: &str = "@every ";

/// A parsed schedule.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Calendar schedule.
    Cron(Box<Cron>),
    /// Fixed interval from the moment the schedule starts.
    Every(Duration),
}

impl Schedule {
    /// Parse an expression; fails with `invalid-argument`.
    pub fn parse(expr: &str) -> fission_core::Result<Self> {
        let expr = expr.trim();
        if let Some(interval) = expr.strip_prefix(EVERY_PREFIX) {
            let interval = parse_duration(interval.trim())?;
            if interval.is_zero() {
                return Err(Error::InvalidArgument(format!("'{}' has a zero interval", expr)));
            }
            return Ok(Schedule::Every(interval));
        }

        Cron::new(expr)
            .with_seconds_optional()
            .parse()
            .map(|cron| Schedule::Cron(Box::new(cron)))
            .map_err(|e| Error::InvalidArgument(format!("invalid cron expression '{}': {}", expr, e)))
    }

    /// Time from `now` until the next firing, if there is one.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Schedule::Every(interval) => Some(*interval),
            Schedule::Cron(cron) => cron
                .find_next_occurrence(&now, false)
                .ok()
                .and_then(|next| (next - now).to_std().ok()),
        }
    }
}

/// Parse a Go-style duration (`300ms`, `1.5h`, `2h45m`).
pub fn parse_duration(s: &str) -> fission_core::Result<Duration> {
    let invalid = || Error::InvalidArgument(format!("invalid duration '{}'", s));
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        total += value * seconds_per_unit;
    }

    Duration::try_from_secs_f64(total).map_err(|_| invalid())
}
