// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fission Timer - Cron Schedules to Function Invocations
//!
//! Every `TimeTrigger` gets a cron job. When the schedule fires, the job
//! posts an empty body to the trigger's function through the router, using
//! the shared webhook publisher for retries.
//!
//! # Architecture
//!
//! ```text
//!        TimeTrigger objects
//!              │ watch + periodic resync
//!              ▼
//! ┌───────────────────────────────────────────────────┐
//! │           fission-timer (This Crate)               │
//! │  ┌────────────┐   ┌───────┐   ┌─────────────────┐  │
//! │  │ Reconciler │──►│ Timer │──►│ cron job / trig. │  │
//! │  └────────────┘   └───────┘   └─────────────────┘  │
//! │                                        │           │
//! │                              ┌──────────────────┐  │
//! │                              │ WebhookPublisher │  │
//! │                              └──────────────────┘  │
//! └───────────────────────────────────────────────────┘
//!                                        │ POST
//!                                        ▼
//!                      router /fission-function/<ns>/<fn>
//! ```
//!
//! # Schedules
//!
//! | Form | Example |
//! |------|---------|
//! | 5-field cron | `*/5 * * * *` |
//! | 6-field cron (seconds first) | `*/10 * * * * *` |
//! | Shortcut | `@hourly`, `@daily` |
//! | Fixed interval | `@every 1m30s` |
//!
//! Requests carry `X-Fission-Timer-Name: <trigger name>`.
//!
//! # Configuration
//!
//! See [`config::Config::from_env`].

#![deny(missing_docs)]

/// Configuration.
pub mod config;
/// Trigger reconciliation.
pub mod reconciler;
/// Embeddable runtime.
pub mod runtime;
/// Cron expression parsing.
pub mod schedule;
/// Cron jobs keyed by trigger.
pub mod timer;

pub use runtime::TimerRuntime;
pub use schedule::Schedule;
pub use timer::Timer;
