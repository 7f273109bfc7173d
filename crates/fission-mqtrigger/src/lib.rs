// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fission MQ Trigger - Message Queue to Function Bridge
//!
//! One instance serves one broker. Every `MessageQueueTrigger` of that
//! broker type gets a consumer on its topic; each message is POSTed to the
//! trigger's function through the router, and the outcome is published to
//! the trigger's response or error topic.
//!
//! # Architecture
//!
//! ```text
//!   MessageQueueTrigger objects
//!              │ watch + periodic resync
//!              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │             fission-mqtrigger (This Crate)                │
//! │  ┌────────────┐   ┌────────────┐   ┌──────────────────┐   │
//! │  │ Reconciler │──►│ MqtManager │──►│ QueueSubscriber  │   │
//! │  └────────────┘   │ (sub. map) │   │  (supervisors)   │   │
//! │                   └────────────┘   └──────────────────┘   │
//! │                                             │             │
//! │                     ┌───────────────────────┘             │
//! │                     ▼                                     │
//! │  ┌──────────────────────────┐   ┌──────────────────────┐  │
//! │  │ Broker consumer per topic│──►│   MessageHandler     │  │
//! │  │ kafka │ nats │ azure │ mem│   │ retry, resp/err/poison│ │
//! │  └──────────────────────────┘   └──────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//!                                             │ POST
//!                                             ▼
//!                            router /fission-function/<ns>/<fn>
//! ```
//!
//! # Brokers
//!
//! | `MESSAGE_QUEUE_TYPE` | Backend | Feature |
//! |----------------------|---------|---------|
//! | `kafka` | [`broker::kafka`] | `kafka` |
//! | `nats-streaming` | [`broker::nats`] (JetStream) | `nats` (default) |
//! | `azure-storage-queue` | [`broker::azure`] | always |
//! | `memory` | [`broker::memory`] | always |
//!
//! A consumer that loses its broker connection is reported through
//! [`runtime::MqTriggerRuntime::next_failure`]; the binary exits non-zero
//! so the orchestrator restarts it.
//!
//! # Configuration
//!
//! See [`config::Config::from_env`].

#![deny(missing_docs)]

/// Broker backends.
pub mod broker;
/// Configuration.
pub mod config;
/// Error types.
pub mod error;
/// Per-message invocation and result routing.
pub mod handler;
/// Subscriptions and their supervisors.
pub mod manager;
/// Trigger reconciliation.
pub mod reconciler;
/// Embeddable runtime.
pub mod runtime;
/// Topic name validation.
pub mod validate;

pub use broker::{BrokerRegistry, BrokerSettings, InboundMessage, MessageQueue, OutboundMessage, Producer};
pub use error::{BrokerError, Result};
pub use handler::{MessageHandler, Outcome};
pub use manager::{MqtManager, QueueSubscriber, SubscriptionFailure};
pub use runtime::MqTriggerRuntime;
