// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fission Kube Watcher - Kubernetes Events to Function Bridge
//!
//! Every `KubernetesWatchTrigger` gets a watch on its object kind, namespace
//! and selectors. Each event is serialized to JSON and posted to the
//! trigger's function through the router by the shared webhook publisher.
//!
//! # Architecture
//!
//! ```text
//!   KubernetesWatchTrigger objects
//!              │ watch + periodic resync
//!              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │            fission-kubewatcher (This Crate)               │
//! │  ┌────────────┐   ┌─────────────┐   ┌─────────────────┐   │
//! │  │ Reconciler │──►│ KubeWatcher │──►│ WatchSubscription│  │
//! │  └────────────┘   │ (sub. map)  │   │ per trigger, RV │   │
//! │                   └─────────────┘   └─────────────────┘   │
//! │                                       │            │      │
//! │                          WatchSource ◄┘            ▼      │
//! │                                        ┌──────────────────┐│
//! │                                        │ WebhookPublisher ││
//! │                                        └──────────────────┘│
//! └──────────────────────────────────────────────────────────┘
//!          │ watch                                 │ POST
//!          ▼                                       ▼
//!   Kubernetes API                 router /fission-function/<ns>/<fn>
//! ```
//!
//! # Request
//!
//! | Header | Value |
//! |--------|-------|
//! | `Content-Type` | `application/json` |
//! | `X-Kubernetes-Event-Type` | `ADDED`, `MODIFIED` or `DELETED` |
//! | `X-Kubernetes-Object-Type` | object kind, e.g. `Pod` |
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
/// Watch stream seam.
pub mod source;
/// Per-trigger watch loop.
pub mod subscription;
/// Subscriptions keyed by trigger.
pub mod watcher;

pub use runtime::KubeWatcherRuntime;
pub use source::{KubeWatchSource, MockWatchSource, WatchEvent, WatchSource};
pub use subscription::{SubscriptionConfig, WatchSubscription};
pub use watcher::{KubeWatcher, WatchFailure};
