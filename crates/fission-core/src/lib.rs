// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fission Core - Shared Control Plane Building Blocks
//!
//! This crate holds everything the control plane services have in common:
//! the resource model, error kinds, the desired-state store, trigger
//! reconciliation, and function invocation helpers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                 Kubernetes API (fission.io/v1 CRDs)                   │
//! └──────────────────────────────────────────────────────────────────────┘
//!                                   │ list / watch
//!                                   ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                     fission-core (This Crate)                         │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────┐  ┌────────────┐  │
//! │  │  Resource   │  │ Subscription │  │ Reconciler  │  │  Webhook   │  │
//! │  │   Store     │─►│     Map      │◄─│   Driver    │  │ Publisher  │  │
//! │  └─────────────┘  └──────────────┘  └─────────────┘  └────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//!        │                 │                  │                 │
//!        ▼                 ▼                  ▼                 ▼
//!   fission-executor  fission-mqtrigger  fission-kubewatcher  fission-timer
//! ```
//!
//! # Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`types`] | Environments, packages, functions, triggers |
//! | [`resources`] | CPU/memory quantities and budget clamping |
//! | [`error`] | [`Error`] and [`ErrorKind`] |
//! | [`backoff`] | Exponential backoff with a retry predicate |
//! | [`clock`] | Monotonic clock abstraction |
//! | [`store`] | [`store::ResourceStore`] plus in-memory and CRD implementations |
//! | [`subscription`] | Actor-owned `(namespace, name) → subscription` map |
//! | [`reconcile`] | Diff, subscribe/unsubscribe, periodic + change-driven loop |
//! | [`publisher`] | Bounded-queue HTTP POST with rescheduled retries |
//! | [`invoke`] | Function URLs and invocation header names |
//! | [`labels`] | Label keys on executor-owned resources |
//!
//! # Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `kube` | yes | `KubeResourceStore` and Kubernetes error classification |

#![deny(missing_docs)]

/// Exponential backoff.
pub mod backoff;
/// Monotonic clock.
pub mod clock;
/// Error types.
pub mod error;
/// Function invocation helpers.
pub mod invoke;
/// Resource label keys.
pub mod labels;
/// Webhook publisher.
pub mod publisher;
/// Trigger reconciliation.
pub mod reconcile;
/// CPU and memory budgets.
pub mod resources;
/// Desired-state store.
pub mod store;
/// Subscription map actor.
pub mod subscription;
/// Resource model.
pub mod types;

pub use backoff::Backoff;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{Error, ErrorKind, Result};
pub use types::{ObjectKey, Resource};
