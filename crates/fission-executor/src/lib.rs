// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fission Executor - Pre-warmed Pools and Function Specialization
//!
//! Answers "where can I reach function X?" for the router. Every environment
//! gets a deployment of generic pods; on the first request for a function one
//! pod is taken out of its pool, loaded with the function's package, and
//! fronted by a service. The address is cached until the pod sits idle long
//! enough to be reaped, dies, or its function or package changes.
//!
//! # Architecture
//!
//! ```text
//!                ┌──────────────────────┐
//!                │        router        │
//!                └──────────────────────┘
//!                           │ POST /v2/getServiceForFunction
//!                           ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │              fission-executor (This Crate)                │
//! │                        Port 8888                          │
//! │  ┌──────────┐   ┌──────────────┐   ┌──────────────────┐   │
//! │  │ HTTP API │──►│   Executor   │──►│  Function svc    │   │
//! │  └──────────┘   │(singleflight)│   │     cache        │   │
//! │                 └──────────────┘   └──────────────────┘   │
//! │                        │                    ▲             │
//! │                        ▼                    │ reap        │
//! │                 ┌──────────────┐   ┌──────────────────┐   │
//! │                 │ Pool manager │──►│   Generic pool   │   │
//! │                 └──────────────┘   │ chooser, reaper  │   │
//! │                                    └──────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//!                           │                    │ fetch, specialize
//!                           ▼                    ▼
//!                    Kubernetes API        pool pod (fetcher + runtime)
//! ```
//!
//! # HTTP API
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/v2/getServiceForFunction` | `{name, namespace}` in, `host:port` out |
//! | `POST` | `/v2/tapService` | Refresh the access time of an address |
//! | `GET` | `/healthz` | Liveness |
//!
//! # Configuration
//!
//! See [`config::Config::from_env`].

#![deny(missing_docs)]

/// HTTP API.
pub mod api;
/// Removal of objects left by previous executor instances.
pub mod cleanup;
/// HTTP client.
pub mod client;
/// Configuration.
pub mod config;
/// Error types.
pub mod error;
/// Function → address facade.
pub mod executor;
/// Function service cache.
pub mod fscache;
/// Container orchestrator seam.
pub mod orchestrator;
/// Generic pools.
pub mod pool;
/// Pool registry and eager creation.
pub mod poolmgr;
/// Embeddable runtime.
pub mod runtime;
/// Fetcher and runtime specialization calls.
pub mod specialize;
/// Eviction of stale function services.
pub mod watcher;

pub use client::ExecutorClient;
pub use error::{ExecutorError, Result};
pub use executor::Executor;
pub use fscache::{FunctionService, FunctionServiceCache};
pub use runtime::ExecutorRuntime;
