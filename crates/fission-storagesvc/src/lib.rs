// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fission Storage Service - Function Archive Store
//!
//! Stores function package archives by id, on local disk or in an S3 bucket,
//! and serves them to the fetcher sidecars of pool pods.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐      ┌──────────────────────┐
//! │   CLI / controller   │      │   fetcher sidecars   │
//! │  (upload, delete)    │      │     (download)       │
//! └──────────────────────┘      └──────────────────────┘
//!            │                             │
//!            ▼                             ▼
//! ┌──────────────────────────────────────────────────────┐
//! │           fission-storagesvc (This Crate)             │
//! │                     Port 8000                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌─────────────┐  │
//! │  │  HTTP API    │─►│ ArchiveStore │◄─│   Pruner    │  │
//! │  └──────────────┘  └──────────────┘  └─────────────┘  │
//! └──────────────────────────────────────────────────────┘
//!                           │                  │ list packages
//!                           ▼                  ▼
//!                 local dir / S3 bucket   resource store
//! ```
//!
//! # HTTP API
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/v1/archive` | Upload (`uploadfile` + `X-File-Size`), returns `{"id"}` |
//! | `GET` | `/v1/archive?id=` | Download |
//! | `GET` | `/v1/archive` | List ids |
//! | `HEAD` | `/v1/archive?id=` | `X-FISSION-STORAGETYPE`, `X-FISSION-BUCKET` |
//! | `DELETE` | `/v1/archive?id=` | Delete |
//! | `GET` | `/healthz` | Liveness |
//!
//! # Configuration
//!
//! See [`config::Config::from_env`] and [`pruner::PrunerConfig::from_env`].

#![deny(missing_docs)]

/// Object store backed archive storage.
pub mod backend;
/// HTTP client.
pub mod client;
/// Configuration.
pub mod config;
/// Error types.
pub mod error;
/// Unreferenced archive pruning.
pub mod pruner;
/// Embeddable runtime.
pub mod runtime;
/// HTTP API.
pub mod server;

pub use backend::{ArchiveItem, ArchiveStore};
pub use client::{ArchiveClient, ArchiveInfo};
pub use error::{Result, StorageError};
pub use runtime::StorageRuntime;
