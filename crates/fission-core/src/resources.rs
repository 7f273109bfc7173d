// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container resource budgets.
//!
//! Environments declare CPU and memory requests/limits as Kubernetes quantity
//! strings. Before a pool is created the budget is clamped to
//! `[1m..1000m]` CPU and `[8Mi..1Gi]` memory, and limits are raised to at
//! least the (clamped) requests.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Smallest CPU budget, in millicores.
pub const MIN_CPU_MILLIS: u64 = 1;
/// Largest CPU budget, in millicores.
pub const MAX_CPU_MILLIS: u64 = 1000;
/// Smallest memory budget, in bytes (8Mi).
pub const MIN_MEMORY_BYTES: u64 = 8 * 1024 * 1024;
/// Largest memory budget, in bytes (1Gi).
pub const MAX_MEMORY_BYTES: u64 = 1024 * 1024 * 1024;

/// CPU and memory quantities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceList {
    /// CPU quantity (e.g. `500m`, `1`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Memory quantity (e.g. `128Mi`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Requests and limits for a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Requested resources.
    #[serde(default)]
    pub requests: ResourceList,
    /// Resource limits.
    #[serde(default)]
    pub limits: ResourceList,
}

/// A clamped budget in canonical units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBudget {
    /// CPU request in millicores.
    pub cpu_request_millis: u64,
    /// CPU limit in millicores.
    pub cpu_limit_millis: u64,
    /// Memory request in bytes.
    pub memory_request_bytes: u64,
    /// Memory limit in bytes.
    pub memory_limit_bytes: u64,
}

impl ResourceBudget {
    /// CPU request as a Kubernetes quantity string.
    pub fn cpu_request(&self) -> String {
        format!("{}m", self.cpu_request_millis)
    }

    /// CPU limit as a Kubernetes quantity string.
    pub fn cpu_limit(&self) -> String {
        format!("{}m", self.cpu_limit_millis)
    }

    /// Memory request as a Kubernetes quantity string.
    pub fn memory_request(&self) -> String {
        self.memory_request_bytes.to_string()
    }

    /// Memory limit as a Kubernetes quantity string.
    pub fn memory_limit(&self) -> String {
        self.memory_limit_bytes.to_string()
    }
}

impl ResourceRequirements {
    /// Parse and clamp into a [`ResourceBudget`].
    ///
    /// Missing requests default to the minimum; missing limits default to the
    /// request. Limits never end up below requests.
    pub fn clamped(&self) -> Result<ResourceBudget> {
        let cpu_req = match &self.requests.cpu {
            Some(q) => parse_cpu_millis(q)?,
            None => MIN_CPU_MILLIS,
        }
        .clamp(MIN_CPU_MILLIS, MAX_CPU_MILLIS);

        let mem_req = match &self.requests.memory {
            Some(q) => parse_memory_bytes(q)?,
            None => MIN_MEMORY_BYTES,
        }
        .clamp(MIN_MEMORY_BYTES, MAX_MEMORY_BYTES);

        let cpu_lim = match &self.limits.cpu {
            Some(q) => parse_cpu_millis(q)?,
            None => cpu_req,
        }
        .clamp(MIN_CPU_MILLIS, MAX_CPU_MILLIS)
        .max(cpu_req);

        let mem_lim = match &self.limits.memory {
            Some(q) => parse_memory_bytes(q)?,
            None => mem_req,
        }
        .clamp(MIN_MEMORY_BYTES, MAX_MEMORY_BYTES)
        .max(mem_req);

        Ok(ResourceBudget {
            cpu_request_millis: cpu_req,
            cpu_limit_millis: cpu_lim,
            memory_request_bytes: mem_req,
            memory_limit_bytes: mem_lim,
        })
    }
}

/// Parse a CPU quantity (`250m`, `1`, `0.5`) into millicores.
pub fn parse_cpu_millis(q: &str) -> Result<u64> {
    let q = q.trim();
    if let Some(millis) = q.strip_suffix('m') {
        return millis
            .parse::<u64>()
            .map_err(|_| invalid_quantity("cpu", q));
    }
    let cores: f64 = q.parse().map_err(|_| invalid_quantity("cpu", q))?;
    if !cores.is_finite() || cores < 0.0 {
        return Err(invalid_quantity("cpu", q));
    }
    Ok((cores * 1000.0).round() as u64)
}

/// Parse a memory quantity (`128Mi`, `1Gi`, `512M`, `1024`) into bytes.
pub fn parse_memory_bytes(q: &str) -> Result<u64> {
    const SUFFIXES: &[(&str, u64)] = &[
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("k", 1_000),
        ("K", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
    ];

    let q = q.trim();
    for (suffix, factor) in SUFFIXES {
        if let Some(num) = q.strip_suffix(suffix) {
            let value: f64 = num.parse().map_err(|_| invalid_quantity("memory", q))?;
            if !value.is_finite() || value < 0.0 {
                return Err(invalid_quantity("memory", q));
            }
            return Ok((value * *factor as f64).round() as u64);
        }
    }
    q.parse::<u64>().map_err(|_| invalid_quantity("memory", q))
}

fn invalid_quantity(what: &str, q: &str) -> Error {
    Error::InvalidArgument(format!("invalid {} quantity '{}'", what, q))
}
