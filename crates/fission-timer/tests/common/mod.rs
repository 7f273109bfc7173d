// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for timer integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fission_core::Result;
use fission_core::publisher::{PublishRequest, Publisher};
use fission_core::types::{FunctionReference, Metadata, TimeTrigger, TimeTriggerSpec};

pub const ROUTER_URL: &str = "http://router.test";

/// Publisher that keeps every request it is given.
#[derive(Default)]
pub struct RecordingPublisher {
    requests: Mutex<Vec<PublishRequest>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn requests(&self) -> Vec<PublishRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, request: PublishRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

/// Trigger in the default namespace invoking `tick`.
pub fn time_trigger(name: &str, cron: &str) -> TimeTrigger {
    TimeTrigger {
        metadata: Metadata::new("default", name),
        spec: TimeTriggerSpec {
            cron: cron.to_string(),
            functionref: FunctionReference::by_name("tick"),
        },
    }
}

/// Poll `check` until it holds, panicking after five seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
