// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scripted watch source.
//!
//! Every successful [`WatchSource::watch`] call opens a channel-backed
//! stream and records the resource version it was opened at. Tests push
//! events into the most recent stream, end it, or make the next opens fail.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::{Notify, mpsc};

use super::{Result, WatchError, WatchEvent, WatchSource, WatchTarget};

#[derive(Default)]
struct State {
    opened: Vec<(WatchTarget, String)>,
    current: Option<mpsc::UnboundedSender<WatchEvent>>,
    failing_opens: usize,
    failed_opens: usize,
}

/// In-memory [`WatchSource`].
#[derive(Default)]
pub struct MockWatchSource {
    state: Mutex<State>,
    opened: Notify,
}

impl MockWatchSource {
    /// A source with no open watches.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `n` opens fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.state().failing_opens = n;
    }

    /// Opens that were made to fail.
    pub fn failed_opens(&self) -> usize {
        self.state().failed_opens
    }

    /// Resource versions of every successful open, in order.
    pub fn opened_versions(&self) -> Vec<String> {
        self.state().opened.iter().map(|(_, rv)| rv.clone()).collect()
    }

    /// Targets of every successful open, in order.
    pub fn opened_targets(&self) -> Vec<WatchTarget> {
        self.state().opened.iter().map(|(t, _)| t.clone()).collect()
    }

    /// Push an event into the most recently opened stream.
    ///
    /// Returns false if no stream is open.
    pub fn send(&self, event: WatchEvent) -> bool {
        self.state()
            .current
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// End the most recently opened stream, as a server timeout would.
    pub fn end_stream(&self) {
        self.state().current = None;
    }

    /// Wait until at least `n` watches have been opened.
    pub async fn wait_for_opens(&self, n: usize) {
        loop {
            let notified = self.opened.notified();
            if self.state().opened.len() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl WatchSource for MockWatchSource {
    async fn watch(
        &self,
        target: &WatchTarget,
        resource_version: &str,
    ) -> Result<BoxStream<'static, WatchEvent>> {
        let rx = {
            let mut state = self.state();
            if state.failing_opens > 0 {
                state.failing_opens -= 1;
                state.failed_opens += 1;
                return Err(WatchError::Api("connection refused".to_string()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            state.opened.push((target.clone(), resource_version.to_string()));
            state.current = Some(tx);
            rx
        };
        self.opened.notify_waiters();

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }
}
