// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cron jobs keyed by trigger.
//!
//! [`Timer`] is a handle to an actor task that owns one cron job per time
//! trigger. A job sleeps until its schedule's next firing and then posts an
//! empty body to the trigger's function through the webhook publisher, with
//! the trigger name in `X-Fission-Timer-Name`.
//!
//! [`Timer::sync`] applies the desired trigger set: new triggers get a job,
//! missing ones lose theirs, and a trigger whose schedule or target changed
//! has its job replaced. Other edits only update the stored trigger, so an
//! unrelated change does not reset a running schedule.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use fission_core::invoke::{HEADER_TIMER_NAME, function_url};
use fission_core::publisher::{PublishRequest, Publisher};
use fission_core::reconcile::SyncReport;
use fission_core::types::{FunctionReferenceType, TimeTrigger};
use fission_core::{Error, ObjectKey, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::schedule::Schedule;

const COMMAND_QUEUE_CAPACITY: usize = 16;

struct CronJob {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl CronJob {
    fn stop(self) {
        self.cancel.cancel();
        drop(self.task);
    }
}

struct Entry {
    trigger: TimeTrigger,
    job: CronJob,
}

enum Command {
    Sync {
        triggers: Vec<TimeTrigger>,
        reply: oneshot::Sender<SyncReport>,
    },
    List {
        reply: oneshot::Sender<Vec<(ObjectKey, TimeTrigger)>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the timer actor.
#[derive(Clone)]
pub struct Timer {
    tx: mpsc::Sender<Command>,
}

impl Timer {
    /// Spawn the actor. Jobs publish through `publisher` to functions behind
    /// `router_url`.
    pub fn start(publisher: Arc<dyn Publisher>, router_url: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let actor = TimerActor {
            publisher,
            router_url: router_url.into(),
            entries: BTreeMap::new(),
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    async fn call<R>(&self, cmd: Command, rx: oneshot::Receiver<R>) -> Result<R> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| Error::Fatal("timer stopped".to_string()))?;
        rx.await
            .map_err(|_| Error::Fatal("timer dropped reply".to_string()))
    }

    /// Make the running jobs match `triggers`.
    ///
    /// Triggers with an unparseable schedule or an unsupported function
    /// reference are counted as failed and retried on the next sync.
    pub async fn sync(&self, triggers: Vec<TimeTrigger>) -> Result<SyncReport> {
        let (reply, rx) = oneshot::channel();
        self.call(Command::Sync { triggers, reply }, rx).await
    }

    /// Every scheduled trigger, ordered by key.
    pub async fn list(&self) -> Result<Vec<(ObjectKey, TimeTrigger)>> {
        let (reply, rx) = oneshot::channel();
        self.call(Command::List { reply }, rx).await
    }

    /// Stop every job and the actor.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.call(Command::Shutdown { reply }, rx).await
    }
}

struct TimerActor {
    publisher: Arc<dyn Publisher>,
    router_url: String,
    entries: BTreeMap<ObjectKey, Entry>,
}

impl TimerActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Sync { triggers, reply } => {
                    let _ = reply.send(self.sync(triggers));
                }
                Command::List { reply } => {
                    let list = self
                        .entries
                        .iter()
                        .map(|(k, e)| (k.clone(), e.trigger.clone()))
                        .collect();
                    let _ = reply.send(list);
                }
                Command::Shutdown { reply } => {
                    self.stop_all();
                    let _ = reply.send(());
                    break;
                }
            }
        }
        self.stop_all();
        debug!("Timer actor stopped");
    }

    fn stop_all(&mut self) {
        for (key, entry) in std::mem::take(&mut self.entries) {
            entry.job.stop();
            debug!(trigger = %key, "Cron stopped");
        }
    }

    fn sync(&mut self, triggers: Vec<TimeTrigger>) -> SyncReport {
        let mut report = SyncReport::default();
        let mut seen = BTreeSet::new();

        for trigger in triggers {
            let key = trigger.metadata.key();
            seen.insert(key.clone());

            let reschedule = match self.entries.get_mut(&key) {
                None => true,
                Some(entry) if schedule_changed(&entry.trigger, &trigger) => true,
                Some(entry) => {
                    entry.trigger = trigger.clone();
                    false
                }
            };
            if !reschedule {
                continue;
            }

            let existed = match self.entries.remove(&key) {
                Some(old) => {
                    old.job.stop();
                    true
                }
                None => false,
            };

            match self.schedule(&trigger) {
                Ok(job) => {
                    info!(trigger = %key, cron = %trigger.spec.cron, "Cron scheduled");
                    self.entries.insert(key, Entry { trigger, job });
                    if existed {
                        report.updated += 1;
                    } else {
                        report.added += 1;
                    }
                }
                Err(e) => {
                    warn!(trigger = %key, cron = %trigger.spec.cron, error = %e, "Failed to schedule time trigger");
                    report.failed += 1;
                }
            }
        }

        let removed: Vec<ObjectKey> = self
            .entries
            .keys()
            .filter(|k| !seen.contains(*k))
            .cloned()
            .collect();
        for key in removed {
            if let Some(entry) = self.entries.remove(&key) {
                entry.job.stop();
                info!(trigger = %key, "Cron for time trigger stopped");
                report.removed += 1;
            }
        }

        report
    }

    fn schedule(&self, trigger: &TimeTrigger) -> Result<CronJob> {
        if trigger.spec.functionref.reference_type != FunctionReferenceType::FunctionName {
            return Err(Error::InvalidArgument(format!(
                "unsupported function reference type {:?}",
                trigger.spec.functionref.reference_type
            )));
        }
        let schedule = Schedule::parse(&trigger.spec.cron)?;
        let url = function_url(
            &self.router_url,
            &trigger.spec.functionref.name,
            trigger.metadata.namespace_or_default(),
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(fire_loop(
            trigger.metadata.key(),
            trigger.metadata.name.clone(),
            schedule,
            url,
            self.publisher.clone(),
            cancel.clone(),
        ));
        Ok(CronJob { cancel, task })
    }
}

fn schedule_changed(current: &TimeTrigger, desired: &TimeTrigger) -> bool {
    current.spec.cron != desired.spec.cron || current.spec.functionref != desired.spec.functionref
}

async fn fire_loop(
    key: ObjectKey,
    name: String,
    schedule: Schedule,
    url: String,
    publisher: Arc<dyn Publisher>,
    cancel: CancellationToken,
) {
    loop {
        let Some(delay) = schedule.delay_from(Utc::now()) else {
            info!(trigger = %key, "Schedule has no further firings");
            return;
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        debug!(trigger = %key, url = %url, "Timer fired");
        let request = PublishRequest::new(url.clone(), Vec::new()).with_header(HEADER_TIMER_NAME, name.clone());
        if let Err(e) = publisher.publish(request).await {
            warn!(trigger = %key, error = %e, "Failed to queue timer request");
        }
    }
}
