// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Generator-State Controller
//!
//! The scheduler around [`GeneratorStateReconciler`]. It feeds a
//! [`WorkQueue`] from three triggers and drains it with a pool of workers:
//!
//! - **Initial list:** every record present at startup
//! - **Watch:** `StoreEvent`s published on the event bus
//! - **Resync:** a periodic relist, which also recovers requeues lost
//!   across a restart
//!
//! Reconcile results map onto the queue as follows:
//!
//! | Result | Queue action |
//! |--------|--------------|
//! | `Done` | forget |
//! | `RequeueAfter(d)` | forget, add after `d` |
//! | retryable error | add after per-key backoff |
//! | terminal error | forget (operator action required) |

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::reconciler::{GeneratorStateReconciler, ReconcileAction, ReconcileError};
use crate::application::work_queue::WorkQueue;
use crate::domain::context::OperationContext;
use crate::domain::controller_config::ControllerSettings;
use crate::domain::generator_state::StateKey;
use crate::domain::repository::GeneratorStateRepository;
use crate::infrastructure::event_bus::{EventBus, EventBusError};

pub struct GeneratorStateController {
    reconciler: Arc<GeneratorStateReconciler>,
    repository: Arc<dyn GeneratorStateRepository>,
    event_bus: Arc<EventBus>,
    queue: WorkQueue<StateKey>,
    settings: ControllerSettings,
}

impl GeneratorStateController {
    pub fn new(
        reconciler: Arc<GeneratorStateReconciler>,
        repository: Arc<dyn GeneratorStateRepository>,
        event_bus: Arc<EventBus>,
        settings: ControllerSettings,
    ) -> Self {
        let queue = WorkQueue::new(settings.backoff.clone());
        Self {
            reconciler,
            repository,
            event_bus,
            queue,
            settings,
        }
    }

    pub fn queue(&self) -> &WorkQueue<StateKey> {
        &self.queue
    }

    /// Enqueue every stored record.
    pub async fn enqueue_all(&self) -> Result<usize> {
        let states = self
            .repository
            .list_all()
            .await
            .context("Failed to list generator states")?;
        let count = states.len();
        for state in states {
            self.queue.add(state.key());
        }
        Ok(count)
    }

    /// Run until `cancel` fires. Workers finish their current pass before
    /// this returns.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        // Subscribe before listing so no change slips between the two.
        let mut watch = self.event_bus.watch_store();

        let listed = self.enqueue_all().await?;
        info!(
            "Generator state controller starting: {} workers, {} records queued",
            self.settings.workers, listed
        );

        let mut workers = JoinSet::new();
        for id in 0..self.settings.workers {
            let controller = self.clone();
            let cancel = cancel.clone();
            workers.spawn(async move { controller.worker(id, cancel).await });
        }

        let resync = self.settings.resync_interval;
        let mut resync_ticker = interval_at(Instant::now() + resync, resync);
        resync_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Generator state controller shutting down");
                    break;
                }
                event = watch.next() => match event {
                    Ok(store_event) => self.queue.add(store_event.key().clone()),
                    Err(EventBusError::Lagged(_)) => {
                        // Missed watch events: fall back to a full relist.
                        if let Err(e) = self.enqueue_all().await {
                            warn!("Relist after lagged watch failed: {:#}", e);
                        }
                    }
                    Err(EventBusError::Closed) => {
                        warn!("Event bus closed; relying on periodic resync only");
                        cancel.cancelled().await;
                        break;
                    }
                    Err(EventBusError::Empty) => {}
                },
                _ = resync_ticker.tick() => {
                    match self.enqueue_all().await {
                        Ok(count) => debug!("Resync queued {} generator states", count),
                        Err(e) => warn!("Resync failed: {:#}", e),
                    }
                }
            }
        }

        self.queue.shutdown();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Reconcile worker panicked: {}", e);
            }
        }
        info!("Generator state controller stopped");
        Ok(())
    }

    async fn worker(&self, id: usize, cancel: CancellationToken) {
        debug!("Reconcile worker {} started", id);
        let root = OperationContext::new(cancel.clone());

        while let Some(key) = self.queue.get().await {
            let ctx = root.child(Some(self.settings.operation_timeout));
            let result = self.reconciler.reconcile(&ctx, &key).await;
            self.handle_result(&key, result);
            self.queue.done(&key);
        }
        debug!("Reconcile worker {} stopped", id);
    }

    fn handle_result(&self, key: &StateKey, result: Result<ReconcileAction, ReconcileError>) {
        match result {
            Ok(ReconcileAction::Done) => self.queue.forget(key),
            Ok(ReconcileAction::RequeueAfter(delay)) => {
                self.queue.forget(key);
                self.queue.add_after(key.clone(), delay);
            }
            Err(e) if e.is_retryable() => {
                let delay = self.queue.add_rate_limited(key.clone());
                match &e {
                    ReconcileError::Store { .. } if e.is_conflict() => {
                        debug!("Write conflict on {}, retrying in {:?}", key, delay)
                    }
                    ReconcileError::Store { .. } => warn!("{}; retrying in {:?}", e, delay),
                    // Generator failures were logged where they were detected.
                    _ => debug!("{}; retrying in {:?}", e, delay),
                }
            }
            Err(e) => {
                self.queue.forget(key);
                debug!("{}; not retrying until the record changes", e);
            }
        }
    }
}
