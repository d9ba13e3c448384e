// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Rate-limited, de-duplicating work queue.
//!
//! Semantics follow the classic controller queue:
//! - a key sits in the queue at most once, however often it is added;
//! - a key being processed is never handed to a second worker; re-adds
//!   during processing are parked until [`WorkQueue::done`];
//! - failures back off per key (`base * 2^failures`, capped) until
//!   [`WorkQueue::forget`] resets the count;
//! - a key waits on at most one timer: delayed adds keep the earliest
//!   ready time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::controller_config::BackoffConfig;

struct Inner<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    /// Pending delayed add per key: ready time and the timer task.
    waiting: HashMap<K, (Instant, AbortHandle)>,
    shutting_down: bool,
}

pub struct WorkQueue<K> {
    inner: Arc<Mutex<Inner<K>>>,
    notify: Arc<Notify>,
    shutdown: CancellationToken,
    backoff: BackoffConfig,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            notify: self.notify.clone(),
            shutdown: self.shutdown.clone(),
            backoff: self.backoff.clone(),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                waiting: HashMap::new(),
                shutting_down: false,
            })),
            notify: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            backoff,
        }
    }

    pub fn add(&self, key: K) {
        let mut inner = self.inner.lock();
        if inner.shutting_down || inner.dirty.contains(&key) {
            return;
        }
        inner.dirty.insert(key.clone());
        if inner.processing.contains(&key) {
            return;
        }
        inner.queue.push_back(key);
        drop(inner);
        self.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed. A later ready time than one
    /// already pending for the key is ignored; an earlier one replaces it.
    /// Pending delayed adds are dropped on shutdown.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let ready_at = Instant::now() + delay;

        let mut inner = self.inner.lock();
        if inner.shutting_down {
            return;
        }
        if let Some((pending, _)) = inner.waiting.get(&key) {
            if *pending <= ready_at {
                return;
            }
        }

        let queue = self.clone();
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(ready_at) => queue.fire(timer_key, ready_at),
                _ = queue.shutdown.cancelled() => {}
            }
        });
        if let Some((_, replaced)) = inner.waiting.insert(key, (ready_at, timer.abort_handle())) {
            replaced.abort();
        }
    }

    fn fire(&self, key: K, ready_at: Instant) {
        {
            let mut inner = self.inner.lock();
            match inner.waiting.get(&key) {
                Some((pending, _)) if *pending == ready_at => {
                    inner.waiting.remove(&key);
                }
                // Superseded by an earlier timer.
                _ => return,
            }
        }
        self.add(key);
    }

    /// Keys with a delayed add still pending.
    pub fn num_waiting(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    /// Record a failure for `key` and re-add it after its backoff delay.
    pub fn add_rate_limited(&self, key: K) -> Duration {
        let delay = {
            let mut inner = self.inner.lock();
            let failures = inner.failures.entry(key.clone()).or_insert(0);
            let delay = self.backoff_for(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        self.add_after(key, delay);
        delay
    }

    fn backoff_for(&self, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        self.backoff
            .base
            .checked_mul(factor)
            .map_or(self.backoff.max, |d| d.min(self.backoff.max))
    }

    /// Reset the failure count of `key`.
    pub fn forget(&self, key: &K) {
        self.inner.lock().failures.remove(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.inner.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if inner.shutting_down {
                    return None;
                }
                if let Some(key) = inner.queue.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    return Some(key);
                }
            }
            tokio::select! {
                _ = notified => {}
                _ = self.shutdown.cancelled() => return None,
            }
        }
    }

    /// Mark `key` as no longer being processed. A re-add that arrived in the
    /// meantime is queued now.
    pub fn done(&self, key: &K) {
        let mut inner = self.inner.lock();
        inner.processing.remove(key);
        if inner.dirty.contains(key) && !inner.shutting_down {
            inner.queue.push_back(key.clone());
            drop(inner);
            self.notify.notify_one();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(&self) {
        {
            let mut inner = self.inner.lock();
            inner.shutting_down = true;
            for (_, (_, timer)) in inner.waiting.drain() {
                timer.abort();
            }
        }
        self.shutdown.cancel();
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().shutting_down
    }
}
