// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus - in-process fan-out of domain events
//
// One tokio broadcast channel carries both event families:
// - StoreEvent: record changed/removed; the watch source for the controller
// - GeneratorStateEvent: lifecycle decisions taken by the reconciler
//
// Slow receivers lose the oldest events and are told how many they missed,
// so watchers can fall back to a relist.

use crate::domain::events::{GeneratorStateEvent, StoreEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{trace, warn};

pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Store(StoreEvent),
    GeneratorState(GeneratorStateEvent),
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// `capacity` events are buffered per receiver before the oldest drop.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    pub fn publish_store_event(&self, event: StoreEvent) {
        self.publish(DomainEvent::Store(event));
    }

    pub fn publish_state_event(&self, event: GeneratorStateEvent) {
        self.publish(DomainEvent::GeneratorState(event));
    }

    fn publish(&self, event: DomainEvent) {
        trace!(?event, "publish");
        // Err only means nobody is listening right now.
        let _ = self.sender.send(event);
    }

    /// Every event, both families.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Store changes only; the watch stream a controller consumes.
    pub fn watch_store(&self) -> StoreWatch {
        StoreWatch {
            inner: self.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(RecvError::Closed) => Err(EventBusError::Closed),
            Err(RecvError::Lagged(n)) => Err(lagged(n)),
        }
    }

    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(event),
            Err(TryRecvError::Empty) => Err(EventBusError::Empty),
            Err(TryRecvError::Closed) => Err(EventBusError::Closed),
            Err(TryRecvError::Lagged(n)) => Err(lagged(n)),
        }
    }
}

fn lagged(n: u64) -> EventBusError {
    warn!("Event receiver lagged by {} events", n);
    EventBusError::Lagged(n)
}

/// Receiver filtered down to [`StoreEvent`]s.
pub struct StoreWatch {
    inner: EventReceiver,
}

impl StoreWatch {
    pub async fn next(&mut self) -> Result<StoreEvent, EventBusError> {
        loop {
            if let DomainEvent::Store(event) = self.inner.recv().await? {
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::generator_state::StateKey;
    use chrono::Utc;

    fn changed(name: &str) -> StoreEvent {
        StoreEvent::Changed {
            key: StateKey::new("default", name),
            resource_version: 1,
        }
    }

    #[tokio::test]
    async fn test_lifecycle_events_reach_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let key = StateKey::new("default", "token-1");
        event_bus.publish_state_event(GeneratorStateEvent::Ready {
            key: key.clone(),
            ready_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            DomainEvent::GeneratorState(GeneratorStateEvent::Ready { key: got, .. }) => {
                assert_eq!(got, key)
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_store_watch_skips_lifecycle_events() {
        let event_bus = EventBus::new(10);
        let mut watch = event_bus.watch_store();

        event_bus.publish_state_event(GeneratorStateEvent::Ready {
            key: StateKey::new("default", "noise"),
            ready_at: Utc::now(),
        });
        event_bus.publish_store_event(changed("wanted"));

        let event = watch.next().await.unwrap();
        assert_eq!(event.key(), &StateKey::new("default", "wanted"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let event_bus = EventBus::new(10);
        event_bus.publish_store_event(StoreEvent::Removed {
            key: StateKey::new("default", "gone"),
        });
        assert_eq!(event_bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagged_receiver_reports_drop_count() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.subscribe();
        for i in 0..5 {
            event_bus.publish_store_event(changed(&format!("s-{}", i)));
        }

        assert!(matches!(receiver.try_recv(), Err(EventBusError::Lagged(3))));
        assert!(receiver.try_recv().is_ok());
    }
}
