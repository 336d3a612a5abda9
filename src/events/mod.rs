//! In-process, fire-and-forget event bus.
//!
//! `publish` hands events to subscribed handlers without waiting on them —
//! a slow or failing handler never blocks the sample pipeline. Handler
//! errors are logged and otherwise swallowed, except under
//! `publish_and_wait`, which collects them for the caller.

use crate::types::{CharacteristicId, SampleId, SubgroupMode, ViolationId, Zone};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub enum Event {
    SampleProcessed {
        characteristic_id: CharacteristicId,
        sample_id: SampleId,
        zone: Zone,
        timestamp: DateTime<Utc>,
    },
    ViolationCreated {
        characteristic_id: CharacteristicId,
        sample_id: SampleId,
        violation_id: ViolationId,
        rule_id: u8,
    },
    ViolationAcknowledged {
        violation_id: ViolationId,
        acknowledged_by: String,
    },
    ControlLimitsUpdated {
        characteristic_id: CharacteristicId,
        center_line: f64,
        ucl: f64,
        lcl: f64,
    },
    CharacteristicUpdated {
        characteristic_id: CharacteristicId,
        subgroup_mode: SubgroupMode,
    },
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

type HandlerId = u64;

struct Subscription {
    id: HandlerId,
    handler: Arc<dyn EventHandler>,
}

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscription>>,
    next_id: std::sync::atomic::AtomicU64,
    shut_down: std::sync::atomic::AtomicBool,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.subscribers.write().await.push(Subscription { id, handler });
        id
    }

    pub async fn unsubscribe(&self, id: HandlerId) {
        self.subscribers.write().await.retain(|s| s.id != id);
    }

    /// Dispatch to every subscriber without waiting for any of them.
    /// Handler errors are logged, never propagated.
    pub async fn publish(&self, event: Event) {
        if self.shut_down.load(std::sync::atomic::Ordering::SeqCst) {
            tracing::warn!("event published after shutdown, dropping");
            return;
        }
        let subscribers: Vec<Arc<dyn EventHandler>> = self
            .subscribers
            .read()
            .await
            .iter()
            .map(|s| s.handler.clone())
            .collect();
        for handler in subscribers {
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(e) = handler.handle(&event).await {
                    tracing::warn!(error = %e, "event handler failed");
                }
            });
        }
    }

    /// Dispatch to every subscriber and wait for all of them, collecting
    /// any handler errors rather than swallowing them.
    pub async fn publish_and_wait(&self, event: Event) -> Vec<anyhow::Error> {
        let subscribers: Vec<Arc<dyn EventHandler>> = self
            .subscribers
            .read()
            .await
            .iter()
            .map(|s| s.handler.clone())
            .collect();
        let mut errors = Vec::new();
        for handler in subscribers {
            if let Err(e) = handler.handle(&event).await {
                errors.push(e);
            }
        }
        errors
    }

    /// Mark the bus as shut down: further `publish` calls are dropped
    /// with a warning rather than delivered. Existing subscribers are not
    /// removed, so a caller mid-shutdown can still `publish_and_wait` a
    /// final drain if it chooses to.
    pub fn shutdown(&self) {
        self.shut_down.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl EventHandler for FailingHandler {
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn publish_and_wait_collects_errors() {
        let bus = EventBus::new();
        bus.subscribe(Arc::new(FailingHandler)).await;
        let errors = bus
            .publish_and_wait(Event::ViolationAcknowledged {
                violation_id: ViolationId(1),
                acknowledged_by: "op".into(),
            })
            .await;
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let id = bus.subscribe(Arc::new(CountingHandler(count.clone()))).await;
        bus.unsubscribe(id).await;
        let errors = bus
            .publish_and_wait(Event::ViolationAcknowledged {
                violation_id: ViolationId(1),
                acknowledged_by: "op".into(),
            })
            .await;
        assert!(errors.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_drops_further_publishes() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Arc::new(CountingHandler(count.clone()))).await;
        bus.shutdown();
        bus.publish(Event::ViolationAcknowledged {
            violation_id: ViolationId(1),
            acknowledged_by: "op".into(),
        })
        .await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
