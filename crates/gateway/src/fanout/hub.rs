//! The subscriber table.
//!
//! `run_id → subscribers`, guarded by a reader-writer lock: publish takes
//! the read lock, register/unregister take the write lock. Each
//! subscriber owns a bounded queue; a subscriber whose queue is full when
//! an event arrives is disconnected (backpressure = drop slowest).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use rt_bus::EventBus;
use rt_protocol::BusEvent;

struct Subscriber {
    id: u64,
    queue: mpsc::Sender<BusEvent>,
}

pub struct FanoutHub {
    subscribers: RwLock<HashMap<Uuid, Vec<Subscriber>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl FanoutHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity,
        }
    }

    /// Register a subscriber for a run. Returns its id (for
    /// [`unregister`](Self::unregister)) and the receiving end of its
    /// queue.
    pub fn register(&self, run_id: Uuid) -> (u64, mpsc::Receiver<BusEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.subscribers
            .write()
            .entry(run_id)
            .or_default()
            .push(Subscriber { id, queue: tx });
        tracing::debug!(run_id = %run_id, subscriber_id = id, "subscriber registered");
        (id, rx)
    }

    /// Remove a subscriber; the registration is a relation owned by the
    /// hub, torn down here.
    pub fn unregister(&self, run_id: Uuid, subscriber_id: u64) {
        let mut table = self.subscribers.write();
        if let Some(subs) = table.get_mut(&run_id) {
            subs.retain(|s| s.id != subscriber_id);
            if subs.is_empty() {
                table.remove(&run_id);
            }
        }
    }

    /// Deliver an event to every subscriber of its run. Subscribers with
    /// a full or closed queue are dropped.
    pub fn publish(&self, event: &BusEvent) {
        let run_id = event.run_id();

        let dead: Vec<u64> = {
            let table = self.subscribers.read();
            let Some(subs) = table.get(&run_id) else {
                return;
            };
            subs.iter()
                .filter_map(|sub| match sub.queue.try_send(event.clone()) {
                    Ok(()) => None,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(
                            run_id = %run_id,
                            subscriber_id = sub.id,
                            "subscriber queue full, dropping slow consumer"
                        );
                        Some(sub.id)
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => Some(sub.id),
                })
                .collect()
        };

        for id in dead {
            self.unregister(run_id, id);
        }
    }

    pub fn subscriber_count(&self, run_id: Uuid) -> usize {
        self.subscribers
            .read()
            .get(&run_id)
            .map_or(0, Vec::len)
    }

    /// Bridge the bus's live channel into the hub until shutdown.
    pub fn spawn_dispatcher(
        self: &Arc<Self>,
        bus: Arc<dyn EventBus>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut rx = bus.subscribe_events();
            tracing::info!("fan-out dispatcher started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => hub.publish(&event),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(missed = n, "fan-out dispatcher lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::info!("fan-out dispatcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rt_bus::InProcessBus;
    use rt_protocol::LogLevel;

    fn log_event(run_id: Uuid, content: &str) -> BusEvent {
        BusEvent::Log {
            run_id,
            timestamp: Utc::now(),
            level: LogLevel::Stdout,
            content: content.into(),
        }
    }

    #[tokio::test]
    async fn events_reach_matching_subscribers_only() {
        let hub = FanoutHub::new(8);
        let run_a = Uuid::new_v4();
        let run_b = Uuid::new_v4();
        let (_, mut rx_a) = hub.register(run_a);
        let (_, mut rx_b) = hub.register(run_b);

        hub.publish(&log_event(run_a, "for-a"));

        let got = rx_a.recv().await.unwrap();
        assert!(matches!(got, BusEvent::Log { ref content, .. } if content == "for-a"));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_disconnects_subscriber() {
        let hub = FanoutHub::new(1);
        let run_id = Uuid::new_v4();
        let (_, mut rx) = hub.register(run_id);

        hub.publish(&log_event(run_id, "1"));
        // Queue capacity 1 is now exhausted; the next publish drops the
        // subscriber.
        hub.publish(&log_event(run_id, "2"));
        assert_eq!(hub.subscriber_count(run_id), 0);

        // The first event is still readable; then the channel is closed.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn unregister_removes_subscriber() {
        let hub = FanoutHub::new(8);
        let run_id = Uuid::new_v4();
        let (id, _rx) = hub.register(run_id);
        assert_eq!(hub.subscriber_count(run_id), 1);
        hub.unregister(run_id, id);
        assert_eq!(hub.subscriber_count(run_id), 0);
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_on_publish() {
        let hub = FanoutHub::new(8);
        let run_id = Uuid::new_v4();
        let (_, rx) = hub.register(run_id);
        drop(rx);
        hub.publish(&log_event(run_id, "x"));
        assert_eq!(hub.subscriber_count(run_id), 0);
    }

    #[tokio::test]
    async fn dispatcher_bridges_bus_to_hub() {
        let hub = Arc::new(FanoutHub::new(8));
        let bus = Arc::new(InProcessBus::ephemeral());
        let shutdown = CancellationToken::new();
        let handle = hub.spawn_dispatcher(bus.clone(), shutdown.clone());

        let run_id = Uuid::new_v4();
        let (_, mut rx) = hub.register(run_id);

        // Give the dispatcher a moment to subscribe.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        bus.publish_event(log_event(run_id, "bridged"));

        let got = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(got, BusEvent::Log { ref content, .. } if content == "bridged"));

        shutdown.cancel();
        handle.await.unwrap();
    }
}
