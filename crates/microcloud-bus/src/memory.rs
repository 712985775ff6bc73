//! In-memory bus driver.
//!
//! Per-subject broadcast channels with FIFO ordering. Used by tests and by
//! embedded setups that do not need durability; deliveries need no ack.

use crate::{BusDriver, Delivery, DeliveryStream};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::warn;

const TOPIC_CAPACITY: usize = 1024;

/// Process-local bus driver
#[derive(Debug, Default)]
pub struct MemoryBus {
    topics: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl MemoryBus {
    /// Create an empty in-memory bus
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, subject: &str) -> broadcast::Sender<Vec<u8>> {
        self.topics
            .lock()
            .entry(subject.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl BusDriver for MemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> microcloud_core::Result<()> {
        // A send with no live subscribers is not an error; the message is
        // simply not retained.
        let _ = self.sender(subject).send(payload);
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        _durable_name: &str,
    ) -> microcloud_core::Result<DeliveryStream> {
        let rx = self.sender(subject).subscribe();
        let deliveries = BroadcastStream::new(rx)
            .filter_map(|item| async move {
                match item {
                    Ok(payload) => Some(Delivery::unacked(payload)),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "memory bus subscriber lagged");
                        None
                    }
                }
            })
            .boxed();
        Ok(deliveries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_all_subscribers_in_order() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe("sim.metrics", "a").await.unwrap();
        let mut b = bus.subscribe("sim.metrics", "b").await.unwrap();

        bus.publish("sim.metrics", vec![1]).await.unwrap();
        bus.publish("sim.metrics", vec![2]).await.unwrap();

        assert_eq!(a.next().await.unwrap().payload, vec![1]);
        assert_eq!(a.next().await.unwrap().payload, vec![2]);
        assert_eq!(b.next().await.unwrap().payload, vec![1]);
        assert_eq!(b.next().await.unwrap().payload, vec![2]);
    }

    #[tokio::test]
    async fn subjects_are_isolated() {
        let bus = MemoryBus::new();
        let mut commands = bus.subscribe("ops.commands", "c").await.unwrap();

        bus.publish("ops.actions", vec![9]).await.unwrap();
        bus.publish("ops.commands", vec![4]).await.unwrap();

        assert_eq!(commands.next().await.unwrap().payload, vec![4]);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = MemoryBus::new();
        assert!(bus.publish("sim.events", vec![0]).await.is_ok());
    }
}
