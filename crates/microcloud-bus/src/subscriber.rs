//! Typed consuming wrapper over a [`BusDriver`].
//!
//! Each `consume_*` method runs a durable consumer loop until the
//! cancellation token fires: decode, invoke the handler, then ack on success
//! or nack on handler failure. Undecodable payloads are acked and dropped.

use crate::{
    codec, BusDriver, SUBJECT_OPS_ACTIONS, SUBJECT_OPS_COMMANDS, SUBJECT_OPS_INCIDENTS,
    SUBJECT_SIM_EVENTS, SUBJECT_SIM_METRICS,
};
use futures_util::StreamExt;
use microcloud_core::types::{Action, ApplyActionCommand, Incident, MetricSnapshot, SimulationEvent};
use microcloud_core::Result;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Typed subscriber for the five bus subjects
#[derive(Clone)]
pub struct Subscriber {
    driver: Arc<dyn BusDriver>,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber").finish_non_exhaustive()
    }
}

impl Subscriber {
    /// Create a subscriber over a driver
    pub fn new(driver: Arc<dyn BusDriver>) -> Self {
        Self { driver }
    }

    /// Consume metric snapshots from `sim.metrics` until cancelled
    pub async fn consume_snapshots<F, Fut>(
        &self,
        consumer_name: &str,
        cancel: CancellationToken,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(MetricSnapshot) -> Fut + Send + Sync,
        Fut: Future<Output = Result<()>> + Send,
    {
        self.consume(SUBJECT_SIM_METRICS, consumer_name, cancel, handler)
            .await
    }

    /// Consume simulation events from `sim.events` until cancelled
    pub async fn consume_events<F, Fut>(
        &self,
        consumer_name: &str,
        cancel: CancellationToken,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(SimulationEvent) -> Fut + Send + Sync,
        Fut: Future<Output = Result<()>> + Send,
    {
        self.consume(SUBJECT_SIM_EVENTS, consumer_name, cancel, handler)
            .await
    }

    /// Consume incidents from `ops.incidents` until cancelled
    pub async fn consume_incidents<F, Fut>(
        &self,
        consumer_name: &str,
        cancel: CancellationToken,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(Incident) -> Fut + Send + Sync,
        Fut: Future<Output = Result<()>> + Send,
    {
        self.consume(SUBJECT_OPS_INCIDENTS, consumer_name, cancel, handler)
            .await
    }

    /// Consume proposed actions from `ops.actions` until cancelled
    pub async fn consume_actions<F, Fut>(
        &self,
        consumer_name: &str,
        cancel: CancellationToken,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(Action) -> Fut + Send + Sync,
        Fut: Future<Output = Result<()>> + Send,
    {
        self.consume(SUBJECT_OPS_ACTIONS, consumer_name, cancel, handler)
            .await
    }

    /// Consume approved commands from `ops.commands` until cancelled
    pub async fn consume_commands<F, Fut>(
        &self,
        consumer_name: &str,
        cancel: CancellationToken,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(ApplyActionCommand) -> Fut + Send + Sync,
        Fut: Future<Output = Result<()>> + Send,
    {
        self.consume(SUBJECT_OPS_COMMANDS, consumer_name, cancel, handler)
            .await
    }

    async fn consume<T, F, Fut>(
        &self,
        subject: &str,
        consumer_name: &str,
        cancel: CancellationToken,
        handler: F,
    ) -> Result<()>
    where
        T: DeserializeOwned,
        F: Fn(T) -> Fut + Send + Sync,
        Fut: Future<Output = Result<()>> + Send,
    {
        let mut deliveries = self.driver.subscribe(subject, consumer_name).await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = deliveries.next() => {
                    let Some(delivery) = next else { return Ok(()) };
                    match codec::decode::<T>(&delivery.payload) {
                        Ok(msg) => match handler(msg).await {
                            Ok(()) => delivery.ack().await,
                            Err(err) => {
                                warn!(subject, consumer = consumer_name, error = %err, "handler failed, requesting redelivery");
                                delivery.nack().await;
                            }
                        },
                        Err(err) => {
                            // Poison pill: redelivering would loop forever.
                            warn!(subject, consumer = consumer_name, error = %err, "dropping undecodable payload");
                            delivery.ack().await;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryBus, Publisher};
    use microcloud_core::types::{ActionType, ApplyActionCommand};
    use microcloud_core::Error;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn command(tick: i64) -> ApplyActionCommand {
        ApplyActionCommand {
            action_id: Uuid::new_v4(),
            target_tick_id: tick,
            action_type: ActionType::ScaleUp,
            target_id: Uuid::new_v4(),
            parameters: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn consumes_in_publish_order() {
        let driver: Arc<dyn BusDriver> = Arc::new(MemoryBus::new());
        let publisher = Publisher::new(driver.clone());
        let subscriber = Subscriber::new(driver);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let task = {
            let seen = seen.clone();
            let cancel = cancel.clone();
            let subscriber = subscriber.clone();
            tokio::spawn(async move {
                subscriber
                    .consume_commands("test", cancel, move |cmd| {
                        let seen = seen.clone();
                        async move {
                            seen.lock().unwrap().push(cmd.target_tick_id);
                            Ok(())
                        }
                    })
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        for tick in 1..=3 {
            publisher.publish_command(&command(tick)).await.unwrap();
        }

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn drops_undecodable_payloads() {
        let driver: Arc<dyn BusDriver> = Arc::new(MemoryBus::new());
        let publisher = Publisher::new(driver.clone());
        let subscriber = Subscriber::new(driver.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let task = {
            let seen = seen.clone();
            let cancel = cancel.clone();
            let subscriber = subscriber.clone();
            tokio::spawn(async move {
                subscriber
                    .consume_commands("test", cancel, move |cmd| {
                        let seen = seen.clone();
                        async move {
                            seen.lock().unwrap().push(cmd.target_tick_id);
                            Ok(())
                        }
                    })
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        driver
            .publish(SUBJECT_OPS_COMMANDS, vec![0xff, 0x00, 0x13])
            .await
            .unwrap();
        publisher.publish_command(&command(7)).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn handler_errors_do_not_stop_the_loop() {
        let driver: Arc<dyn BusDriver> = Arc::new(MemoryBus::new());
        let publisher = Publisher::new(driver.clone());
        let subscriber = Subscriber::new(driver);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let task = {
            let seen = seen.clone();
            let cancel = cancel.clone();
            let subscriber = subscriber.clone();
            tokio::spawn(async move {
                subscriber
                    .consume_commands("test", cancel, move |cmd| {
                        let seen = seen.clone();
                        async move {
                            if cmd.target_tick_id == 1 {
                                return Err(Error::storage("transient"));
                            }
                            seen.lock().unwrap().push(cmd.target_tick_id);
                            Ok(())
                        }
                    })
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        publisher.publish_command(&command(1)).await.unwrap();
        publisher.publish_command(&command(2)).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }
}
