//! NATS JetStream driver.
//!
//! One file-backed stream (`MICROCLOUD` by default) captures `sim.>` and
//! `ops.>` with limits retention and 24 h max age. Subscriptions are durable
//! pull consumers with explicit ack and new-only delivery.

use crate::{Acker, BusDriver, Delivery, DeliveryStream};
use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, DeliverPolicy},
    stream::{RetentionPolicy, StorageType},
    AckKind,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use microcloud_core::config::BusConfig;
use microcloud_core::{Error, Result};
use std::time::Duration;
use tracing::warn;

const STREAM_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// JetStream-backed bus driver
pub struct NatsBus {
    context: jetstream::Context,
    stream_name: String,
}

impl std::fmt::Debug for NatsBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsBus")
            .field("stream_name", &self.stream_name)
            .finish_non_exhaustive()
    }
}

impl NatsBus {
    /// Connect to NATS and ensure the stream exists
    pub async fn connect(cfg: &BusConfig) -> Result<Self> {
        let client = async_nats::connect(&cfg.url)
            .await
            .map_err(|e| Error::bus(format!("nats connect: {e}")))?;
        let context = jetstream::new(client);

        context
            .get_or_create_stream(jetstream::stream::Config {
                name: cfg.stream_name.clone(),
                subjects: vec!["sim.>".to_string(), "ops.>".to_string()],
                retention: RetentionPolicy::Limits,
                storage: StorageType::File,
                max_age: STREAM_MAX_AGE,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::bus(format!("create stream: {e}")))?;

        Ok(Self {
            context,
            stream_name: cfg.stream_name.clone(),
        })
    }
}

#[async_trait]
impl BusDriver for NatsBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        let ack = self
            .context
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| Error::bus(format!("publish to {subject}: {e}")))?;
        ack.await
            .map_err(|e| Error::bus(format!("publish ack for {subject}: {e}")))?;
        Ok(())
    }

    async fn subscribe(&self, subject: &str, durable_name: &str) -> Result<DeliveryStream> {
        let stream = self
            .context
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| Error::bus(format!("get stream: {e}")))?;

        let consumer = stream
            .get_or_create_consumer(
                durable_name,
                pull::Config {
                    durable_name: Some(durable_name.to_string()),
                    filter_subject: subject.to_string(),
                    ack_policy: AckPolicy::Explicit,
                    deliver_policy: DeliverPolicy::New,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::bus(format!("create consumer {durable_name}: {e}")))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::bus(format!("consume {subject}: {e}")))?;

        let deliveries = messages
            .filter_map(|msg| async move {
                match msg {
                    Ok(msg) => {
                        let payload = msg.payload.to_vec();
                        Some(Delivery::new(payload, Box::new(NatsAcker { message: msg })))
                    }
                    Err(err) => {
                        warn!(error = %err, "jetstream message error");
                        None
                    }
                }
            })
            .boxed();

        Ok(deliveries)
    }
}

struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acker for NatsAcker {
    async fn ack(self: Box<Self>) {
        if let Err(err) = self.message.ack().await {
            warn!(error = %err, "failed to ack message");
        }
    }

    async fn nack(self: Box<Self>) {
        if let Err(err) = self.message.ack_with(AckKind::Nak(None)).await {
            warn!(error = %err, "failed to nack message");
        }
    }
}
