//! # Microcloud Bus
//!
//! Typed pub/sub contracts for the microcloud control loop.
//!
//! This crate provides:
//! - The five bus subjects and their payload codec
//! - A driver trait with at-least-once ack/nack deliveries
//! - Typed [`Publisher`] and [`Subscriber`] wrappers
//! - A NATS JetStream driver and an in-memory driver
//!
//! Delivery semantics: per-subject FIFO, at-least-once with explicit ack.
//! A handler error nacks the message for redelivery; an undecodable payload
//! is acked and dropped so it cannot hot-loop.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod codec;
pub mod memory;
pub mod nats;
mod publisher;
mod subscriber;

pub use memory::MemoryBus;
pub use nats::NatsBus;
pub use publisher::Publisher;
pub use subscriber::Subscriber;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use microcloud_core::Result;

/// Metric snapshots from the engine
pub const SUBJECT_SIM_METRICS: &str = "sim.metrics";
/// Simulation events from the engine
pub const SUBJECT_SIM_EVENTS: &str = "sim.events";
/// Incidents from the signal service
pub const SUBJECT_OPS_INCIDENTS: &str = "ops.incidents";
/// Proposed actions from the agent service
pub const SUBJECT_OPS_ACTIONS: &str = "ops.actions";
/// Approved commands from the orchestrator
pub const SUBJECT_OPS_COMMANDS: &str = "ops.commands";

/// Acknowledgement hooks for a single delivery
#[async_trait]
pub trait Acker: Send + Sync {
    /// Confirm the message was handled
    async fn ack(self: Box<Self>);
    /// Request redelivery
    async fn nack(self: Box<Self>);
}

/// One message received from the bus
pub struct Delivery {
    pub payload: Vec<u8>,
    acker: Option<Box<dyn Acker>>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .field("acked_explicitly", &self.acker.is_some())
            .finish()
    }
}

impl Delivery {
    /// A delivery with explicit acknowledgement
    pub fn new(payload: Vec<u8>, acker: Box<dyn Acker>) -> Self {
        Self {
            payload,
            acker: Some(acker),
        }
    }

    /// A delivery whose transport needs no acknowledgement
    pub fn unacked(payload: Vec<u8>) -> Self {
        Self {
            payload,
            acker: None,
        }
    }

    /// Confirm the message was handled
    pub async fn ack(self) {
        if let Some(acker) = self.acker {
            acker.ack().await;
        }
    }

    /// Request redelivery
    pub async fn nack(self) {
        if let Some(acker) = self.acker {
            acker.nack().await;
        }
    }
}

/// Stream of deliveries for one durable subscription
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// Transport abstraction under the typed publisher/subscriber.
///
/// Implementations must preserve per-subject publish order.
#[async_trait]
pub trait BusDriver: Send + Sync {
    /// Publish a raw payload to a subject
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()>;

    /// Open a durable subscription filtered to one subject
    async fn subscribe(&self, subject: &str, durable_name: &str) -> Result<DeliveryStream>;
}

/// Re-export commonly used items
pub mod prelude {
    pub use crate::{
        BusDriver, Delivery, MemoryBus, NatsBus, Publisher, Subscriber, SUBJECT_OPS_ACTIONS,
        SUBJECT_OPS_COMMANDS, SUBJECT_OPS_INCIDENTS, SUBJECT_SIM_EVENTS, SUBJECT_SIM_METRICS,
    };
}
