//! Stream hub: bus-to-SSE fan-out.
//!
//! Three durable consumers (`orchestrator-metrics`, `-incidents`,
//! `-actions`) wrap each payload as `{"type": ..., "payload": ...}` and
//! broadcast it to every connected client. Clients get a bounded buffer;
//! when it is full the message is dropped for that client only. The latest
//! snapshot is replayed to new clients on connect.

use dashmap::DashMap;
use futures_util::Stream;
use metrics::counter;
use microcloud_bus::Subscriber;
use microcloud_core::types::{Action, Incident, MetricSnapshot};
use microcloud_core::Result;
use parking_lot::RwLock;
use serde::Serialize;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Per-client buffer capacity
pub const CLIENT_BUFFER: usize = 100;

#[derive(Debug, Default)]
struct Latest {
    snapshot: Option<String>,
    incident: Option<String>,
    action: Option<String>,
}

/// Fans bus traffic to SSE subscribers
pub struct StreamHub {
    subscriber: Subscriber,
    clients: DashMap<u64, Sender<String>>,
    next_client: AtomicU64,
    latest: RwLock<Latest>,
}

impl std::fmt::Debug for StreamHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHub")
            .field("clients", &self.clients.len())
            .finish_non_exhaustive()
    }
}

impl StreamHub {
    /// Create a hub over a bus subscriber
    pub fn new(subscriber: Subscriber) -> Arc<Self> {
        Arc::new(Self {
            subscriber,
            clients: DashMap::new(),
            next_client: AtomicU64::new(0),
            latest: RwLock::new(Latest::default()),
        })
    }

    /// Run the three bus consumers until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        info!("stream hub started");

        let metrics = {
            let hub = self.clone();
            self.subscriber
                .consume_snapshots("orchestrator-metrics", cancel.clone(), move |snapshot| {
                    let hub = hub.clone();
                    async move {
                        hub.on_snapshot(&snapshot);
                        Ok(())
                    }
                })
        };

        let incidents = {
            let hub = self.clone();
            self.subscriber
                .consume_incidents("orchestrator-incidents", cancel.clone(), move |incident| {
                    let hub = hub.clone();
                    async move {
                        hub.on_incident(&incident);
                        Ok(())
                    }
                })
        };

        let actions = {
            let hub = self.clone();
            self.subscriber
                .consume_actions("orchestrator-actions", cancel.clone(), move |action| {
                    let hub = hub.clone();
                    async move {
                        hub.on_action(&action);
                        Ok(())
                    }
                })
        };

        tokio::try_join!(metrics, incidents, actions)?;
        info!("stream hub stopped");
        Ok(())
    }

    fn on_snapshot(&self, snapshot: &MetricSnapshot) {
        let frame = envelope("metrics", snapshot);
        self.latest.write().snapshot = Some(frame.clone());
        self.broadcast(frame);
    }

    fn on_incident(&self, incident: &Incident) {
        let frame = envelope("incident", incident);
        self.latest.write().incident = Some(frame.clone());
        self.broadcast(frame);
    }

    fn on_action(&self, action: &Action) {
        let frame = envelope("action", action);
        self.latest.write().action = Some(frame.clone());
        self.broadcast(frame);
    }

    /// Non-blocking delivery to every client; full buffers drop the frame,
    /// closed clients are removed.
    fn broadcast(&self, frame: String) {
        self.clients.retain(|_, tx| match tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                counter!("microcloud_stream_frames_dropped_total").increment(1);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    /// Register a new SSE client. The returned stream replays the latest
    /// snapshot first and unregisters itself on drop.
    pub fn register(self: &Arc<Self>) -> StreamClient {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        self.clients.insert(id, tx);
        debug!(client = id, "sse client connected");

        StreamClient {
            hub: self.clone(),
            id,
            rx,
            initial: self.latest.read().snapshot.clone(),
        }
    }

    fn remove(&self, id: u64) {
        self.clients.remove(&id);
        debug!(client = id, "sse client disconnected");
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Latest snapshot frame, if any was seen
    pub fn latest_snapshot(&self) -> Option<String> {
        self.latest.read().snapshot.clone()
    }
}

fn envelope<T: Serialize>(kind: &str, payload: &T) -> String {
    serde_json::json!({
        "type": kind,
        "payload": payload,
    })
    .to_string()
}

/// One connected SSE client
#[derive(Debug)]
pub struct StreamClient {
    hub: Arc<StreamHub>,
    id: u64,
    rx: Receiver<String>,
    initial: Option<String>,
}

impl Stream for StreamClient {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(frame) = self.initial.take() {
            return Poll::Ready(Some(frame));
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.hub.remove(self.id);
    }
}
