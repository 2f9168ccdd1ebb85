//! Cross-instance synchronization over a [`Bus`]
//!
//! Local subscribe/unsubscribe/broadcast actions are queued as
//! [`SyncMessage`]s and published by a background task, so callers never
//! wait on the bus. Messages received from peers are applied to the local
//! registry without being published again.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{Bus, BusHandler};
use crate::registry::StreamRegistry;

/// Default bus channel used for synchronization
pub const DEFAULT_SYNC_CHANNEL: &str = "transmit::broadcast";

/// Capacity of the outbound publish queue. Messages are dropped with a
/// warning when it is full (e.g. during a prolonged bus outage).
pub const PUBLISH_QUEUE_CAPACITY: usize = 10_000;

/// Client reference carried by subscribe/unsubscribe messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRef {
    pub uid: String,
}

/// Unit exchanged between instances on the sync channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncMessage {
    Broadcast { channel: String, payload: Value },
    Subscribe { channel: String, payload: ClientRef },
    Unsubscribe { channel: String, payload: ClientRef },
}

impl SyncMessage {
    pub fn broadcast(channel: impl Into<String>, payload: Value) -> Self {
        SyncMessage::Broadcast {
            channel: channel.into(),
            payload,
        }
    }

    pub fn subscribe(channel: impl Into<String>, uid: impl Into<String>) -> Self {
        SyncMessage::Subscribe {
            channel: channel.into(),
            payload: ClientRef { uid: uid.into() },
        }
    }

    pub fn unsubscribe(channel: impl Into<String>, uid: impl Into<String>) -> Self {
        SyncMessage::Unsubscribe {
            channel: channel.into(),
            payload: ClientRef { uid: uid.into() },
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            SyncMessage::Broadcast { channel, .. }
            | SyncMessage::Subscribe { channel, .. }
            | SyncMessage::Unsubscribe { channel, .. } => channel,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            SyncMessage::Broadcast { .. } => "broadcast",
            SyncMessage::Subscribe { .. } => "subscribe",
            SyncMessage::Unsubscribe { .. } => "unsubscribe",
        }
    }

    /// Apply a peer's action to the local registry
    ///
    /// Returns the number of streams written for broadcasts, 1/0 for
    /// membership changes that did/did not take effect.
    pub fn apply(&self, registry: &StreamRegistry) -> usize {
        match self {
            SyncMessage::Broadcast { channel, payload } => {
                registry.broadcast_locally(channel, payload, &[])
            }
            SyncMessage::Subscribe { channel, payload } => {
                registry.add_channel_to_stream(&payload.uid, channel) as usize
            }
            SyncMessage::Unsubscribe { channel, payload } => {
                registry.remove_channel_from_stream(&payload.uid, channel) as usize
            }
        }
    }
}

/// A [`SyncMessage`] tagged with the instance that published it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub origin: String,
    pub message: SyncMessage,
}

/// Protocol layer between the orchestrator and the bus
pub(crate) struct BusSync {
    bus: Arc<dyn Bus>,
    channel: String,
    queue: mpsc::Sender<SyncMessage>,
    cancel: CancellationToken,
    publisher: Mutex<Option<JoinHandle<()>>>,
    stopped: OnceCell<()>,
}

impl BusSync {
    /// Start the publisher task and listen on the sync channel
    ///
    /// A failing bus subscription is logged; the instance then only
    /// publishes and never hears from its peers.
    pub(crate) async fn start(
        bus: Arc<dyn Bus>,
        channel: String,
        instance_id: String,
        registry: StreamRegistry,
    ) -> Self {
        let (queue, rx) = mpsc::channel(PUBLISH_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();

        let publisher = tokio::spawn(Self::run_publisher(
            bus.clone(),
            channel.clone(),
            instance_id.clone(),
            rx,
            cancel.clone(),
        ));

        let handler = Self::inbound_handler(instance_id.clone(), registry);
        match bus.subscribe(&channel, handler).await {
            Ok(()) => info!(bus = bus.name(), channel = %channel, "Listening for sync messages"),
            Err(e) => warn!(
                error = %e,
                bus = bus.name(),
                channel = %channel,
                "Failed to subscribe to sync channel, running without peer updates"
            ),
        }

        Self {
            bus,
            channel,
            queue,
            cancel,
            publisher: Mutex::new(Some(publisher)),
            stopped: OnceCell::new(),
        }
    }

    fn inbound_handler(instance_id: String, registry: StreamRegistry) -> BusHandler {
        Arc::new(move |raw: String| {
            let envelope: BusEnvelope = match serde_json::from_str(&raw) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(error = %e, "Dropping undecodable sync message");
                    return;
                }
            };
            if envelope.origin == instance_id {
                return;
            }
            let applied = envelope.message.apply(&registry);
            debug!(
                origin = %envelope.origin,
                kind = envelope.message.type_name(),
                channel = %envelope.message.channel(),
                applied,
                "Applied sync message"
            );
        })
    }

    async fn run_publisher(
        bus: Arc<dyn Bus>,
        channel: String,
        instance_id: String,
        mut rx: mpsc::Receiver<SyncMessage>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                msg = rx.recv() => match msg {
                    Some(msg) => Self::publish_one(bus.as_ref(), &channel, &instance_id, msg).await,
                    None => return,
                },
                _ = cancel.cancelled() => break,
            }
        }

        // Flush whatever was queued before shutdown
        while let Ok(msg) = rx.try_recv() {
            Self::publish_one(bus.as_ref(), &channel, &instance_id, msg).await;
        }
    }

    async fn publish_one(bus: &dyn Bus, channel: &str, instance_id: &str, message: SyncMessage) {
        let kind = message.type_name();
        let envelope = BusEnvelope {
            origin: instance_id.to_string(),
            message,
        };
        let raw = match serde_json::to_string(&envelope) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, kind, "Failed to encode sync message");
                return;
            }
        };
        if let Err(e) = bus.publish(channel, raw).await {
            warn!(error = %e, kind, bus = bus.name(), "Failed to publish sync message");
        }
    }

    /// Queue a message for peers without waiting
    pub(crate) fn publish(&self, message: SyncMessage) {
        match self.queue.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                warn!(kind = message.type_name(), "Sync queue full, dropping message");
            }
            Err(TrySendError::Closed(message)) => {
                debug!(kind = message.type_name(), "Sync publisher stopped, dropping message");
            }
        }
    }

    pub(crate) fn channel(&self) -> &str {
        &self.channel
    }

    /// Flush queued messages and disconnect the bus
    ///
    /// Runs once. Concurrent callers wait until the bus is disconnected.
    pub(crate) async fn shutdown(&self) {
        self.stopped
            .get_or_init(|| async {
                self.cancel.cancel();
                let publisher = self.publisher.lock().take();
                if let Some(publisher) = publisher {
                    if let Err(e) = publisher.await {
                        warn!(error = %e, "Sync publisher task failed");
                    }
                }
                match self.bus.disconnect().await {
                    Ok(()) => info!(bus = self.bus.name(), "Bus disconnected"),
                    Err(e) => warn!(error = %e, bus = self.bus.name(), "Failed to disconnect bus"),
                }
            })
            .await;
    }
}
