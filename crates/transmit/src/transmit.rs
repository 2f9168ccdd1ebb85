//! Transmit builder and broadcast orchestrator

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::channel::{ChannelParams, SecureChannelStore};
use crate::config::TransmitConfig;
use crate::context::TransmitContext;
use crate::error::{Error, Result};
use crate::events::{EventHub, EventKind, TransmitEvent};
use crate::message::{empty_payload, TransmitMessage};
use crate::registry::StreamRegistry;
use crate::stream::{Outbound, Stream, DEFAULT_BUFFER_SIZE};
use crate::sync::{BusSync, SyncMessage, DEFAULT_SYNC_CHANNEL};

/// Async authorization callback for a secured channel pattern
///
/// Resolve to `Ok(true)` to allow, `Ok(false)` to forbid; an error is
/// reported to the client as an internal error.
pub type ChannelAuthorizer = Arc<
    dyn Fn(Arc<TransmitContext>, ChannelParams) -> BoxFuture<'static, anyhow::Result<bool>>
        + Send
        + Sync,
>;

/// Helper to create an authorizer from a closure
pub fn authorizer<F, Fut>(f: F) -> ChannelAuthorizer
where
    F: Fn(Arc<TransmitContext>, ChannelParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    Arc::new(move |ctx, params| Box::pin(f(ctx, params)))
}

/// Client uid(s) skipped by [`Transmit::broadcast_except`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Excluded(Vec<String>);

impl Excluded {
    pub fn contains(&self, uid: &str) -> bool {
        self.0.iter().any(|excluded| excluded == uid)
    }
}

impl From<&str> for Excluded {
    fn from(uid: &str) -> Self {
        Self(vec![uid.to_string()])
    }
}

impl From<String> for Excluded {
    fn from(uid: String) -> Self {
        Self(vec![uid])
    }
}

impl From<&String> for Excluded {
    fn from(uid: &String) -> Self {
        Self(vec![uid.clone()])
    }
}

impl From<Vec<String>> for Excluded {
    fn from(uids: Vec<String>) -> Self {
        Self(uids)
    }
}

impl From<Vec<&str>> for Excluded {
    fn from(uids: Vec<&str>) -> Self {
        Self(uids.into_iter().map(String::from).collect())
    }
}

impl From<&[&str]> for Excluded {
    fn from(uids: &[&str]) -> Self {
        Self(uids.iter().map(|uid| uid.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Excluded {
    fn from(uids: [&str; N]) -> Self {
        Self(uids.iter().map(|uid| uid.to_string()).collect())
    }
}

impl<const N: usize> From<&[&str; N]> for Excluded {
    fn from(uids: &[&str; N]) -> Self {
        Self(uids.iter().map(|uid| uid.to_string()).collect())
    }
}

struct Inner {
    instance_id: String,
    registry: StreamRegistry,
    secure_channels: SecureChannelStore,
    authorizers: DashMap<String, ChannelAuthorizer>,
    events: EventHub,
    sync: Option<BusSync>,
    buffer_size: usize,
    heartbeat_cancel: CancellationToken,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.heartbeat_cancel.cancel();
    }
}

/// Channel broadcaster
///
/// Owns the stream registry, the secured channel patterns and the bus
/// synchronizer. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Transmit {
    inner: Arc<Inner>,
}

impl Transmit {
    /// Create a new builder
    pub fn builder() -> TransmitBuilder {
        TransmitBuilder::default()
    }

    /// Build from a loaded configuration, optionally synchronized over `bus`
    pub async fn from_config(config: &TransmitConfig, bus: Option<Arc<dyn Bus>>) -> Result<Self> {
        let mut builder = Self::builder().config(config);
        if let Some(bus) = bus {
            builder = builder.shared_bus(bus);
        }
        builder.build().await
    }

    /// Open a stream for the client declared in `context`
    ///
    /// The returned [`Outbound`] must be handed to the transport; dropping it
    /// unregisters the stream and fires `disconnect`.
    pub fn create_stream(&self, context: Arc<TransmitContext>) -> Result<(Stream, Outbound)> {
        let uid = context
            .uid()
            .filter(|uid| !uid.is_empty())
            .ok_or(Error::MissingUid)?
            .to_string();

        let (stream, mut outbound) = Stream::new(uid.clone(), self.inner.buffer_size);
        self.inner.registry.push(stream.clone());

        let registry = self.inner.registry.clone();
        let events = self.inner.events.clone();
        let closed = stream.clone();
        let close_context = context.clone();
        outbound.on_close(move || {
            let removed = registry.remove(&closed);
            info!(
                uid = %closed.uid(),
                connection_id = %closed.id(),
                removed,
                remaining = registry.len(),
                "Stream closed"
            );
            events.emit(TransmitEvent::Disconnect {
                uid: closed.uid().to_string(),
                context: close_context,
            });
        });

        info!(
            uid = %uid,
            connection_id = %stream.id(),
            total = self.inner.registry.len(),
            "Stream opened"
        );
        self.inner
            .events
            .emit(TransmitEvent::Connect { uid, context });

        Ok((stream, outbound))
    }

    /// Declare a secured channel pattern without an authorizer
    ///
    /// Every subscription to a matching channel is denied until
    /// [`Transmit::authorize_channel`] attaches a callback.
    pub fn secure_channel(&self, pattern: &str) -> Result<()> {
        self.inner.secure_channels.add(pattern)
    }

    /// Require authorization for channels matching `pattern`
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// transmit.authorize_channel("users/:id", |ctx, params| async move {
    ///     Ok(ctx.uid() == params.get("id"))
    /// })?;
    /// ```
    pub fn authorize_channel<F, Fut>(&self, pattern: &str, callback: F) -> Result<()>
    where
        F: Fn(Arc<TransmitContext>, ChannelParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.inner.secure_channels.add(pattern)?;
        self.inner
            .authorizers
            .insert(pattern.to_string(), authorizer(callback));
        debug!(pattern, "Secured channel registered");
        Ok(())
    }

    /// Like [`Transmit::authorize_channel`], with parameters deserialized
    /// into `P`
    ///
    /// Parameters that do not fit `P` count as an authorization failure.
    pub fn authorize_channel_as<P, F, Fut>(&self, pattern: &str, callback: F) -> Result<()>
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(Arc<TransmitContext>, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let callback = Arc::new(callback);
        self.authorize_channel(pattern, move |ctx, params: ChannelParams| {
            let callback = callback.clone();
            async move {
                let params = params.parse::<P>()?;
                callback(ctx, params).await
            }
        })
    }

    /// Subscribe a client to a channel, authorizing secured channels first
    ///
    /// Returns false when authorization denies or fails (the outcome is
    /// recorded on `context`) or when no stream is registered for `uid`.
    pub async fn subscribe(&self, uid: &str, channel: &str, context: Arc<TransmitContext>) -> bool {
        if let Some(matched) = self.inner.secure_channels.matches(channel) {
            let authorizer = self
                .inner
                .authorizers
                .get(&matched.pattern)
                .map(|entry| entry.value().clone());
            let Some(authorizer) = authorizer else {
                warn!(
                    uid,
                    channel,
                    pattern = %matched.pattern,
                    "No authorizer for secured channel"
                );
                return false;
            };

            let decision = AssertUnwindSafe(authorizer(context.clone(), matched.params))
                .catch_unwind()
                .await;
            match decision {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    debug!(uid, channel, "Subscription forbidden");
                    context.forbid();
                    return false;
                }
                Ok(Err(e)) => {
                    warn!(uid, channel, error = %e, "Authorization failed");
                    context.fail();
                    return false;
                }
                Err(_) => {
                    warn!(uid, channel, "Authorization callback panicked");
                    context.fail();
                    return false;
                }
            }
        }

        self.inner.events.emit(TransmitEvent::Subscribe {
            uid: uid.to_string(),
            channel: channel.to_string(),
            context,
        });
        self.publish(SyncMessage::subscribe(channel, uid));
        self.inner.registry.add_channel_to_stream(uid, channel)
    }

    /// Unsubscribe a client from a channel
    pub fn unsubscribe(&self, uid: &str, channel: &str, context: Arc<TransmitContext>) -> bool {
        self.inner.events.emit(TransmitEvent::Unsubscribe {
            uid: uid.to_string(),
            channel: channel.to_string(),
            context,
        });
        self.publish(SyncMessage::unsubscribe(channel, uid));
        self.inner.registry.remove_channel_from_stream(uid, channel)
    }

    /// Broadcast to every subscriber of a channel, on this instance and on
    /// peers reached through the bus
    ///
    /// `None` sends the empty payload. Returns the number of local streams
    /// written.
    pub fn broadcast(&self, channel: &str, payload: impl Into<Option<Value>>) -> usize {
        let payload = payload.into().unwrap_or_else(empty_payload);
        self.publish(SyncMessage::broadcast(channel, payload.clone()));
        let sent = self.inner.registry.broadcast_locally(channel, &payload, &[]);
        self.inner.events.emit(TransmitEvent::Broadcast {
            channel: channel.to_string(),
            payload,
        });
        sent
    }

    /// Broadcast to local subscribers except the given uid(s)
    ///
    /// Nothing is published on the bus: peers never see this payload.
    pub fn broadcast_except(
        &self,
        channel: &str,
        payload: impl Into<Option<Value>>,
        excluded: impl Into<Excluded>,
    ) -> usize {
        let payload = payload.into().unwrap_or_else(empty_payload);
        let excluded = excluded.into();
        self.inner
            .registry
            .broadcast_locally(channel, &payload, &excluded.0)
    }

    /// Registered client uids
    pub fn get_clients(&self) -> Vec<String> {
        self.inner.registry.uids()
    }

    /// Channels a client is subscribed to, sorted; empty for unknown clients
    pub fn get_subscriptions_for_client(&self, uid: &str) -> Vec<String> {
        let mut channels: Vec<String> = self
            .inner
            .registry
            .get_channels_by_client(uid)
            .map(|channels| channels.into_iter().collect())
            .unwrap_or_default();
        channels.sort();
        channels
    }

    /// Register a lifecycle handler; all handlers for a kind run in order
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&TransmitEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, Arc::new(handler));
    }

    /// The stream registry
    pub fn registry(&self) -> &StreamRegistry {
        &self.inner.registry
    }

    /// This instance's ID, used to tag sync messages
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// The bus channel used for sync, if a bus is configured
    pub fn sync_channel(&self) -> Option<&str> {
        self.inner.sync.as_ref().map(|sync| sync.channel())
    }

    /// Stop the heartbeat and disconnect the bus
    pub async fn shutdown(&self) {
        self.inner.heartbeat_cancel.cancel();
        let heartbeat = self.inner.heartbeat.lock().take();
        if let Some(heartbeat) = heartbeat {
            if let Err(e) = heartbeat.await {
                warn!(error = %e, "Heartbeat task failed");
            }
        }
        if let Some(sync) = &self.inner.sync {
            sync.shutdown().await;
        }
        info!(instance_id = %self.inner.instance_id, "Transmit shutdown complete");
    }

    fn publish(&self, message: SyncMessage) {
        if let Some(sync) = &self.inner.sync {
            sync.publish(message);
        }
    }

    fn start_heartbeat(
        registry: StreamRegistry,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let streams = registry.get_all_subscribers();
                        let sent = streams
                            .iter()
                            .filter(|(stream, _)| stream.write(TransmitMessage::ping()))
                            .count();
                        debug!(streams = streams.len(), sent, "Heartbeat");
                    }
                }
            }
        })
    }
}

/// Builder for [`Transmit`]
pub struct TransmitBuilder {
    ping_interval: Option<Duration>,
    bus: Option<Arc<dyn Bus>>,
    sync_channel: String,
    instance_id: Option<String>,
    buffer_size: usize,
}

impl Default for TransmitBuilder {
    fn default() -> Self {
        Self {
            ping_interval: None,
            bus: None,
            sync_channel: DEFAULT_SYNC_CHANNEL.to_string(),
            instance_id: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl TransmitBuilder {
    /// Apply a loaded configuration
    pub fn config(mut self, config: &TransmitConfig) -> Self {
        self.ping_interval = config.ping_interval;
        self.sync_channel = config.transport.channel.clone();
        self
    }

    /// Set the heartbeat interval
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    /// Set the bus used to synchronize with other instances
    pub fn bus<B: Bus>(mut self, bus: B) -> Self {
        self.bus = Some(Arc::new(bus));
        self
    }

    /// Set a shared bus
    pub fn shared_bus(mut self, bus: Arc<dyn Bus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Set the bus channel carrying sync messages
    pub fn sync_channel(mut self, channel: impl Into<String>) -> Self {
        self.sync_channel = channel.into();
        self
    }

    /// Set the instance ID
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Set the per-stream outbound buffer
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Build the broadcaster
    ///
    /// Must run inside a Tokio runtime: the heartbeat and bus publisher
    /// are spawned here.
    pub async fn build(self) -> Result<Transmit> {
        let instance_id = self
            .instance_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let registry = StreamRegistry::new();

        let sync = match self.bus {
            Some(bus) => {
                if self.sync_channel.is_empty() {
                    return Err(Error::Config(
                        "a sync channel is required when a bus is configured".into(),
                    ));
                }
                info!(bus = bus.name(), channel = %self.sync_channel, "Bus sync enabled");
                let sync =
                    BusSync::start(bus, self.sync_channel, instance_id.clone(), registry.clone())
                        .await;
                Some(sync)
            }
            None => None,
        };

        let heartbeat_cancel = CancellationToken::new();
        let heartbeat = self.ping_interval.filter(|i| !i.is_zero()).map(|interval| {
            info!(interval_ms = interval.as_millis() as u64, "Heartbeat enabled");
            Transmit::start_heartbeat(registry.clone(), interval, heartbeat_cancel.clone())
        });

        Ok(Transmit {
            inner: Arc::new(Inner {
                instance_id,
                registry,
                secure_channels: SecureChannelStore::new(),
                authorizers: DashMap::new(),
                events: EventHub::default(),
                sync,
                buffer_size: self.buffer_size,
                heartbeat_cancel,
                heartbeat: Mutex::new(heartbeat),
            }),
        })
    }
}
