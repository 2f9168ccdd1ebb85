//! Stream and subscription registry

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::message::TransmitMessage;
use crate::stream::Stream;

#[derive(Debug, Default)]
struct Indices {
    /// uid -> stream
    streams: HashMap<String, Stream>,
    /// uid -> channels
    client_channels: HashMap<String, HashSet<String>>,
    /// channel -> uids
    channel_clients: HashMap<String, HashSet<String>>,
}

impl Indices {
    fn detach(&mut self, uid: &str) {
        let Some(channels) = self.client_channels.remove(uid) else {
            return;
        };
        for channel in channels {
            let now_empty = match self.channel_clients.get_mut(&channel) {
                Some(uids) => {
                    uids.remove(uid);
                    uids.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.channel_clients.remove(&channel);
            }
        }
    }
}

/// Indexes live streams by client uid and by channel membership
///
/// Both indices sit behind one lock, so readers never observe a client in
/// a channel's subscriber set without the channel in the client's set.
#[derive(Debug, Clone, Default)]
pub struct StreamRegistry {
    inner: Arc<RwLock<Indices>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream with no channel membership
    ///
    /// A stream already registered under the same uid is replaced, loses its
    /// subscriptions and has its transport ended.
    pub fn push(&self, stream: Stream) {
        let mut indices = self.inner.write();
        let uid = stream.uid().to_string();
        if let Some(previous) = indices.streams.insert(uid.clone(), stream) {
            info!(uid = %uid, replaced = %previous.id(), "Stream replaced by new connection");
            previous.close();
        }
        indices.detach(&uid);
        indices.client_channels.insert(uid, HashSet::new());
    }

    /// Remove a stream from every index
    ///
    /// Returns false when this connection is not registered, including when
    /// its uid has since been taken over by a newer connection.
    pub fn remove(&self, stream: &Stream) -> bool {
        let mut indices = self.inner.write();
        let registered = indices
            .streams
            .get(stream.uid())
            .is_some_and(|current| current.same_connection(stream));
        if !registered {
            return false;
        }
        indices.streams.remove(stream.uid());
        indices.detach(stream.uid());
        true
    }

    /// Subscribe a registered client to a channel
    pub fn add_channel_to_stream(&self, uid: &str, channel: &str) -> bool {
        let mut indices = self.inner.write();
        let Some(channels) = indices.client_channels.get_mut(uid) else {
            debug!(uid, channel, "Subscribe for unknown client");
            return false;
        };
        channels.insert(channel.to_string());
        indices
            .channel_clients
            .entry(channel.to_string())
            .or_default()
            .insert(uid.to_string());
        true
    }

    /// Unsubscribe a client from a channel
    pub fn remove_channel_from_stream(&self, uid: &str, channel: &str) -> bool {
        let mut indices = self.inner.write();
        let removed = indices
            .client_channels
            .get_mut(uid)
            .is_some_and(|channels| channels.remove(channel));
        if !removed {
            return false;
        }
        let now_empty = match indices.channel_clients.get_mut(channel) {
            Some(uids) => {
                uids.remove(uid);
                uids.is_empty()
            }
            None => false,
        };
        if now_empty {
            indices.channel_clients.remove(channel);
        }
        true
    }

    /// Streams currently subscribed to a channel
    pub fn find_by_channel(&self, channel: &str) -> Vec<Stream> {
        let indices = self.inner.read();
        indices
            .channel_clients
            .get(channel)
            .map(|uids| {
                uids.iter()
                    .filter_map(|uid| indices.streams.get(uid).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Write a payload to every local subscriber of a channel, skipping
    /// excluded uids
    ///
    /// The subscriber set is snapshotted first; writes happen outside the
    /// lock. Returns the number of streams written.
    pub fn broadcast_locally(&self, channel: &str, payload: &Value, excluded: &[String]) -> usize {
        let subscribers = self.find_by_channel(channel);
        let message = TransmitMessage::new(channel, payload.clone());

        let sent = subscribers
            .iter()
            .filter(|stream| !excluded.iter().any(|uid| uid == stream.uid()))
            .filter(|stream| stream.write(message.clone()))
            .count();

        debug!(channel, sent, "Sent message to channel");
        sent
    }

    /// Channels a client is subscribed to, or `None` for an unknown client
    pub fn get_channels_by_client(&self, uid: &str) -> Option<HashSet<String>> {
        self.inner.read().client_channels.get(uid).cloned()
    }

    /// Snapshot of every stream with its channels
    pub fn get_all_subscribers(&self) -> Vec<(Stream, HashSet<String>)> {
        let indices = self.inner.read();
        indices
            .streams
            .iter()
            .map(|(uid, stream)| {
                let channels = indices.client_channels.get(uid).cloned().unwrap_or_default();
                (stream.clone(), channels)
            })
            .collect()
    }

    /// Look up the stream for a uid
    pub fn get(&self, uid: &str) -> Option<Stream> {
        self.inner.read().streams.get(uid).cloned()
    }

    /// Registered client uids
    pub fn uids(&self) -> Vec<String> {
        self.inner.read().streams.keys().cloned().collect()
    }

    /// Total stream count
    pub fn len(&self) -> usize {
        self.inner.read().streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().streams.is_empty()
    }

    /// Number of streams subscribed to a channel
    pub fn channel_subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .read()
            .channel_clients
            .get(channel)
            .map(|uids| uids.len())
            .unwrap_or(0)
    }
}
