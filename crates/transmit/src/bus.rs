//! Bus trait and implementations
//!
//! Implement `Bus` to synchronize several Transmit instances over any
//! publish/subscribe backend.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Handler invoked once per message received on a bus channel
pub type BusHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Trait for cross-instance publish/subscribe transports
///
/// # Example
///
/// ```rust,ignore
/// use transmit::{Bus, BusHandler};
/// use async_trait::async_trait;
///
/// struct MyBus {
///     client: MyClient,
/// }
///
/// #[async_trait]
/// impl Bus for MyBus {
///     async fn publish(&self, channel: &str, message: String) -> anyhow::Result<()> {
///         self.client.publish(channel, message).await
///     }
///
///     async fn subscribe(&self, channel: &str, handler: BusHandler) -> anyhow::Result<()> {
///         let mut rx = self.client.subscribe(channel).await?;
///         tokio::spawn(async move {
///             while let Some(msg) = rx.recv().await {
///                 handler(msg);
///             }
///         });
///         Ok(())
///     }
///
///     async fn disconnect(&self) -> anyhow::Result<()> {
///         self.client.close().await
///     }
///
///     fn name(&self) -> &'static str { "MyBus" }
/// }
/// ```
#[async_trait]
pub trait Bus: Send + Sync + 'static {
    /// Publish a message on a channel
    async fn publish(&self, channel: &str, message: String) -> anyhow::Result<()>;

    /// Register a handler for every message received on a channel
    async fn subscribe(&self, channel: &str, handler: BusHandler) -> anyhow::Result<()>;

    /// Release the bus connection
    async fn disconnect(&self) -> anyhow::Result<()>;

    /// Return the bus name (for logging)
    fn name(&self) -> &'static str;
}

/// In-process bus
///
/// Clones share topics and connection state. Use [`MemoryBus::connect`] to
/// get an independent connection to the same topics, so several `Transmit`
/// instances in one process can be wired together; disconnecting one stops
/// only its own subscriptions. Suitable for tests and single-process
/// deployments.
#[derive(Clone)]
pub struct MemoryBus {
    topics: Arc<DashMap<String, broadcast::Sender<String>>>,
    cancel: CancellationToken,
    buffer_size: usize,
}

impl MemoryBus {
    /// Create a new memory bus with the given per-topic buffer
    pub fn new(buffer_size: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            cancel: CancellationToken::new(),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Another connection to the same bus
    pub fn connect(&self) -> Self {
        Self {
            topics: self.topics.clone(),
            cancel: CancellationToken::new(),
            buffer_size: self.buffer_size,
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.topics
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.buffer_size).0)
            .clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, channel: &str, message: String) -> anyhow::Result<()> {
        if self.cancel.is_cancelled() {
            anyhow::bail!("MemoryBus is disconnected");
        }
        // No receivers is not an error for a pub/sub bus
        let _ = self.sender(channel).send(message);
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: BusHandler) -> anyhow::Result<()> {
        if self.cancel.is_cancelled() {
            anyhow::bail!("MemoryBus is disconnected");
        }
        let mut receiver = self.sender(channel).subscribe();
        let cancel = self.cancel.clone();
        let channel = channel.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = receiver.recv() => match msg {
                        Ok(msg) => handler(msg),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                channel = %channel,
                                skipped,
                                "MemoryBus subscriber lagged"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.cancel.cancel();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}
