//! Redis Pub/Sub bus

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use transmit::{Bus, BusHandler};

/// Timeout for a single PUBLISH
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
/// Initial backoff delay for subscriber reconnection
const INITIAL_BACKOFF_SECS: u64 = 1;
/// Maximum backoff delay for subscriber reconnection
const MAX_BACKOFF_SECS: u64 = 30;

/// Redis Pub/Sub bus
///
/// Publishes over a multiplexed connection manager and listens on a
/// dedicated Pub/Sub connection per subscribed channel. Subscriber
/// connections reconnect with exponential backoff until `disconnect`.
///
/// # Example
///
/// ```rust,ignore
/// use transmit::Transmit;
/// use transmit_redis::RedisBus;
///
/// let bus = RedisBus::connect("redis://localhost:6379").await?;
///
/// let transmit = Transmit::builder()
///     .bus(bus)
///     .sync_channel("transmit::broadcast")
///     .build()
///     .await?;
/// ```
pub struct RedisBus {
    client: redis::Client,
    publisher: ConnectionManager,
    cancel: CancellationToken,
    subscribers: Mutex<Vec<JoinHandle<()>>>,
}

impl RedisBus {
    /// Connect to Redis
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let publisher = ConnectionManager::new(client.clone()).await?;
        info!("Redis bus connected");
        Ok(Self {
            client,
            publisher,
            cancel: CancellationToken::new(),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    async fn listen(
        client: redis::Client,
        channel: String,
        handler: BusHandler,
        cancel: CancellationToken,
    ) {
        let mut backoff_secs = INITIAL_BACKOFF_SECS;

        loop {
            let mut pubsub = match client.get_async_pubsub().await {
                Ok(pubsub) => pubsub,
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_secs,
                        "Failed to open Redis Pub/Sub connection, retrying"
                    );
                    if Self::wait(&cancel, backoff_secs).await {
                        return;
                    }
                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }
            };

            if let Err(e) = pubsub.subscribe(&channel).await {
                warn!(
                    error = %e,
                    channel = %channel,
                    backoff_secs,
                    "Failed to subscribe, retrying"
                );
                if Self::wait(&cancel, backoff_secs).await {
                    return;
                }
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                continue;
            }

            info!(channel = %channel, "Subscribed");
            backoff_secs = INITIAL_BACKOFF_SECS;
            let mut stream = pubsub.on_message();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(channel = %channel, "Redis subscriber stopped");
                        return;
                    }
                    msg = stream.next() => match msg {
                        Some(msg) => match msg.get_payload::<String>() {
                            Ok(payload) => handler(payload),
                            Err(e) => debug!(error = %e, "Ignoring non-text Redis message"),
                        },
                        None => {
                            warn!(channel = %channel, "Redis stream ended, reconnecting");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Sleep for the backoff, returning true if cancelled meanwhile
    async fn wait(cancel: &CancellationToken, secs: u64) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(Duration::from_secs(secs)) => false,
        }
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, channel: &str, message: String) -> anyhow::Result<()> {
        if self.cancel.is_cancelled() {
            anyhow::bail!("Redis bus is disconnected");
        }
        let mut conn = self.publisher.clone();
        let mut cmd = redis::cmd("PUBLISH");
        cmd.arg(channel).arg(message);

        match tokio::time::timeout(PUBLISH_TIMEOUT, cmd.query_async::<i64>(&mut conn)).await {
            Ok(Ok(receivers)) => {
                debug!(channel, receivers, "Published to Redis");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => anyhow::bail!("Redis publish timed out"),
        }
    }

    async fn subscribe(&self, channel: &str, handler: BusHandler) -> anyhow::Result<()> {
        if self.cancel.is_cancelled() {
            anyhow::bail!("Redis bus is disconnected");
        }
        let task = tokio::spawn(Self::listen(
            self.client.clone(),
            channel.to_string(),
            handler,
            self.cancel.clone(),
        ));
        self.subscribers.lock().await.push(task);
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.subscribers.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Redis subscriber task failed");
            }
        }
        info!("Redis bus disconnected");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Redis Pub/Sub"
    }
}
