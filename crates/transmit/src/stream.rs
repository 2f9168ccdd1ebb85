//! Client streams and their outbound transport

use futures::stream::Stream as FuturesStream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::warn;

use crate::message::TransmitMessage;

/// Default number of frames buffered per stream
pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// Server-side handle to one client's open push connection
#[derive(Debug, Clone)]
pub struct Stream {
    /// Unique connection ID
    id: String,
    /// Client-declared identity
    uid: String,
    /// When the connection was established
    connected_at: chrono::DateTime<chrono::Utc>,
    sender: mpsc::Sender<TransmitMessage>,
    /// Cancelled when the server ends the connection
    ended: CancellationToken,
}

impl Stream {
    /// Create a stream and the outbound half that feeds the transport
    pub fn new(uid: impl Into<String>, buffer_size: usize) -> (Self, Outbound) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        let ended = CancellationToken::new();
        let outbound = Outbound {
            inner: ReceiverStream::new(receiver),
            ended: Box::pin(ended.clone().cancelled_owned()),
            on_close: None,
        };
        let stream = Self {
            id: uuid::Uuid::new_v4().to_string(),
            uid: uid.into(),
            connected_at: chrono::Utc::now(),
            sender,
            ended,
        };
        (stream, outbound)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn connected_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.connected_at
    }

    /// Check if the transport is still open
    pub fn is_open(&self) -> bool {
        !self.ended.is_cancelled() && !self.sender.is_closed()
    }

    /// End the connection from the server side
    ///
    /// The transport yields no further frames and finishes.
    pub fn close(&self) {
        self.ended.cancel();
    }

    /// Write a frame without waiting
    ///
    /// Returns false when the transport is closed or its buffer is full.
    pub fn write(&self, message: TransmitMessage) -> bool {
        if self.ended.is_cancelled() {
            return false;
        }
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!(
                    uid = %self.uid,
                    channel = %message.channel,
                    "Stream buffer full, dropping message"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Whether both handles refer to the same connection
    pub fn same_connection(&self, other: &Stream) -> bool {
        self.id == other.id
    }
}

/// The transport side of a [`Stream`]
///
/// Yields every frame written to the stream, in order, and finishes once
/// [`Stream::close`] is called. Dropping it closes the connection and runs
/// the close hook exactly once.
pub struct Outbound {
    inner: ReceiverStream<TransmitMessage>,
    ended: Pin<Box<WaitForCancellationFutureOwned>>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl Outbound {
    /// Install the hook run when this transport closes
    pub(crate) fn on_close(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.on_close = Some(Box::new(hook));
    }
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("has_close_hook", &self.on_close.is_some())
            .finish()
    }
}

impl Drop for Outbound {
    fn drop(&mut self) {
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

impl FuturesStream for Outbound {
    type Item = TransmitMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.ended.as_mut().poll(cx).is_ready() {
            return Poll::Ready(None);
        }
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
