//! # Transmit
//!
//! Channel-based Server-Sent Events broadcasting for Rust.
//!
//! ## Features
//!
//! - **Channels**: Clients subscribe to free-form channel names such as `room/1`
//! - **Secured Channels**: Patterns like `chat/:room` require an async authorization callback
//! - **Multi-instance**: Implement `Bus` to keep several servers in sync
//!   (Redis in `transmit-redis`)
//! - **Lifecycle Hooks**: Observe connect, disconnect, subscribe, unsubscribe and broadcast
//! - **Heartbeat**: Optional ping frames so clients detect dead connections
//! - **Built-in Routes**: Optional Axum routes for the SSE, subscribe and unsubscribe endpoints
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use transmit::Transmit;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transmit = Transmit::builder()
//!         .ping_interval(Duration::from_secs(30))
//!         .build()
//!         .await?;
//!
//!     let app = transmit::server::router(transmit.clone(), false);
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!
//!     transmit.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Secured Channels
//!
//! ```rust,ignore
//! transmit.authorize_channel("users/:id", |ctx, params| async move {
//!     Ok(ctx.uid() == params.get("id"))
//! })?;
//! ```
//!
//! ## Sharing a Bus
//!
//! ```rust,ignore
//! use transmit::{MemoryBus, Transmit};
//!
//! let bus = MemoryBus::default();
//! let first = Transmit::builder().bus(bus.connect()).build().await?;
//! let second = Transmit::builder().bus(bus.connect()).build().await?;
//!
//! // Reaches subscribers of "room/1" on both instances
//! second.broadcast("room/1", serde_json::json!({"msg": "hi"}));
//! ```

pub mod bus;
pub mod channel;
mod config;
mod context;
mod error;
pub mod events;
mod message;
mod registry;
mod stream;
pub mod sync;
mod transmit;

#[cfg(feature = "server")]
pub mod server;

// Re-exports
pub use bus::{Bus, BusHandler, MemoryBus};
pub use channel::{ChannelMatch, ChannelParams, ChannelPattern, SecureChannelStore};
pub use config::{parse_ping_interval, TransmitConfig, TransportConfig};
pub use context::{AuthOutcome, TransmitContext};
pub use error::{Error, Result};
pub use events::{EventHandler, EventKind, TransmitEvent};
pub use message::{empty_payload, TransmitMessage, PING_CHANNEL};
pub use registry::StreamRegistry;
pub use stream::{Outbound, Stream, DEFAULT_BUFFER_SIZE};
pub use sync::{BusEnvelope, ClientRef, SyncMessage, DEFAULT_SYNC_CHANNEL};
pub use transmit::{authorizer, ChannelAuthorizer, Excluded, Transmit, TransmitBuilder};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
