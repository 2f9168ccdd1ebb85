//! Demo: secured channels with typed parameters
//!
//! Run with: cargo run --example secure_channel
//!
//! Test commands:
//! ```bash
//! curl -N "http://localhost:8080/__transmit/events?uid=42"
//!
//! # Own channel with a token (204)
//! curl -i -X POST -H 'Authorization: Bearer secret-token' -H 'Content-Type: application/json' \
//!   -d '{"uid":"42","channel":"users/42"}' http://localhost:8080/__transmit/subscribe
//!
//! # Someone else's channel (403)
//! curl -i -X POST -H 'Authorization: Bearer secret-token' -H 'Content-Type: application/json' \
//!   -d '{"uid":"42","channel":"users/7"}' http://localhost:8080/__transmit/subscribe
//!
//! # Public channel, no authorization involved (204)
//! curl -i -X POST -H 'Content-Type: application/json' \
//!   -d '{"uid":"42","channel":"news"}' http://localhost:8080/__transmit/subscribe
//! ```

use serde::Deserialize;
use std::time::Duration;
use transmit::Transmit;

// Channel parameters are always strings
#[derive(Deserialize)]
struct UserChannel {
    id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let transmit = Transmit::builder()
        .ping_interval(Duration::from_secs(15))
        .build()
        .await?;

    transmit.authorize_channel_as("users/:id", |ctx, channel: UserChannel| async move {
        if ctx.bearer_token() != Some("secret-token") {
            return Ok(false);
        }
        Ok(ctx.uid() == Some(channel.id.as_str()))
    })?;

    // Declared but never authorized: every subscription is denied
    transmit.secure_channel("admin/*")?;

    let ticker = transmit.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(3)).await;
            ticker.broadcast("users/42", serde_json::json!({"msg": "private hello"}));
            ticker.broadcast("news", serde_json::json!({"msg": "public hello"}));
        }
    });

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    println!("Secure channel demo: http://localhost:8080");

    axum::serve(listener, transmit::server::router(transmit.clone(), false))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    transmit.shutdown().await;
    Ok(())
}
