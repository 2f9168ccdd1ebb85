//! Demo: two Transmit instances kept in sync over a shared MemoryBus
//!
//! Run with: cargo run --example cluster
//!
//! Then, in another terminal:
//! ```bash
//! # Connect to instance A
//! curl -N "http://localhost:8081/__transmit/events?uid=alice"
//!
//! # Subscribe alice to room/1 through instance A
//! curl -X POST -H 'Content-Type: application/json' \
//!   -d '{"uid":"alice","channel":"room/1"}' http://localhost:8081/__transmit/subscribe
//! ```
//!
//! Instance B broadcasts on `room/1` every 3 seconds; alice receives the
//! frames through instance A.

use std::future::IntoFuture;
use std::time::Duration;
use transmit::{EventKind, MemoryBus, Transmit, TransmitEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let bus = MemoryBus::default();

    let first = Transmit::builder()
        .instance_id("instance-a")
        .ping_interval(Duration::from_secs(30))
        .bus(bus.connect())
        .build()
        .await?;
    let second = Transmit::builder()
        .instance_id("instance-b")
        .bus(bus.connect())
        .build()
        .await?;

    first.on(EventKind::Subscribe, |event| {
        if let TransmitEvent::Subscribe { uid, channel, .. } = event {
            println!("[instance-a] {uid} joined {channel}");
        }
    });

    let broadcaster = second.clone();
    tokio::spawn(async move {
        let mut count = 0;
        loop {
            tokio::time::sleep(Duration::from_secs(3)).await;
            count += 1;
            let payload = serde_json::json!({"count": count, "from": "instance-b"});
            broadcaster.broadcast("room/1", payload);
            println!("[instance-b] broadcast #{count}");
        }
    });

    let listener_a = tokio::net::TcpListener::bind("0.0.0.0:8081").await?;
    let listener_b = tokio::net::TcpListener::bind("0.0.0.0:8082").await?;
    println!("Instance A: http://localhost:8081");
    println!("Instance B: http://localhost:8082");

    let app_a = transmit::server::router(first.clone(), true);
    let app_b = transmit::server::router(second.clone(), true);
    let server_a = axum::serve(listener_a, app_a).into_future();
    let server_b = axum::serve(listener_b, app_b).into_future();

    tokio::select! {
        result = server_a => result?,
        result = server_b => result?,
        _ = tokio::signal::ctrl_c() => println!("Shutting down"),
    }

    first.shutdown().await;
    second.shutdown().await;
    Ok(())
}
