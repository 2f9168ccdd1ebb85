mod config;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transmit::{Bus, Transmit};
use transmit_redis::RedisBus;

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(err) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("ERROR: failed to install rustls crypto provider: {:?}", err);
        anyhow::bail!("failed to install rustls crypto provider");
    }

    init_tracing();

    let config = AppConfig::load()?;

    tracing::info!(
        instance_id = %config.server.instance_id,
        port = config.server.port,
        redis = config.redis.url.is_some(),
        ping_interval_ms = config.transmit.ping_interval.map(|i| i.as_millis() as u64),
        sync_channel = %config.transmit.transport.channel,
        "Transmit server starting"
    );

    let bus: Option<Arc<dyn Bus>> = match config.redis.url.as_deref() {
        Some(url) => match RedisBus::connect(url).await {
            Ok(bus) => Some(Arc::new(bus)),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Failed to connect Redis - running as a single instance"
                );
                None
            }
        },
        None => {
            tracing::info!("Redis not configured - running as a single instance");
            None
        }
    };

    let transmit = Transmit::builder()
        .config(&config.transmit)
        .instance_id(config.server.instance_id.clone());
    let transmit = match bus {
        Some(bus) => transmit.shared_bus(bus),
        None => transmit,
    }
    .build()
    .await?;

    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ready", get(|| async { "READY" }))
        .merge(transmit::server::router(transmit.clone(), config.server.enable_admin));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    transmit.shutdown().await;
    tracing::info!("Transmit server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transmit=info,transmit_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}
