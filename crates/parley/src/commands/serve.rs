//! HTTP server command implementation.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use parley::config::Config;
use parley::llm;
use parley::server::{self, AppState};
use parley::session::{ExchangeDispatcher, ResponsePublisher, SubscriptionRegistry};

pub async fn run(
    config_path: &str,
    host_override: Option<IpAddr>,
    port_override: Option<u16>,
) -> Result<()> {
    let mut config = Config::load(config_path)
        .await
        .with_context(|| format!("failed to load config from {config_path}"))?;

    // CLI overrides config
    if let Some(host) = host_override {
        config.server.host = host.to_string();
    }
    if let Some(port) = port_override {
        config.server.port = port;
    }

    let backend =
        llm::build_backend(&config.backend).context("failed to configure inference backend")?;

    let registry = SubscriptionRegistry::new(config.server.subscriber_buffer);
    let dispatcher = ExchangeDispatcher::new(
        backend,
        ResponsePublisher::new(registry.clone()),
        config.dispatcher.max_concurrent_requests,
        Duration::from_secs(config.backend.timeout_seconds),
    )
    .with_history(config.dispatcher.conversation_history());
    let state = AppState {
        registry,
        dispatcher,
        keep_alive_interval_seconds: config.server.keep_alive_interval_seconds,
        max_connections: config.server.max_connections,
        shutdown: CancellationToken::new(),
    };

    let ip: IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::new(ip, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(addr = %addr, version = %parley::build_info::version_string(), "Starting server");
    server::serve(
        listener,
        state,
        config.server.request_timeout_seconds,
        shutdown_signal(),
    )
    .await?;
    info!("Server stopped");

    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
