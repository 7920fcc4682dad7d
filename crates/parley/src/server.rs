use std::future::Future;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::info;

use crate::handlers;
use crate::session::{ExchangeDispatcher, SubscriptionRegistry};

// ============================================================================
// Application State
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: SubscriptionRegistry,
    pub dispatcher: ExchangeDispatcher,
    pub keep_alive_interval_seconds: u64,
    pub max_connections: usize,
    /// Cancelled when the server begins shutting down. New Submits and Push
    /// streams are refused from then on.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Shut down in order: refuse new work, wait until every in-flight reply
    /// has been published, then close the registry so open Push streams
    /// flush what is queued for them and end.
    pub async fn drain(&self) {
        self.shutdown.cancel();
        info!(in_flight = self.dispatcher.in_flight(), "Draining in-flight dispatches");
        self.dispatcher.shutdown().await;
        self.registry.close();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

// ============================================================================
// Server Setup
// ============================================================================

pub fn build_app(state: AppState, request_timeout_seconds: u64) -> Router {
    let max_connections = state.max_connections;

    // Push streams stay open indefinitely, so they get no request timeout
    let streaming_routes = Router::new()
        .route(
            "/sessions/{session_id}/events",
            get(handlers::v1::stream_events),
        )
        .with_state(state.clone());

    let api_routes = Router::new()
        .route(
            "/sessions/{session_id}/messages",
            post(handlers::v1::submit_message),
        )
        .with_state(state.clone())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_seconds),
        ));

    let api_v1 = Router::new()
        .merge(streaming_routes)
        .merge(api_routes)
        .layer(DefaultBodyLimit::max(256 * 1024)) // 256 KB
        .layer(ConcurrencyLimitLayer::new(max_connections));

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .with_state(state)
        .nest("/api/v1", api_v1)
}

/// Serve the app on `listener` until `signal` resolves, then drain.
///
/// Connections are still accepted while draining so late requests get a 503
/// instead of a refused connection.
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    request_timeout_seconds: u64,
    signal: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_app(state.clone(), request_timeout_seconds);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            state.drain().await;
        })
        .await
}
