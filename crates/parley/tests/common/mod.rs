//! Common test utilities.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use parley::llm::{InferenceBackend, LLMError};
use parley::server::{self, AppState};
use parley::session::{ExchangeDispatcher, ResponsePublisher, SubscriptionRegistry};

// ============================================================================
// Stub Backends
// ============================================================================

/// Replies with `echo: <input>`.
pub struct EchoBackend;

#[async_trait]
impl InferenceBackend for EchoBackend {
    async fn generate(&self, input: &str) -> Result<String, LLMError> {
        Ok(format!("echo: {input}"))
    }
}

/// Always replies with the same text.
pub struct FixedBackend(pub &'static str);

#[async_trait]
impl InferenceBackend for FixedBackend {
    async fn generate(&self, _input: &str) -> Result<String, LLMError> {
        Ok(self.0.to_string())
    }
}

/// Fails every call with an API error.
pub struct FailingBackend;

#[async_trait]
impl InferenceBackend for FailingBackend {
    async fn generate(&self, _input: &str) -> Result<String, LLMError> {
        Err(LLMError::Api {
            status: 500,
            message: "model exploded".into(),
        })
    }
}

/// Echoes, but holds every reply until [`release`](Self::release) is notified.
#[derive(Default)]
pub struct GatedBackend {
    pub started: Notify,
    pub release: Notify,
}

#[async_trait]
impl InferenceBackend for GatedBackend {
    async fn generate(&self, input: &str) -> Result<String, LLMError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(format!("echo: {input}"))
    }
}

// ============================================================================
// App Construction
// ============================================================================

/// Create a test `AppState` around `backend`.
pub fn test_app_state(backend: Arc<dyn InferenceBackend>) -> AppState {
    let registry = SubscriptionRegistry::new(16);
    let dispatcher = ExchangeDispatcher::new(
        backend,
        ResponsePublisher::new(registry.clone()),
        8,
        Duration::from_secs(5),
    );
    AppState {
        registry,
        dispatcher,
        keep_alive_interval_seconds: 1,
        max_connections: 64,
        shutdown: CancellationToken::new(),
    }
}

/// Create a test app backed by [`EchoBackend`].
pub fn test_app() -> Router {
    server::build_app(test_app_state(Arc::new(EchoBackend)), 30)
}

/// A server listening on a loopback port.
pub struct TestServer {
    pub base_url: String,
    pub state: AppState,
    /// Cancelling starts the drain, as a shutdown signal does.
    pub stop: CancellationToken,
    pub handle: JoinHandle<()>,
}

impl TestServer {
    /// Signal shutdown and wait for the drain and the server to finish.
    pub async fn shutdown(self) {
        self.stop.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not shut down")
            .unwrap();
    }
}

/// Serve an app for `backend` on 127.0.0.1 with an ephemeral port.
pub async fn spawn_server(backend: Arc<dyn InferenceBackend>) -> TestServer {
    let state = test_app_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let stop = CancellationToken::new();

    let serve = server::serve(listener, state.clone(), 30, stop.clone().cancelled_owned());
    let handle = tokio::spawn(async move { serve.await.unwrap() });

    TestServer {
        base_url: format!("http://{addr}"),
        state,
        stop,
        handle,
    }
}
