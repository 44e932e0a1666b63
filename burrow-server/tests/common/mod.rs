//! Shared test utilities for burrow-server integration tests

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use burrow_core::providers::MockProviderFactory;
use burrow_core::{
    BroadcastSink, ProviderRegistry, RetryPolicy, SupervisorConfig, TunnelRegistry,
};
use burrow_server::{AppState, BurrowServer, ServerConfig, create_router};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Supervisor settings fast enough for tests
pub fn fast_settings() -> SupervisorConfig {
    SupervisorConfig {
        poll_interval: Duration::from_millis(10),
        call_timeout: Duration::from_millis(200),
        start_timeout: Duration::from_millis(300),
        stop_attempts: 2,
        retry: RetryPolicy::new(Duration::from_millis(5), Duration::from_millis(20), 5),
    }
}

/// App state backed by `factory` registered under its own name
pub fn state_with(factory: MockProviderFactory) -> Arc<AppState> {
    let registry = TunnelRegistry::new(
        ProviderRegistry::new().with(Arc::new(factory)),
        fast_settings(),
        Arc::new(BroadcastSink::default()),
    );
    Arc::new(AppState::new(Arc::new(registry)))
}

/// In-process test server over the mock provider
#[allow(dead_code)]
pub fn test_server(factory: MockProviderFactory) -> (Arc<AppState>, TestServer) {
    let state = state_with(factory);
    let server = TestServer::new(create_router(Arc::clone(&state))).unwrap();
    (state, server)
}

/// Real server on an ephemeral port; send on the returned channel to shut it down
#[allow(dead_code)]
pub async fn spawn_server(
    factory: MockProviderFactory,
) -> (
    Arc<AppState>,
    SocketAddr,
    oneshot::Sender<()>,
    tokio::task::JoinHandle<()>,
) {
    let state = state_with(factory);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let config = ServerConfig {
        shutdown_grace: Duration::from_secs(2),
        ..ServerConfig::default()
    };
    let server = BurrowServer::with_state(config, Arc::clone(&state));
    let task = tokio::spawn(async move {
        let _ = server
            .run_with_listener(listener, async {
                let _ = stop_rx.await;
            })
            .await;
    });

    (state, addr, stop_tx, task)
}
