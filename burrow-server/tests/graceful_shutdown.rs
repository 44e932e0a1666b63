//! Shutting the server down drains every tunnel

mod common;

use std::time::Duration;

use burrow_core::TunnelState;
use burrow_core::providers::MockProviderFactory;
use burrow_server::http::CreatedResponse;
use serde_json::json;

#[tokio::test]
async fn shutdown_stops_all_tunnels() {
    let factory = MockProviderFactory::new();
    let (state, addr, stop, task) = common::spawn_server(factory.clone()).await;

    let client = reqwest::Client::new();
    let created: CreatedResponse = client
        .post(format!("http://{addr}/api/tunnels"))
        .json(&json!({
            "provider": "mock",
            "publicHostname": "a.example.com",
            "localAddr": "http://localhost:9000",
            "authToken": "t",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let handle = state.registry.lookup(&created.tunnel_id).await.unwrap();
    handle
        .wait_for(Duration::from_secs(5), |s| s.state == TunnelState::Running)
        .await
        .unwrap();

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("server should exit")
        .unwrap();

    assert_eq!(handle.snapshot().state, TunnelState::Stopped);
    assert_eq!(state.registry.count().await, 0);
    assert!(factory.calls().stops >= 1);
}
