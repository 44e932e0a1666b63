//! HTTP client for a running burrow server

use anyhow::{Context, Result, anyhow};
use burrow_server::http::{
    AcceptedResponse, CreateTunnelRequest, CreatedResponse, HealthResponse, ProvidersResponse,
    TunnelListResponse, TunnelView,
};
use burrow_server::{ErrorResponse, ValidationResponse};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.get("/api/health").await
    }

    pub async fn providers(&self) -> Result<ProvidersResponse> {
        self.get("/api/providers").await
    }

    pub async fn create_tunnel(&self, request: &CreateTunnelRequest) -> Result<CreatedResponse> {
        let response = self
            .client
            .post(self.url("/api/tunnels"))
            .json(request)
            .send()
            .await
            .with_context(|| self.unreachable())?;
        decode(response).await
    }

    pub async fn list_tunnels(&self) -> Result<TunnelListResponse> {
        self.get("/api/tunnels").await
    }

    pub async fn get_tunnel(&self, id: &str) -> Result<TunnelView> {
        self.get(&format!("/api/tunnels/{id}")).await
    }

    pub async fn delete_tunnel(&self, id: &str) -> Result<AcceptedResponse> {
        let response = self
            .client
            .delete(self.url(&format!("/api/tunnels/{id}")))
            .send()
            .await
            .with_context(|| self.unreachable())?;
        decode(response).await
    }

    pub async fn restart_tunnel(&self, id: &str) -> Result<AcceptedResponse> {
        let response = self
            .client
            .post(self.url(&format!("/api/tunnels/{id}/start")))
            .send()
            .await
            .with_context(|| self.unreachable())?;
        decode(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .with_context(|| self.unreachable())?;
        decode(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn unreachable(&self) -> String {
        format!(
            "Could not reach burrow server at {}. Is `burrow serve` running?",
            self.base_url
        )
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .context("Unexpected response from burrow server");
    }

    let body = response.text().await.unwrap_or_default();
    Err(anyhow!(describe_failure(status, &body)))
}

/// Render an error response body for the terminal
fn describe_failure(status: StatusCode, body: &str) -> String {
    if let Ok(validation) = serde_json::from_str::<ValidationResponse>(body) {
        let fields: Vec<String> = validation
            .errors
            .iter()
            .map(|e| format!("  {}: {}", e.field, e.message))
            .collect();
        return format!("Invalid tunnel configuration:\n{}", fields.join("\n"));
    }
    if let Ok(error) = serde_json::from_str::<ErrorResponse>(body) {
        return format!("{} ({})", error.error, status);
    }
    format!("Request failed with {status}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = ApiClient::new("http://127.0.0.1:7843/");
        assert_eq!(client.url("/api/health"), "http://127.0.0.1:7843/api/health");
    }

    #[test]
    fn describe_validation_failure_lists_fields() {
        let body = r#"{"errors":[{"field":"auth_token","message":"must not be empty"}]}"#;
        let text = describe_failure(StatusCode::BAD_REQUEST, body);
        assert!(text.contains("auth_token: must not be empty"));
    }

    #[test]
    fn describe_error_body() {
        let body = r#"{"error":"Tunnel not found: abc"}"#;
        let text = describe_failure(StatusCode::NOT_FOUND, body);
        assert!(text.starts_with("Tunnel not found: abc"));
        assert!(text.contains("404"));
    }

    #[tokio::test]
    async fn health_and_providers_from_running_server() {
        use std::sync::Arc;

        use burrow_core::providers::MockProviderFactory;
        use burrow_core::{NullSink, ProviderRegistry, SupervisorConfig, TunnelRegistry};
        use burrow_server::{BurrowServer, ServerConfig};
        use tokio::net::TcpListener;

        let registry = TunnelRegistry::new(
            ProviderRegistry::new().with(Arc::new(MockProviderFactory::new())),
            SupervisorConfig::default(),
            Arc::new(NullSink),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = BurrowServer::new(ServerConfig::default(), Arc::new(registry));
        let task = tokio::spawn(server.run_with_listener(listener, async move {
            let _ = stop_rx.await;
        }));

        let client = ApiClient::new(format!("http://{addr}"));
        let health = client.health().await.unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.tunnel_count, 0);
        let providers = client.providers().await.unwrap();
        assert_eq!(providers.providers, vec!["mock".to_string()]);

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unreachable_server_names_the_address() {
        let client = ApiClient::new("http://127.0.0.1:9");
        let err = client.health().await.unwrap_err();
        assert!(err.to_string().contains("127.0.0.1:9"));
    }

    #[test]
    fn describe_unparseable_body() {
        let text = describe_failure(StatusCode::BAD_GATEWAY, "<html>");
        assert_eq!(text, "Request failed with 502 Bad Gateway");
    }
}
