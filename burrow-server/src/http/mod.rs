//! HTTP server module

mod api;
mod tunnels;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub use api::{HealthResponse, ProvidersResponse};
pub use tunnels::{
    AcceptedResponse, CreateTunnelRequest, CreatedResponse, StatusView, TunnelListResponse,
    TunnelView,
};

/// Create the HTTP router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(api::health))
        .route("/api/providers", get(api::list_providers))
        .route(
            "/api/tunnels",
            get(tunnels::list_tunnels).post(tunnels::create_tunnel),
        )
        .route(
            "/api/tunnels/:id",
            get(tunnels::get_tunnel).delete(tunnels::delete_tunnel),
        )
        .route("/api/tunnels/:id/start", post(tunnels::start_tunnel))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_test::TestServer;
    use burrow_core::{NullSink, ProviderRegistry, SupervisorConfig, TunnelRegistry};

    #[tokio::test]
    async fn router_has_health_endpoint() {
        let registry = TunnelRegistry::new(
            ProviderRegistry::new(),
            SupervisorConfig::default(),
            Arc::new(NullSink),
        );
        let router = create_router(Arc::new(AppState::new(Arc::new(registry))));
        let server = TestServer::new(router).unwrap();

        let response = server.get("/api/health").await;
        response.assert_status_ok();
    }
}
