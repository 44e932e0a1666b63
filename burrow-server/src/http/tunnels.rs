//! Tunnel REST handlers

use std::fmt;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use burrow_core::{ProviderStatus, RuntimeStatus, StartConfig, TunnelInstance, TunnelState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

/// Body of `POST /api/tunnels`
///
/// Missing fields deserialize as empty strings so they are reported by
/// validation together with every other rejected field.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTunnelRequest {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub public_hostname: String,
    #[serde(default)]
    pub local_addr: String,
    #[serde(default)]
    pub auth_token: String,
}

impl fmt::Debug for CreateTunnelRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateTunnelRequest")
            .field("provider", &self.provider)
            .field("public_hostname", &self.public_hostname)
            .field("local_addr", &self.local_addr)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

impl From<&CreateTunnelRequest> for StartConfig {
    fn from(req: &CreateTunnelRequest) -> Self {
        StartConfig::new(&req.public_hostname, &req.local_addr, &req.auth_token)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedResponse {
    pub tunnel_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    pub tunnel_id: String,
    pub state: TunnelState,
}

/// Last provider observation as exposed over HTTP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub status: ProviderStatus,
    pub pid: u32,
    pub error: Option<String>,
    pub public_url: Option<String>,
}

impl From<RuntimeStatus> for StatusView {
    fn from(status: RuntimeStatus) -> Self {
        Self {
            status: status.status,
            pid: status.pid,
            error: status.error,
            public_url: status.public_url,
        }
    }
}

/// Tunnel snapshot as exposed over HTTP; never carries the auth token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelView {
    pub id: String,
    pub provider: String,
    pub public_hostname: String,
    pub local_addr: String,
    pub state: TunnelState,
    pub status: StatusView,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
}

impl From<TunnelInstance> for TunnelView {
    fn from(instance: TunnelInstance) -> Self {
        Self {
            id: instance.id,
            provider: instance.provider,
            public_hostname: instance.config.public_hostname,
            local_addr: instance.config.local_addr,
            state: instance.state,
            status: instance.last_status.into(),
            retry_count: instance.retry_count,
            created_at: instance.created_at,
            last_transition_at: instance.last_transition_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TunnelListResponse {
    pub tunnels: Vec<TunnelView>,
}

/// POST /api/tunnels - validate, register and start a tunnel
pub async fn create_tunnel(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateTunnelRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let Json(req) = payload?;
    let handle = state
        .registry
        .create(&req.provider, &StartConfig::from(&req))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            tunnel_id: handle.id().to_string(),
        }),
    ))
}

/// GET /api/tunnels
pub async fn list_tunnels(State(state): State<Arc<AppState>>) -> Json<TunnelListResponse> {
    let tunnels = state
        .registry
        .list()
        .await
        .into_iter()
        .map(TunnelView::from)
        .collect();
    Json(TunnelListResponse { tunnels })
}

/// GET /api/tunnels/:id
pub async fn get_tunnel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TunnelView>, ApiError> {
    let handle = state.registry.lookup(&id).await?;
    Ok(Json(handle.snapshot().into()))
}

/// DELETE /api/tunnels/:id - stop and unregister in the background
pub async fn delete_tunnel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let handle = state.registry.lookup(&id).await?;
    let current = handle.snapshot().state;

    let registry = Arc::clone(&state.registry);
    let tunnel_id = id.clone();
    tokio::spawn(async move {
        if let Err(e) = registry.unregister(&tunnel_id).await {
            tracing::warn!(tunnel = %tunnel_id, "Tunnel removal failed: {}", e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            tunnel_id: id,
            state: current,
        }),
    ))
}

/// POST /api/tunnels/:id/start - explicit restart from `stopped` or `error`
pub async fn start_tunnel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let handle = state.registry.lookup(&id).await?;
    handle.request_start().await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            tunnel_id: id,
            state: handle.snapshot().state,
        }),
    ))
}
