//! HTTP request handlers
//!
//! Request/response boundary for pairing and device management. All routes
//! except `/pair`, `/health` and the WebSocket upgrade require a
//! `Authorization: Bearer <token>` header.

use axum::{
    extract::{ConnectInfo, Path as AxumPath, State},
    http::{header, HeaderMap, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use deskmcp_auth::{DeviceId, DeviceInfo};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Pairing API
        .route("/pair", post(pair_handler))
        // Device management API
        .route("/devices", get(list_devices_handler))
        .route("/devices/pair", post(start_pairing_handler))
        .route("/devices/:id", delete(revoke_handler))
        // Signaling transport
        .route("/ws", get(crate::websocket::signaling_ws_handler))
        // Server info
        .route("/health", get(health_handler))
        .route("/info", get(server_info_handler))
        .with_state(state)
}

/// Extract a bearer token from the Authorization header
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

/// Verify the bearer token on an authenticated route.
///
/// Requests carrying an `x-session-id` header also create/refresh the
/// multiplexed channel session for that device.
async fn require_auth(
    state: &AppState,
    headers: &HeaderMap,
    addr: &SocketAddr,
) -> Result<DeviceInfo, (StatusCode, String)> {
    let token = bearer_token(headers).ok_or((
        StatusCode::UNAUTHORIZED,
        "Authentication required".to_string(),
    ))?;

    let device = state
        .pairing
        .verify_token(&token, Some(&addr.ip().to_string()))
        .await
        .ok_or((StatusCode::UNAUTHORIZED, "Invalid token".to_string()))?;

    if let Some(session_id) = headers.get("x-session-id").and_then(|v| v.to_str().ok()) {
        if let Ok(id) = DeviceId::parse(&device.id) {
            state.sessions.touch_channel(&id, session_id).await;
        }
    }

    Ok(device)
}

// ============================================================================
// Pairing API Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PairBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairResponse {
    token: String,
    device_id: String,
}

/// Complete a pairing with the code from the active window
async fn pair_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<PairBody>,
) -> Result<Json<PairResponse>, (StatusCode, String)> {
    if body.code.is_empty() || body.name.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Fields 'code' and 'name' are required".to_string(),
        ));
    }

    let profile = deskmcp_auth::DeviceProfile {
        name: body.name,
        platform: body.platform,
        version: body.version,
    };

    let paired = state
        .pairing
        .complete_pairing(&body.code, profile, Some(&addr.ip().to_string()))
        .await
        .map_err(|e| (StatusCode::FORBIDDEN, e.to_string()))?;

    Ok(Json(PairResponse {
        token: paired.token,
        device_id: paired.device.id,
    }))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartPairingBody {
    ttl_seconds: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPairingResponse {
    code: String,
    expires_in: i64,
}

/// Start a new pairing window (auth required)
async fn start_pairing_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Option<Json<StartPairingBody>>,
) -> Result<Json<StartPairingResponse>, (StatusCode, String)> {
    require_auth(&state, &headers, &addr).await?;

    let ttl = body
        .and_then(|Json(b)| b.ttl_seconds)
        .unwrap_or(state.config.pairing_ttl_secs);
    if ttl <= 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            "Field 'ttlSeconds' must be positive".to_string(),
        ));
    }
    let window = state.pairing.start_pairing(ttl, None).await;

    Ok(Json(StartPairingResponse {
        code: window.code,
        expires_in: window.expires_in,
    }))
}

// ============================================================================
// Device Management Handlers
// ============================================================================

#[derive(Debug, Serialize)]
pub struct DevicesResponse {
    devices: Vec<DeviceInfo>,
}

/// List all paired devices, redacted (auth required)
async fn list_devices_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<DevicesResponse>, (StatusCode, String)> {
    require_auth(&state, &headers, &addr).await?;
    Ok(Json(DevicesResponse {
        devices: state.pairing.list_devices().await,
    }))
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    revoked: usize,
}

/// Revoke one device by id, or every device with the literal id `all`
/// (auth required). Live sessions for revoked devices are closed.
async fn revoke_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<RevokeResponse>, (StatusCode, String)> {
    require_auth(&state, &headers, &addr).await?;

    if id == "all" {
        let revoked = state.revoke_all().await;
        info!("Revoked all {} devices", revoked);
        return Ok(Json(RevokeResponse { revoked }));
    }

    let device_id =
        DeviceId::parse(&id).map_err(|e| (StatusCode::NOT_FOUND, e))?;
    if state.revoke_device(&device_id).await {
        Ok(Json(RevokeResponse { revoked: 1 }))
    } else {
        Err((StatusCode::NOT_FOUND, format!("Unknown device: {id}")))
    }
}

// ============================================================================
// Server Info
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: &'static str,
    paired_devices: usize,
    pairing_active: bool,
}

/// Service health, no auth
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        paired_devices: state.pairing.device_count().await,
        pairing_active: state.pairing.pairing_active().await,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    version: String,
    paired_devices: usize,
    connected_devices: usize,
}

/// Server information
async fn server_info_handler(State(state): State<Arc<AppState>>) -> Json<ServerInfo> {
    Json(ServerInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        paired_devices: state.pairing.device_count().await,
        connected_devices: state.sessions.connection_count().await,
    })
}
