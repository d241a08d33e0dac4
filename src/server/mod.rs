//! REST API and WebSocket dispatch layer
//!
//! Thin translation between HTTP/WebSocket requests and the cue controller:
//! boundary validation happens here, the controller itself never fails
//! loudly. Also serves the embedded web front-end.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use rust_embed::RustEmbed;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::cues::{now_ms, CueBroadcaster, CueController, CueState};
use crate::net::WifiManager;

pub mod auth;
pub mod ws;

/// Delay between answering /save_wifi and asking for the restart, so the
/// response reaches the client first.
const RESTART_DELAY_MS: u64 = 500;

/// Embedded web front-end.
#[derive(RustEmbed)]
#[folder = "web/"]
struct WebAssets;

/// Shared state for API handlers
pub struct ApiState {
    pub controller: Arc<Mutex<CueController>>,
    pub broadcaster: CueBroadcaster,
    pub wifi: Arc<WifiManager>,
    pub config: Arc<AppConfig>,
    pub started_at: Instant,
    /// Asking the main loop for a clean exit (the supervisor restarts us).
    pub restart_tx: mpsc::Sender<()>,
}

/// `cue`/`index` values arrive as JSON numbers or as form-encoded strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CueIndexParam {
    Num(i64),
    Text(String),
}

impl CueIndexParam {
    fn as_i64(&self) -> Option<i64> {
        match self {
            CueIndexParam::Num(n) => Some(*n),
            CueIndexParam::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TriggerBody {
    cue: Option<CueIndexParam>,
    text: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SetTextBody {
    cue: Option<CueIndexParam>,
    text: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SaveWifiBody {
    ssid: Option<String>,
    password: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthQuery {
    token: Option<String>,
}

/// Build the API router
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/wifi", get(serve_wifi_page))
        .route("/trigger", post(trigger_cue))
        .route("/api/cues", get(get_cues))
        .route("/api/cues/trigger", post(trigger_cue))
        .route("/api/cues/text", post(set_cue_text))
        .route("/api/health", get(health))
        .route("/scan", get(scan_networks))
        .route("/save_wifi", post(save_wifi))
        .route("/ws", get(ws::ws_handler))
        .fallback(static_fallback)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the API server
pub async fn start_server(state: Arc<ApiState>, port: u16) -> Result<()> {
    let router = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("🌐 Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind web server")?;

    axum::serve(listener, router).await.context("Web server error")?;

    Ok(())
}

// --- wire formats -----------------------------------------------------------

pub(crate) fn cue_message(state: &CueState) -> Value {
    json!({
        "type": "cue",
        "index": state.index,
        "active": state.active,
        "text": state.text,
        "displayReady": state.display_ready,
    })
}

pub(crate) fn snapshot_message(cues: &[CueState]) -> Value {
    json!({ "type": "snapshot", "cues": cues })
}

fn error_response(status: StatusCode, code: &str) -> Response {
    (status, Json(json!({ "error": code }))).into_response()
}

fn unauthorized() -> Response {
    error_response(StatusCode::UNAUTHORIZED, "unauthorized")
}

/// Decode a request body as JSON or form data, depending on content type.
/// An empty body decodes to the type's default so token-only requests work.
fn parse_body<T>(headers: &HeaderMap, body: &Bytes) -> Result<T, ()>
where
    T: DeserializeOwned + Default,
{
    if body.is_empty() {
        return Ok(T::default());
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if content_type.starts_with("application/json") {
        serde_json::from_slice(body).map_err(|_| ())
    } else {
        serde_urlencoded::from_bytes(body).map_err(|_| ())
    }
}

// --- cue endpoints ----------------------------------------------------------

/// POST /trigger and /api/cues/trigger - activate a cue, optionally updating
/// its text first
async fn trigger_cue(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let parsed: Result<TriggerBody, ()> = parse_body(&headers, &body);
    let body_token = parsed.as_ref().ok().and_then(|b| b.token.clone());

    if !auth::request_authorized(
        &state.config.auth_token,
        &headers,
        query.token.as_deref(),
        body_token.as_deref(),
    ) {
        return unauthorized();
    }

    let Ok(request) = parsed else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_body");
    };

    let Some(index) = request.cue.as_ref().and_then(CueIndexParam::as_i64) else {
        return error_response(StatusCode::BAD_REQUEST, "missing_cue");
    };

    let mut controller = state.controller.lock();
    if index < 0 || index as usize >= controller.cue_count() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_cue");
    }
    let index = index as usize;

    if let Some(text) = &request.text {
        controller.set_text(index, text, true);
    }
    controller.trigger(index, now_ms());

    match controller.cue_state(index) {
        Some(cue) => Json(cue_message(&cue)).into_response(),
        None => error_response(StatusCode::BAD_REQUEST, "invalid_cue"),
    }
}

/// GET /api/cues - snapshot of all cues
async fn get_cues(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
) -> Response {
    if !auth::request_authorized(&state.config.auth_token, &headers, query.token.as_deref(), None)
    {
        return unauthorized();
    }

    let snapshot = state.controller.lock().snapshot();
    Json(snapshot_message(&snapshot)).into_response()
}

/// POST /api/cues/text - update a cue label without triggering
async fn set_cue_text(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let parsed: Result<SetTextBody, ()> = parse_body(&headers, &body);
    let body_token = parsed.as_ref().ok().and_then(|b| b.token.clone());

    if !auth::request_authorized(
        &state.config.auth_token,
        &headers,
        query.token.as_deref(),
        body_token.as_deref(),
    ) {
        return unauthorized();
    }

    let Ok(request) = parsed else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_body");
    };

    let (Some(cue), Some(text)) = (&request.cue, &request.text) else {
        return error_response(StatusCode::BAD_REQUEST, "missing_parameters");
    };
    let Some(index) = cue.as_i64() else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_cue");
    };

    let mut controller = state.controller.lock();
    if index < 0 || index as usize >= controller.cue_count() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_cue");
    }
    let index = index as usize;

    controller.set_text(index, text, true);
    match controller.cue_state(index) {
        Some(cue) => Json(cue_message(&cue)).into_response(),
        None => error_response(StatusCode::BAD_REQUEST, "invalid_cue"),
    }
}

// --- device endpoints -------------------------------------------------------

/// GET /api/health - device and network status
async fn health(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
) -> Response {
    if !auth::request_authorized(&state.config.auth_token, &headers, query.token.as_deref(), None)
    {
        return unauthorized();
    }

    let status = state.wifi.status().await;
    let ip = if status == crate::net::WifiStatus::Connected {
        state.wifi.ip_address().await.unwrap_or_default()
    } else {
        String::new()
    };
    let ssid = state.wifi.current_ssid().await.unwrap_or_default();

    Json(json!({
        "device": state.config.device_name,
        "wifiStatus": status.as_str(),
        "ip": ip,
        "ssid": ssid,
        "portalActive": state.wifi.is_portal_active(),
        "uptimeMs": state.started_at.elapsed().as_millis() as u64,
    }))
    .into_response()
}

/// GET /scan - visible networks; open to portal clients
async fn scan_networks(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
) -> Response {
    if !state.wifi.is_portal_active()
        && !auth::request_authorized(
            &state.config.auth_token,
            &headers,
            query.token.as_deref(),
            None,
        )
    {
        return unauthorized();
    }

    match state.wifi.scan().await {
        Ok(networks) => Json(networks).into_response(),
        Err(e) => {
            warn!("⚠️  Wi-Fi scan failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "scan_failed")
        }
    }
}

/// POST /save_wifi - store credentials and restart; open to portal clients
async fn save_wifi(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let parsed: Result<SaveWifiBody, ()> = parse_body(&headers, &body);
    let body_token = parsed.as_ref().ok().and_then(|b| b.token.clone());

    if !state.wifi.is_portal_active()
        && !auth::request_authorized(
            &state.config.auth_token,
            &headers,
            query.token.as_deref(),
            body_token.as_deref(),
        )
    {
        return unauthorized();
    }

    let Ok(request) = parsed else {
        return (StatusCode::BAD_REQUEST, "Missing parameters").into_response();
    };
    let (Some(ssid), Some(password)) = (request.ssid, request.password) else {
        return (StatusCode::BAD_REQUEST, "Missing parameters").into_response();
    };

    if ssid.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Invalid SSID").into_response();
    }

    if !state.wifi.save_credentials(ssid.trim(), &password) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to save credentials",
        )
            .into_response();
    }

    // Answer first, then ask for the restart.
    let restart_tx = state.restart_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(RESTART_DELAY_MS)).await;
        let _ = restart_tx.send(()).await;
    });

    (StatusCode::OK, "Credentials saved. Restarting...").into_response()
}

// --- static front-end -------------------------------------------------------

async fn serve_index() -> Response {
    serve_asset("index.html", "max-age=300, must-revalidate")
}

async fn serve_wifi_page() -> Response {
    serve_asset("wifi.html", "max-age=60")
}

async fn static_fallback(uri: axum::http::Uri) -> Response {
    let path = uri.path().trim_start_matches('/');
    if !path.is_empty() && WebAssets::get(path).is_some() {
        return serve_asset(path, "max-age=300, must-revalidate");
    }
    error_response(StatusCode::NOT_FOUND, "not_found")
}

fn serve_asset(path: &str, cache_control: &str) -> Response {
    match WebAssets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                [
                    (header::CONTENT_TYPE, mime.as_ref().to_string()),
                    (header::CACHE_CONTROL, cache_control.to_string()),
                ],
                content.data.into_owned(),
            )
                .into_response()
        }
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Interface unavailable: web assets missing from this build",
        )
            .into_response(),
    }
}
