//! Axum-based HTTP server for the command station API.
//!
//! Provides REST endpoints for:
//! - GET `/api/state` - Aggregated power plus every link
//! - GET `/api/links` - Status and system state per link
//! - GET `/api/power` - Aggregated power
//! - POST `/api/power` - Switch track power
//! - POST `/api/estop` - Emergency stop on every link
//! - POST `/api/loco` - Drive a loco
//! - POST `/api/loco/function` - Switch a loco function
//! - GET `/api/locos` - Cached state of tracked locos
//!
//! Power and emergency stop go to every link unless the body names one.
//! Loco commands go to the named link or the first configured link.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use log::{debug, info};
use tower_http::cors::{Any, CorsLayer};

use crate::config::WebConfig;
use crate::error::CommandError;
use crate::messages::{parse_function_request, parse_loco_request, parse_power_request};
use crate::session::StationCommand;

use super::api::{
    ApiResponse, CommandResponse, LinkResponse, LocoResponse, PowerResponse, StationResponse,
};
use super::runner::LinkHandle;
use super::shared::SharedPowerState;

// ============================================================================
// Web State
// ============================================================================

/// State shared by all handlers: the station state and one handle per link.
///
/// Handles can be swapped at runtime when a supervisor restarts a link.
#[derive(Debug)]
pub struct WebState {
    shared: Arc<SharedPowerState>,
    links: RwLock<Vec<LinkHandle>>,
}

impl WebState {
    /// Handlers over `links`, in configuration order.
    pub fn new(shared: Arc<SharedPowerState>, links: Vec<LinkHandle>) -> Self {
        Self {
            shared,
            links: RwLock::new(links),
        }
    }

    /// Station state.
    pub fn shared(&self) -> &Arc<SharedPowerState> {
        &self.shared
    }

    /// Current link handles.
    pub fn links(&self) -> Vec<LinkHandle> {
        self.read_links().clone()
    }

    /// Install `handle`, replacing the handle with the same name.
    pub fn replace_link(&self, handle: LinkHandle) {
        let mut links = self.links.write().unwrap_or_else(|e| e.into_inner());
        match links.iter_mut().find(|l| l.name() == handle.name()) {
            Some(slot) => *slot = handle,
            None => links.push(handle),
        }
    }

    fn read_links(&self) -> std::sync::RwLockReadGuard<'_, Vec<LinkHandle>> {
        self.links.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Links a command goes to: the named one, or all of them.
    fn targets(&self, name: Option<&str>) -> Result<Vec<LinkHandle>, String> {
        let links = self.read_links();
        match name {
            Some(name) => links
                .iter()
                .find(|l| l.name() == name)
                .map(|l| vec![l.clone()])
                .ok_or_else(|| format!("Unknown link '{name}'")),
            None if links.is_empty() => Err("No links configured".into()),
            None => Ok(links.clone()),
        }
    }

    /// The named link, or the first configured one.
    fn target(&self, name: Option<&str>) -> Result<LinkHandle, String> {
        let targets = self.targets(name)?;
        targets
            .into_iter()
            .next()
            .ok_or_else(|| "No links configured".into())
    }
}

/// Send `command` to every link in `targets`.
///
/// Accepted if at least one link queued it; otherwise rejected with the
/// first link's error.
async fn broadcast(targets: Vec<LinkHandle>, command: StationCommand) -> CommandResponse {
    let mut accepted = Vec::new();
    let mut first_error: Option<CommandError> = None;

    for link in &targets {
        match link.command(command).await {
            Ok(()) => accepted.push(link.name().to_string()),
            Err(e) => {
                debug!("[{}] {} rejected: {}", link.name(), command.name(), e);
                first_error.get_or_insert(e);
            }
        }
    }

    match (accepted.is_empty(), first_error) {
        (true, Some(e)) => CommandResponse::rejected(e.to_string()),
        _ => CommandResponse::accepted(command.name()).on_links(accepted),
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

/// GET /api/state - Aggregated power and every link
async fn get_state(State(state): State<Arc<WebState>>) -> Json<ApiResponse<StationResponse>> {
    let snapshot = state.shared.snapshot();
    Json(ApiResponse::ok(StationResponse::from(&snapshot)))
}

/// GET /api/links - Status and system state per link
async fn get_links(State(state): State<Arc<WebState>>) -> Json<ApiResponse<Vec<LinkResponse>>> {
    let snapshot = state.shared.snapshot();
    let links = snapshot.links.iter().map(LinkResponse::from).collect();
    Json(ApiResponse::ok(links))
}

/// GET /api/power - Aggregated power
async fn get_power(State(state): State<Arc<WebState>>) -> Json<ApiResponse<PowerResponse>> {
    Json(ApiResponse::ok(PowerResponse::from(&state.shared.power())))
}

/// POST /api/power - Switch track power
///
/// Accepts JSON: `{"on": true}` or `{"on": false, "link": "z21"}`
async fn set_power(
    State(state): State<Arc<WebState>>,
    body: Bytes,
) -> Json<ApiResponse<CommandResponse>> {
    let Some(req) = parse_power_request(&body) else {
        return Json(ApiResponse::err("Invalid power request"));
    };

    let targets = match state.targets(req.link.as_deref()) {
        Ok(targets) => targets,
        Err(e) => return Json(ApiResponse::err(e)),
    };
    Json(ApiResponse::ok(broadcast(targets, req.to_command()).await))
}

/// POST /api/estop - Emergency stop on every link
async fn emergency_stop(State(state): State<Arc<WebState>>) -> Json<ApiResponse<CommandResponse>> {
    let targets = match state.targets(None) {
        Ok(targets) => targets,
        Err(e) => return Json(ApiResponse::err(e)),
    };
    Json(ApiResponse::ok(
        broadcast(targets, StationCommand::EmergencyStop).await,
    ))
}

/// POST /api/loco - Drive a loco
///
/// Accepts JSON: `{"address": 3, "speed": 40, "direction": "forward", "steps": 28}`
///
/// The loco is tracked on the target link first so `/api/locos` shows it.
async fn set_loco(
    State(state): State<Arc<WebState>>,
    body: Bytes,
) -> Json<ApiResponse<CommandResponse>> {
    let Some(req) = parse_loco_request(&body) else {
        return Json(ApiResponse::err("Invalid loco request"));
    };

    let command = match req.to_command() {
        Ok(command) => command,
        Err(e) => return Json(ApiResponse::err(e.to_string())),
    };
    let link = match state.target(req.link.as_deref()) {
        Ok(link) => link,
        Err(e) => return Json(ApiResponse::err(e)),
    };

    if let StationCommand::SetLocoSpeedDirection { address, steps, .. } = command {
        if let Err(e) = link.track_loco(address, steps).await {
            debug!("[{}] loco {} not tracked: {}", link.name(), address, e);
        }
    }
    Json(ApiResponse::ok(broadcast(vec![link], command).await))
}

/// POST /api/loco/function - Switch one loco function
///
/// Accepts JSON: `{"address": 3, "function": 0, "on": true}`
async fn set_function(
    State(state): State<Arc<WebState>>,
    body: Bytes,
) -> Json<ApiResponse<CommandResponse>> {
    let Some(req) = parse_function_request(&body) else {
        return Json(ApiResponse::err("Invalid function request"));
    };

    let command = match req.to_command() {
        Ok(command) => command,
        Err(e) => return Json(ApiResponse::err(e.to_string())),
    };
    let link = match state.target(req.link.as_deref()) {
        Ok(link) => link,
        Err(e) => return Json(ApiResponse::err(e)),
    };
    Json(ApiResponse::ok(broadcast(vec![link], command).await))
}

/// GET /api/locos - Cached state of tracked locos on all links
async fn get_locos(State(state): State<Arc<WebState>>) -> Json<ApiResponse<Vec<LocoResponse>>> {
    let snapshot = state.shared.snapshot();
    Json(ApiResponse::ok(LocoResponse::collect(&snapshot)))
}

/// Fallback handler for 404
async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::err("Not found")),
    )
}

// ============================================================================
// Server Builder
// ============================================================================

/// Configuration for the web server
#[derive(Debug, Clone)]
pub struct WebServerConfig {
    /// Address to bind to
    pub addr: SocketAddr,
    /// Whether to enable CORS for all origins
    pub cors_permissive: bool,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self::from_config(&WebConfig::default())
    }
}

impl WebServerConfig {
    /// Create a new config with the given address
    pub fn new(addr: impl Into<SocketAddr>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    /// Set whether CORS should be permissive
    pub fn cors(mut self, permissive: bool) -> Self {
        self.cors_permissive = permissive;
        self
    }

    /// Create from shared WebConfig
    pub fn from_config(config: &WebConfig) -> Self {
        Self {
            addr: ([0, 0, 0, 0], config.port).into(),
            cors_permissive: config.cors_permissive,
        }
    }
}

/// Build the Axum router with all routes
pub fn build_router(state: Arc<WebState>, config: &WebServerConfig) -> Router {
    let mut router = Router::new()
        .route("/api/state", get(get_state))
        .route("/api/links", get(get_links))
        .route("/api/power", get(get_power).post(set_power))
        .route("/api/estop", post(emergency_stop))
        .route("/api/loco", post(set_loco))
        .route("/api/loco/function", post(set_function))
        .route("/api/locos", get(get_locos))
        .fallback(not_found)
        .with_state(state);

    if config.cors_permissive {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

/// Serve the API until `shutdown` resolves.
pub async fn run_server<F>(
    state: Arc<WebState>,
    config: WebServerConfig,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = build_router(state, &config);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!("web server listening on http://{}", config.addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
