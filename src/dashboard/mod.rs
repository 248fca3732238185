// src/dashboard/mod.rs

//! JSON control surface.
//!
//! Read-only views of monitor health and option chains, plus the runtime
//! mutators (thresholds, alert rules, start/stop). Every handler is a thin
//! wrapper over [`Engine`].

use crate::engine::{Engine, MonitorStatus};
use crate::error::MonitorError;
use crate::models::{AlertRule, Asset, ExpiryCode, OptionSide, Quote};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// HTTP server exposing the engine.
pub struct DashboardServer {
    engine: Arc<Engine>,
    port: u16,
}

impl DashboardServer {
    pub fn new(engine: Arc<Engine>, port: u16) -> Self {
        Self { engine, port }
    }

    pub fn router(engine: Arc<Engine>) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/health", get(get_health))
            .route("/ping", get(ping))
            .route("/api/assets/{asset}/chain", get(get_chain))
            .route("/api/assets/{asset}/threshold", put(put_threshold))
            .route("/api/assets/{asset}/rules/{side}", put(put_rule))
            .route("/api/assets/{asset}/start", post(start_monitor))
            .route("/api/assets/{asset}/stop", post(stop_monitor))
            .layer(cors)
            .with_state(engine)
    }

    /// Serves until the listener fails.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = Self::router(self.engine);
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Dashboard server starting on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Maps domain errors onto HTTP status codes.
pub struct ApiError(pub MonitorError);

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MonitorError::InvalidConfig(_) | MonitorError::MalformedSymbol { .. } => {
                StatusCode::BAD_REQUEST
            }
            MonitorError::UnknownAsset(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("Dashboard: {}", self.0);
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_asset(raw: &str) -> Result<Asset, ApiError> {
    Ok(raw.parse::<Asset>()?)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health payload: one entry per monitor plus the alert rules.
#[derive(Serialize)]
pub struct HealthResponse {
    pub monitors: Vec<MonitorStatus>,
    pub rules: BTreeMap<Asset, BTreeMap<OptionSide, AlertRule>>,
    pub alert_system_active: bool,
    pub current_time: String,
}

/// GET /health
pub async fn get_health(State(engine): State<Arc<Engine>>) -> Json<HealthResponse> {
    let state = engine.state();
    let rules: BTreeMap<Asset, BTreeMap<OptionSide, AlertRule>> = engine
        .assets()
        .into_iter()
        .map(|asset| (asset, state.rules_for(asset).into_iter().collect()))
        .collect();

    Json(HealthResponse {
        monitors: engine.statuses().await,
        rules,
        alert_system_active: state.any_rule_armed(),
        current_time: engine.clock().clock_string(Utc::now()),
    })
}

/// GET /ping
pub async fn ping() -> &'static str {
    "pong"
}

#[derive(Serialize)]
pub struct StrikeRow {
    pub strike: u32,
    pub call: Option<Quote>,
    pub put: Option<Quote>,
}

#[derive(Serialize)]
pub struct ChainResponse {
    pub asset: Asset,
    pub expiry: Option<ExpiryCode>,
    pub strikes: Vec<StrikeRow>,
}

/// GET /api/assets/{asset}/chain
pub async fn get_chain(
    State(engine): State<Arc<Engine>>,
    Path(asset): Path<String>,
) -> ApiResult<ChainResponse> {
    let asset = parse_asset(&asset)?;
    let chain = engine.monitor(asset)?.chain().await;

    let strikes = chain
        .strikes()
        .into_iter()
        .map(|strike| StrikeRow {
            strike,
            call: chain.side(OptionSide::Call).get(&strike).copied(),
            put: chain.side(OptionSide::Put).get(&strike).copied(),
        })
        .collect();

    Ok(Json(ChainResponse {
        asset,
        expiry: chain.expiry(),
        strikes,
    }))
}

#[derive(Deserialize)]
pub struct ThresholdRequest {
    pub threshold: f64,
}

#[derive(Serialize)]
pub struct ThresholdResponse {
    pub asset: Asset,
    pub previous: f64,
    pub threshold: f64,
}

/// PUT /api/assets/{asset}/threshold
pub async fn put_threshold(
    State(engine): State<Arc<Engine>>,
    Path(asset): Path<String>,
    Json(req): Json<ThresholdRequest>,
) -> ApiResult<ThresholdResponse> {
    let asset = parse_asset(&asset)?;
    let previous = engine.update_threshold(asset, req.threshold).await?;
    Ok(Json(ThresholdResponse {
        asset,
        previous,
        threshold: req.threshold,
    }))
}

#[derive(Deserialize)]
pub struct RuleRequest {
    #[serde(default)]
    pub strike: f64,
    #[serde(default)]
    pub premium: f64,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Serialize)]
pub struct RuleResponse {
    pub asset: Asset,
    pub side: OptionSide,
    pub rule: AlertRule,
    pub changed: bool,
}

/// PUT /api/assets/{asset}/rules/{side}
pub async fn put_rule(
    State(engine): State<Arc<Engine>>,
    Path((asset, side)): Path<(String, String)>,
    Json(req): Json<RuleRequest>,
) -> ApiResult<RuleResponse> {
    let asset = parse_asset(&asset)?;
    let side: OptionSide = side.parse()?;
    if !req.strike.is_finite()
        || req.strike < 0.0
        || req.strike > u32::MAX as f64
        || req.strike.fract() != 0.0
    {
        return Err(MonitorError::InvalidConfig(format!(
            "strike must be a whole non-negative number, got {}",
            req.strike
        ))
        .into());
    }

    let change = engine
        .update_rule(asset, side, req.strike as u32, req.premium, req.enabled)
        .await?;
    Ok(Json(RuleResponse {
        asset,
        side,
        changed: change.is_material(),
        rule: change.after,
    }))
}

#[derive(Serialize)]
pub struct RunStateResponse {
    pub asset: Asset,
    pub running: bool,
}

/// POST /api/assets/{asset}/start
pub async fn start_monitor(
    State(engine): State<Arc<Engine>>,
    Path(asset): Path<String>,
) -> ApiResult<RunStateResponse> {
    let asset = parse_asset(&asset)?;
    let monitor = engine.monitor(asset)?;
    monitor.start().await?;
    Ok(Json(RunStateResponse {
        asset,
        running: monitor.is_running().await,
    }))
}

/// POST /api/assets/{asset}/stop
pub async fn stop_monitor(
    State(engine): State<Arc<Engine>>,
    Path(asset): Path<String>,
) -> ApiResult<RunStateResponse> {
    let asset = parse_asset(&asset)?;
    let monitor = engine.monitor(asset)?;
    monitor.stop().await;
    Ok(Json(RunStateResponse {
        asset,
        running: monitor.is_running().await,
    }))
}
