// HTTP API routes. Every response is an `application/json` envelope of the
// shape `{"code": int, "msg": string, "data": any|null}`; code 0 means
// success, any other code matches the HTTP-like error class.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Query, Request, State},
    http::header,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::db::Database;
use crate::engine::game::GameManager;
use crate::engine::grid::Direction;
use crate::engine::map::MapManager;
use crate::engine::players::{JoinError, LoginError, PlayerManager};
use crate::engine::world::WorldState;
use crate::metrics;
use crate::rate_limit::{RateLimitError, RateLimiter};

pub const PROTOCOL_VERSION: &str = "1.0";

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub game: Arc<GameManager>,
    pub players: Arc<PlayerManager>,
    pub map: Arc<MapManager>,
    pub world: Arc<RwLock<WorldState>>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<Config>,
}

// ── Envelope helpers ─────────────────────────────────────────────────

fn ok(data: Value) -> Json<Value> {
    Json(json!({ "code": 0, "msg": "success", "data": data }))
}

fn err(code: u16, msg: &str) -> Json<Value> {
    Json(json!({ "code": code, "msg": msg, "data": null }))
}

fn rate_limited(endpoint: &str, e: RateLimitError) -> Json<Value> {
    metrics::RATE_LIMITED_TOTAL.with_label_values(&[endpoint]).inc();
    Json(json!({
        "code": 429,
        "msg": "rate limit exceeded",
        "data": { "retry_after": e.retry_after_secs },
    }))
}

fn internal(e: impl std::fmt::Display) -> Json<Value> {
    tracing::error!("internal error: {e}");
    err(500, "internal error")
}

// ── Request types ────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LoginRequest {
    pub uid: String,
    pub paste: String,
}

#[derive(Deserialize)]
pub struct JoinRequest {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub color: String,
}

#[derive(Deserialize)]
pub struct MoveRequest {
    pub token: String,
    pub direction: String,
}

#[derive(Deserialize)]
pub struct LeaderboardParams {
    pub limit: Option<i64>,
}

// ── Router ───────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/game/login", post(login))
        .route("/api/game/join", post(join))
        .route("/api/game/map", get(get_map))
        .route("/api/game/map/delta", get(get_map_delta))
        .route("/api/game/move", post(game_move))
        .route("/api/leaderboard", get(leaderboard))
        .route("/api/metrics", get(metrics_exposition))
        .layer(middleware::from_fn(track_metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Record request count and latency per (method, endpoint, status).
async fn track_metrics(req: Request, next: Next) -> Response {
    let start = std::time::Instant::now();
    let method = req.method().to_string();
    let path = metrics::normalize_path(req.uri().path());
    let response = next.run(req).await;

    metrics::API_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, response.status().as_str()])
        .inc();
    metrics::API_REQUEST_DURATION_SECONDS
        .with_label_values(&[&path])
        .observe(start.elapsed().as_secs_f64());
    response
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "gridsnake-backend" }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let world = state.world.read().await;
    ok(json!({
        "map_size": {
            "width": state.map.width(),
            "height": state.map.height(),
        },
        "round_time": state.config.round_time_ms,
        "protocol_version": PROTOCOL_VERSION,
        "round": world.round(),
        "player_count": world.player_count(),
    }))
}

async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Json<Value> {
    let Ok(Json(req)) = body else {
        return err(400, "malformed request body");
    };
    if req.uid.is_empty() || req.paste.is_empty() {
        return err(400, "uid and paste are required");
    }

    if let Err(e) = state
        .rate_limiter
        .check(&format!("login:{}", req.uid), state.config.rate_limits.login)
    {
        return rate_limited("login", e);
    }

    match state.players.login(&req.uid, &req.paste).await {
        Ok(key) => ok(json!({ "key": key })),
        Err(LoginError::ProofRejected(msg)) => {
            tracing::warn!(uid = %req.uid, "login rejected: {msg}");
            err(401, "identity proof validation failed")
        }
        Err(LoginError::ServiceUnavailable(msg)) => {
            tracing::warn!(uid = %req.uid, "proof service unavailable: {msg}");
            err(503, "identity proof service unavailable")
        }
        Err(LoginError::Db(e)) => internal(e),
    }
}

async fn join(
    State(state): State<AppState>,
    body: Result<Json<JoinRequest>, JsonRejection>,
) -> Json<Value> {
    let Ok(Json(req)) = body else {
        return err(400, "malformed request body");
    };

    if let Err(e) = state
        .rate_limiter
        .check(&format!("join:{}", req.key), state.config.rate_limits.join)
    {
        return rate_limited("join", e);
    }

    let session = match state.players.join(&req.key, &req.name, &req.color).await {
        Ok(session) => session,
        Err(JoinError::InvalidKey) => return err(401, "invalid key"),
        Err(JoinError::InvalidName) => return err(400, "invalid player name"),
        Err(JoinError::InvalidColor) => return err(400, "invalid color format"),
        Err(JoinError::AlreadyInGame) => return err(409, "player already in game"),
        Err(JoinError::Db(e)) => return internal(e),
    };

    match state.game.spawn_player(&session).await {
        Some(map_state) => ok(json!({
            "id": session.player_id,
            "token": session.token,
            "map_state": map_state,
        })),
        None => {
            // Roll the session back so the uid can retry.
            state.players.remove_session(&session.player_id);
            err(503, "no safe spawn position available")
        }
    }
}

async fn get_map(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Json<Value> {
    if let Err(e) = state
        .rate_limiter
        .check(&format!("map:{}", addr.ip()), state.config.rate_limits.map)
    {
        return rate_limited("map", e);
    }

    let world = state.world.read().await;
    ok(json!({ "map_state": world.full_state() }))
}

async fn get_map_delta(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Json<Value> {
    if let Err(e) = state
        .rate_limiter
        .check(&format!("delta:{}", addr.ip()), state.config.rate_limits.delta)
    {
        return rate_limited("delta", e);
    }

    let world = state.world.read().await;
    ok(json!({ "delta_state": world.delta_state() }))
}

async fn game_move(
    State(state): State<AppState>,
    body: Result<Json<MoveRequest>, JsonRejection>,
) -> Json<Value> {
    let Ok(Json(req)) = body else {
        return err(400, "malformed request body");
    };

    let Some(player_id) = state.players.validate_token(&req.token) else {
        return err(401, "invalid token");
    };

    let direction = match Direction::parse(&req.direction) {
        Some(d) if d != Direction::None => d,
        _ => return err(400, "invalid direction"),
    };

    if let Err(e) = state.rate_limiter.check(
        &format!("move:{player_id}"),
        state.config.rate_limits.game_move,
    ) {
        return rate_limited("move", e);
    }

    // 404 here specifically tells the client SDK that it is dead.
    if !state.players.is_in_game(&player_id) {
        return err(404, "player is dead");
    }

    state.game.queue_move(&player_id, direction);
    metrics::MOVES_ACCEPTED_TOTAL.inc();
    ok(json!({}))
}

async fn leaderboard(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<LeaderboardParams>,
) -> Json<Value> {
    if let Err(e) = state.rate_limiter.check(
        &format!("leaderboard:{}", addr.ip()),
        state.config.rate_limits.leaderboard,
    ) {
        return rate_limited("leaderboard", e);
    }

    let limit = params.limit.unwrap_or(10).clamp(1, 100);
    match state.db.top_players(limit).await {
        Ok(rows) => ok(json!({ "players": rows })),
        Err(e) => internal(e),
    }
}

async fn metrics_exposition() -> ([(header::HeaderName, &'static str); 1], String) {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}
