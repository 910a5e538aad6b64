//! HTTP observability surface plus the `/ws` upgrade route. None of these
//! handlers carry business logic of their own — they read through
//! `Persistence` or hand off to the `Router`, the way the teacher wires
//! `/lobby` and `/join` alongside its auth routes.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth;
use crate::config::Config;
use crate::lifecycle::LifecycleManager;
use crate::persistence::Persistence;
use crate::registry::{self, Router};

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<Router>,
    pub persistence: Arc<Persistence>,
    pub lifecycle: Arc<LifecycleManager>,
    pub config: Config,
}

pub fn router(state: AppState) -> AxumRouter {
    AxumRouter::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .route("/info", get(info))
        .route("/leaderboard", get(leaderboard))
        .route("/users/{id}/stats", get(user_stats))
        .route("/games", get(recent_games))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .with_state(state)
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| registry::handle_socket(socket, state.router))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
struct InfoResponse {
    name: &'static str,
    active_games: usize,
    default_time_control_minutes: u32,
}

async fn info(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        name: "xfchess",
        active_games: state.lifecycle.active_count().await,
        default_time_control_minutes: state.config.default_time_control_minutes,
    })
}

#[derive(Deserialize)]
struct PageParams {
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize)]
struct LeaderboardEntry {
    username: String,
    elo: i32,
    games_played: i32,
    games_won: i32,
}

async fn leaderboard(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<LeaderboardEntry>>, StatusCode> {
    let rows = state
        .persistence
        .durable
        .leaderboard(params.limit.unwrap_or(20), params.offset.unwrap_or(0))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(
        rows.into_iter()
            .map(|(username, elo, games_played, games_won)| LeaderboardEntry {
                username,
                elo,
                games_played,
                games_won,
            })
            .collect(),
    ))
}

#[derive(Serialize)]
struct UserStatsResponse {
    username: String,
    elo: i32,
    games_played: i32,
    games_won: i32,
}

async fn user_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserStatsResponse>, StatusCode> {
    let user = state
        .persistence
        .durable
        .find_user_by_id(id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(UserStatsResponse {
        username: user.username,
        elo: user.elo,
        games_played: user.games_played,
        games_won: user.games_won,
    }))
}

#[derive(Deserialize)]
struct RecentGamesParams {
    limit: Option<i64>,
}

#[derive(Serialize)]
struct GameSummaryResponse {
    id: Uuid,
    player_white_id: Uuid,
    player_black_id: Option<Uuid>,
    status: String,
    winner_id: Option<Uuid>,
    end_reason: Option<String>,
    total_moves: i64,
    time_control_minutes: i64,
}

async fn recent_games(
    State(state): State<AppState>,
    Query(params): Query<RecentGamesParams>,
) -> Result<Json<Vec<GameSummaryResponse>>, StatusCode> {
    let rows = state
        .persistence
        .durable
        .recent_games(params.limit.unwrap_or(20))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(
        rows.into_iter()
            .map(|g| GameSummaryResponse {
                id: g.id,
                player_white_id: g.player_white_id,
                player_black_id: g.player_black_id,
                status: g.status,
                winner_id: g.winner_id,
                end_reason: g.end_reason,
                total_moves: g.total_moves,
                time_control_minutes: g.time_control_minutes,
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    user_id: Uuid,
    username: String,
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> impl IntoResponse {
    match auth::register(&state.persistence, &payload.username, &payload.password).await {
        Ok(_) => StatusCode::CREATED.into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

async fn login(State(state): State<AppState>, Json(payload): Json<LoginRequest>) -> impl IntoResponse {
    let user = match auth::login(&state.persistence, &payload.username, &payload.password).await {
        Ok(user) => user,
        Err(err) => return (StatusCode::UNAUTHORIZED, err.to_string()).into_response(),
    };
    match auth::issue_jwt(user.id, &state.config.jwt_secret) {
        Ok(token) => Json(LoginResponse { token, user_id: user.id, username: user.username }).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
