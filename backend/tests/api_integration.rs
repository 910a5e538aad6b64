//! Backend API Integration Tests
//!
//! Tests for the Axum HTTP endpoints using the `Router::oneshot` pattern.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use backend::api::{self, AppState};
use backend::config::Config;
use backend::lifecycle::LifecycleManager;
use backend::matchmaker::Matchmaker;
use backend::persistence::{DurableStore, EphemeralCache, Persistence};
use backend::registry::Router as ChessRouter;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceExt;

async fn test_state() -> AppState {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .expect("failed to create test database");
    let durable = DurableStore::new(pool);
    durable.init_schema().await.unwrap();
    // No live redis in integration tests; connect only builds a lazy pool.
    let cache = EphemeralCache::connect("redis://127.0.0.1:6399")
        .await
        .unwrap();
    let persistence = Arc::new(Persistence::new(durable, cache));
    let lifecycle = Arc::new(LifecycleManager::new(persistence.clone()));
    let config = Config {
        port: 0,
        database_url: ":memory:".to_string(),
        redis_url: "redis://127.0.0.1:6399".to_string(),
        jwt_secret: "test-secret".to_string(),
        default_time_control_minutes: 30,
        liveness_reap: std::time::Duration::from_secs(180),
        sweep_interval: std::time::Duration::from_secs(60),
        timer_broadcast_interval: std::time::Duration::from_secs(5),
    };
    let matchmaker = Arc::new(Matchmaker::new(
        persistence.clone(),
        lifecycle.clone(),
        config.timer_broadcast_interval,
    ));
    let router = Arc::new(ChessRouter::new(
        matchmaker,
        lifecycle.clone(),
        persistence.clone(),
        config.clone(),
    ));
    AppState {
        router,
        persistence,
        lifecycle,
        config,
    }
}

async fn test_router() -> axum::Router {
    api::router(test_state().await)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let app = test_router().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn info_reports_zero_active_games_with_no_sessions() {
    let app = test_router().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/info")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["active_games"], 0);
    assert_eq!(body["default_time_control_minutes"], 30);
}

#[tokio::test]
async fn register_then_login_round_trips_a_token() {
    let app = test_router().await;

    let register_response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/register")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"username": "magnus", "password": "hunter22"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(register_response.status(), StatusCode::CREATED);

    let login_response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/login")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"username": "magnus", "password": "hunter22"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(login_response.status(), StatusCode::OK);
    let body = body_json(login_response).await;
    assert_eq!(body["username"], "magnus");
    assert_eq!(body["token"].as_str().unwrap().split('.').count(), 3);
}

#[tokio::test]
async fn login_with_wrong_password_is_unauthorized() {
    let app = test_router().await;

    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/register")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"username": "hikaru", "password": "correct-horse"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/login")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"username": "hikaru", "password": "wrong"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn registering_the_same_username_twice_is_rejected() {
    let app = test_router().await;

    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/register")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"username": "duplicate", "password": "password1"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/register")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"username": "duplicate", "password": "password1"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn leaderboard_and_games_start_empty() {
    let app = test_router().await;

    let leaderboard = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/leaderboard")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(leaderboard.status(), StatusCode::OK);
    assert_eq!(body_json(leaderboard).await, json!([]));

    let games = app
        .oneshot(
            Request::builder()
                .uri("/games")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(games.status(), StatusCode::OK);
    assert_eq!(body_json(games).await, json!([]));
}

#[tokio::test]
async fn user_stats_for_unknown_id_is_not_found() {
    let app = test_router().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/users/{}/stats", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
