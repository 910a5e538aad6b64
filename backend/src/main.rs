use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use backend::api::{self, AppState};
use backend::config::Config;
use backend::lifecycle::LifecycleManager;
use backend::matchmaker::Matchmaker;
use backend::persistence::{DurableStore, EphemeralCache, Persistence};
use backend::registry::Router;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();

    let options = SqliteConnectOptions::from_str(&config.database_url)
        .expect("invalid DATABASE_URL")
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .expect("failed to connect to the durable store");

    let durable = DurableStore::new(pool);
    durable
        .init_schema()
        .await
        .expect("failed to initialize durable schema");

    let cache = EphemeralCache::connect(&config.redis_url)
        .await
        .expect("failed to configure ephemeral cache pool");

    let persistence = Arc::new(Persistence::new(durable, cache));
    let lifecycle = Arc::new(LifecycleManager::new(persistence.clone()));
    let matchmaker = Arc::new(Matchmaker::new(
        persistence.clone(),
        lifecycle.clone(),
        config.timer_broadcast_interval,
    ));
    let router = Arc::new(Router::new(
        matchmaker,
        lifecycle.clone(),
        persistence.clone(),
        config.clone(),
    ));

    spawn_sweeper(router.clone(), config.sweep_interval);

    let state = AppState {
        router,
        persistence,
        lifecycle,
        config: config.clone(),
    };

    let app = api::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "xfchess listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn spawn_sweeper(router: Arc<Router>, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            router.sweep_once().await;
        }
    });
}
