//! Environment-sourced configuration, loaded once at startup via `dotenvy`.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub default_time_control_minutes: u32,
    pub liveness_reap: Duration,
    pub sweep_interval: Duration,
    pub timer_broadcast_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_parsed("PORT", 3000),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:xfchess.db".to_string()),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or_else(|_| "dev-secret".to_string()),
            default_time_control_minutes: env_parsed("DEFAULT_TIME_CONTROL_MINUTES", 30),
            liveness_reap: Duration::from_secs(env_parsed("LIVENESS_REAP_SECONDS", 180)),
            sweep_interval: Duration::from_secs(env_parsed("SWEEP_INTERVAL_SECONDS", 60)),
            timer_broadcast_interval: Duration::from_secs(env_parsed(
                "TIMER_BROADCAST_SECONDS",
                5,
            )),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
