//! Ephemeral key-value cache for last-known position/turn per active game.
//! Best-effort: every read tolerates a miss, and writes are logged-not-failed
//! on error — the Session's in-memory state is the sole authority.

use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

#[derive(Clone)]
pub struct EphemeralCache {
    pool: Pool<RedisConnectionManager>,
}

impl EphemeralCache {
    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let manager = RedisConnectionManager::new(redis_url)?;
        let pool = Pool::builder()
            .build(manager)
            .await
            .map_err(|e| redis::RedisError::from((redis::ErrorKind::IoError, "bb8 pool build failed", e.to_string())))?;
        Ok(Self { pool })
    }

    pub async fn put_position(&self, game_id: Uuid, fen: &str) {
        let Ok(mut conn) = self.pool.get().await else {
            tracing::warn!(%game_id, "cache unreachable on put_position");
            return;
        };
        let key = format!("game:{game_id}:fen");
        if let Err(err) = conn.set::<_, _, ()>(&key, fen).await {
            tracing::warn!(%game_id, %err, "cache write failed on put_position");
        }
    }

    pub async fn put_turn(&self, game_id: Uuid, turn: &str) {
        let Ok(mut conn) = self.pool.get().await else {
            tracing::warn!(%game_id, "cache unreachable on put_turn");
            return;
        };
        let key = format!("game:{game_id}:turn");
        if let Err(err) = conn.set::<_, _, ()>(&key, turn).await {
            tracing::warn!(%game_id, %err, "cache write failed on put_turn");
        }
    }

    pub async fn get_position(&self, game_id: Uuid) -> Option<String> {
        let mut conn = self.pool.get().await.ok()?;
        let key = format!("game:{game_id}:fen");
        conn.get::<_, Option<String>>(&key).await.ok().flatten()
    }
}
