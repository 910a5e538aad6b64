//! Persistence Gateway: the single entry point the rest of the server names.
//! Session and Matchmaker code only ever talk to `Persistence`, never to
//! `DurableStore` or `EphemeralCache` directly — this is what lets the
//! backing technology change without touching the session engine.

mod cache;
mod durable;

pub use cache::EphemeralCache;
pub use durable::{DurableStore, GameSummary, User, WaitingGameRow};

use uuid::Uuid;

use crate::error::PersistenceError;

#[derive(Clone)]
pub struct Persistence {
    pub durable: DurableStore,
    pub cache: EphemeralCache,
}

impl Persistence {
    pub fn new(durable: DurableStore, cache: EphemeralCache) -> Self {
        Self { durable, cache }
    }

    pub async fn append_move(
        &self,
        game_id: Uuid,
        move_number: u32,
        san: &str,
        player_id: Uuid,
        fen_after: &str,
        turn_after: &str,
    ) -> Result<(), PersistenceError> {
        self.durable
            .append_move(game_id, move_number, san, player_id)
            .await?;
        self.cache.put_position(game_id, fen_after).await;
        self.cache.put_turn(game_id, turn_after).await;
        Ok(())
    }

    /// Finalize writes are retried once inline before being logged and
    /// swallowed — the in-memory Session is evicted regardless so clients
    /// still see `game_over`.
    pub async fn finalize_game(
        &self,
        game_id: Uuid,
        winner_id: Option<Uuid>,
        end_reason: &str,
        total_moves: u32,
    ) {
        for attempt in 0..2 {
            match self
                .durable
                .finalize_game(game_id, winner_id, end_reason, total_moves)
                .await
            {
                Ok(()) => return,
                Err(err) if attempt == 0 => {
                    tracing::warn!(%game_id, %err, "finalize_game write failed, retrying once");
                }
                Err(err) => {
                    tracing::error!(%game_id, %err, "finalize_game write failed after retry");
                }
            }
        }
    }

    pub async fn apply_rating_delta(&self, user_id: Uuid, delta: i32, won: bool) {
        if let Err(err) = self.durable.apply_rating_delta(user_id, delta, won).await {
            tracing::error!(%user_id, %err, "apply_rating_delta failed");
        }
    }
}
