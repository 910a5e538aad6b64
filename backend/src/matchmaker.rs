//! Holds the set of open "waiting" games and implements the rating-band
//! search. Promotes a paired waiting game into a running Session by asking
//! the Lifecycle Manager to spawn one; the Router is responsible for
//! fanning `match_found` out to both connections once `search` returns.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chess_logic_shared::Side;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::lifecycle::LifecycleManager;
use crate::persistence::Persistence;
use crate::session::{PlayerInfo, SessionConfig};

/// Rating bands tried in order; the last is effectively unbounded.
const SEARCH_BANDS: [i32; 4] = [100, 200, 400, i32::MAX];

#[derive(Clone)]
struct WaitingGame {
    game_id: Uuid,
    creator: PlayerInfo,
    time_control_minutes: u32,
    created_at: Instant,
}

pub enum SearchOutcome {
    Paired {
        game_id: Uuid,
        time_control_minutes: u32,
        white: PlayerInfo,
        black: PlayerInfo,
    },
    NoneFound,
}

pub struct Matchmaker {
    waiting: Mutex<HashMap<Uuid, WaitingGame>>,
    persistence: Arc<Persistence>,
    lifecycle: Arc<LifecycleManager>,
    timer_broadcast_interval: Duration,
}

impl Matchmaker {
    pub fn new(
        persistence: Arc<Persistence>,
        lifecycle: Arc<LifecycleManager>,
        timer_broadcast_interval: Duration,
    ) -> Self {
        Self {
            waiting: Mutex::new(HashMap::new()),
            persistence,
            lifecycle,
            timer_broadcast_interval,
        }
    }

    pub async fn create_waiting(&self, creator: PlayerInfo, time_control_minutes: u32) -> Uuid {
        let game_id = match self
            .persistence
            .durable
            .insert_waiting_game(creator.user_id, time_control_minutes)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(%err, "insert_waiting_game failed, using an in-memory-only id");
                Uuid::new_v4()
            }
        };
        self.waiting.lock().await.insert(
            game_id,
            WaitingGame {
                game_id,
                creator,
                time_control_minutes,
                created_at: Instant::now(),
            },
        );
        game_id
    }

    /// Withdraws a waiting game regardless of whether the trigger was an
    /// explicit cancel or a disconnect sweep — both are the same operation.
    pub async fn withdraw(&self, player_id: Uuid) {
        let removed_id = {
            let mut waiting = self.waiting.lock().await;
            let found = waiting
                .values()
                .find(|wg| wg.creator.user_id == player_id)
                .map(|wg| wg.game_id);
            if let Some(id) = found {
                waiting.remove(&id);
            }
            found
        };
        if let Some(game_id) = removed_id {
            if let Err(err) = self.persistence.durable.delete_waiting(game_id).await {
                tracing::warn!(%game_id, %err, "delete_waiting failed");
            }
        }
    }

    pub async fn search(
        &self,
        searcher: PlayerInfo,
        is_connected: impl Fn(Uuid) -> bool,
    ) -> SearchOutcome {
        let candidate = {
            let mut waiting = self.waiting.lock().await;
            let found = find_best_candidate(&waiting, &searcher, &is_connected);
            if let Some(candidate) = &found {
                waiting.remove(&candidate.game_id);
            }
            found
        };

        let Some(candidate) = candidate else {
            return SearchOutcome::NoneFound;
        };
        if let Err(err) = self
            .persistence
            .durable
            .promote_to_in_progress(candidate.game_id, searcher.user_id)
            .await
        {
            tracing::warn!(game_id = %candidate.game_id, %err, "promote_to_in_progress failed");
        }

        let config = SessionConfig {
            game_id: candidate.game_id,
            white: candidate.creator.clone(),
            black: searcher.clone(),
            time_control_minutes: candidate.time_control_minutes,
        };
        self.lifecycle
            .clone()
            .spawn_session(config, self.timer_broadcast_interval)
            .await;

        SearchOutcome::Paired {
            game_id: candidate.game_id,
            time_control_minutes: candidate.time_control_minutes,
            white: candidate.creator,
            black: searcher,
        }
    }
}

fn find_best_candidate(
    waiting: &HashMap<Uuid, WaitingGame>,
    searcher: &PlayerInfo,
    is_connected: &impl Fn(Uuid) -> bool,
) -> Option<WaitingGame> {
    for &band in &SEARCH_BANDS {
        let best = waiting
            .values()
            .filter(|wg| wg.creator.user_id != searcher.user_id)
            .filter(|wg| is_connected(wg.creator.user_id))
            .filter(|wg| (wg.creator.elo - searcher.elo).abs() <= band)
            .min_by(|a, b| {
                let dist_a = (a.creator.elo - searcher.elo).abs();
                let dist_b = (b.creator.elo - searcher.elo).abs();
                dist_a.cmp(&dist_b).then(a.created_at.cmp(&b.created_at))
            });
        if let Some(found) = best {
            return Some(found.clone());
        }
    }
    None
}

/// Creator always plays white; joiner always plays black.
pub fn color_for(side: Side) -> &'static str {
    match side {
        Side::White => "white",
        Side::Black => "black",
    }
}
