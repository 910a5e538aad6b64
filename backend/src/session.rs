//! The authoritative container for one active match.
//!
//! Modeled as a single-threaded actor: a `tokio::sync::mpsc` command inbox
//! feeds `run_session`, which owns `{oracle position, clock}` exclusively for
//! the session's lifetime. `flag_fall` is never a direct call into this
//! state — it's just another branch of the same `select!` loop that drains
//! the inbox, so it can never race a concurrent `apply_move`. A
//! `tokio::sync::broadcast` channel fans `SessionEvent`s out to however many
//! connections are currently subscribed (normally two, sometimes one during
//! a reconnect gap).

use std::sync::Arc;
use std::time::Instant;

use chess_logic_shared::{DrawReason, MoveDescriptor, Position, Side, Terminal};
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::SessionCommandError;
use crate::lifecycle::LifecycleManager;
use crate::persistence::Persistence;
use crate::rating::{self, Outcome, RatingInput};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const COMMAND_CHANNEL_CAPACITY: usize = 32;

#[derive(Clone, Debug)]
pub struct PlayerInfo {
    pub user_id: Uuid,
    pub username: String,
    pub elo: i32,
    pub games_played: i32,
}

pub struct SessionConfig {
    pub game_id: Uuid,
    pub white: PlayerInfo,
    pub black: PlayerInfo,
    pub time_control_minutes: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    ThreefoldRepetition,
    FiftyMoveRule,
    Resignation,
    Timeout,
}

impl EndReason {
    /// `(result, reason)` as they go out over the wire. The two coincide for
    /// every decisive outcome; draws carry a generic `result` with a
    /// specific `reason`.
    pub fn wire_strings(self) -> (&'static str, &'static str) {
        match self {
            EndReason::Checkmate => ("checkmate", "checkmate"),
            EndReason::Resignation => ("resignation", "resignation"),
            EndReason::Timeout => ("timeout", "timeout"),
            EndReason::Stalemate => ("draw", "stalemate"),
            EndReason::InsufficientMaterial => ("draw", "insufficient_material"),
            EndReason::ThreefoldRepetition => ("draw", "threefold"),
            EndReason::FiftyMoveRule => ("draw", "fifty_move"),
        }
    }

    pub fn is_decisive(self) -> bool {
        matches!(self, EndReason::Checkmate | EndReason::Resignation | EndReason::Timeout)
    }
}

#[derive(Clone, Debug)]
pub struct MoveOutcome {
    pub san: String,
    pub from: String,
    pub to: String,
    pub fen: String,
    pub turn: Side,
    pub mover: Uuid,
    pub white_remaining_ms: u64,
    pub black_remaining_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ReconnectSnapshot {
    pub fen: String,
    pub turn: Side,
    pub history_san: Vec<String>,
    pub white_remaining_ms: u64,
    pub black_remaining_ms: u64,
    pub your_color: Side,
}

#[derive(Clone, Debug)]
pub enum SessionEvent {
    MoveMade {
        game_id: Uuid,
        san: String,
        from: String,
        to: String,
        fen: String,
        turn: Side,
        mover: Uuid,
        white_remaining_ms: u64,
        black_remaining_ms: u64,
        server_timestamp: i64,
    },
    TimerUpdate {
        game_id: Uuid,
        white_remaining_ms: u64,
        black_remaining_ms: u64,
        running_side: Side,
        server_timestamp: i64,
    },
    GameOver {
        game_id: Uuid,
        winner: Option<Uuid>,
        reason: EndReason,
        final_fen: String,
        total_moves: u32,
        resigned_player: Option<Uuid>,
        timed_out_player: Option<Uuid>,
        elo_changes: Option<(i32, i32)>,
    },
}

pub enum SessionCommand {
    ApplyMove {
        player_id: Uuid,
        mv: MoveDescriptor,
        reply: oneshot::Sender<Result<MoveOutcome, SessionCommandError>>,
    },
    Resign {
        player_id: Uuid,
        reply: oneshot::Sender<Result<(), SessionCommandError>>,
    },
    ReconnectSnapshot {
        player_id: Uuid,
        reply: oneshot::Sender<Result<ReconnectSnapshot, SessionCommandError>>,
    },
}

/// Cheaply cloneable front door to a running session. Holds just enough to
/// route commands and let new connections subscribe to the event stream.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
    event_tx: broadcast::Sender<SessionEvent>,
    pub game_id: Uuid,
    pub white: PlayerInfo,
    pub black: PlayerInfo,
}

impl SessionHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn side_of(&self, player_id: Uuid) -> Option<Side> {
        if player_id == self.white.user_id {
            Some(Side::White)
        } else if player_id == self.black.user_id {
            Some(Side::Black)
        } else {
            None
        }
    }

    pub async fn apply_move(
        &self,
        player_id: Uuid,
        mv: MoveDescriptor,
    ) -> Result<MoveOutcome, SessionCommandError> {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionCommand::ApplyMove { player_id, mv, reply })
            .await
            .is_err()
        {
            return Err(SessionCommandError::NotActive);
        }
        rx.await.unwrap_or(Err(SessionCommandError::NotActive))
    }

    pub async fn resign(&self, player_id: Uuid) -> Result<(), SessionCommandError> {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionCommand::Resign { player_id, reply })
            .await
            .is_err()
        {
            return Err(SessionCommandError::NotActive);
        }
        rx.await.unwrap_or(Err(SessionCommandError::NotActive))
    }

    pub async fn reconnect_snapshot(
        &self,
        player_id: Uuid,
    ) -> Result<ReconnectSnapshot, SessionCommandError> {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionCommand::ReconnectSnapshot { player_id, reply })
            .await
            .is_err()
        {
            return Err(SessionCommandError::NotActive);
        }
        rx.await.unwrap_or(Err(SessionCommandError::NotActive))
    }
}

struct SessionState {
    game_id: Uuid,
    white: PlayerInfo,
    black: PlayerInfo,
    position: Position,
    clock: Clock,
    finished: bool,
}

/// Spawns the actor task and returns a handle to it. Called only by the
/// Lifecycle Manager, which owns the active-sessions index.
pub fn spawn(
    config: SessionConfig,
    persistence: Arc<Persistence>,
    lifecycle: Arc<LifecycleManager>,
    timer_broadcast_interval: std::time::Duration,
) -> SessionHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let state = SessionState {
        game_id: config.game_id,
        white: config.white.clone(),
        black: config.black.clone(),
        position: Position::new(),
        clock: Clock::new(config.time_control_minutes, Instant::now()),
        finished: false,
    };

    let handle = SessionHandle {
        cmd_tx,
        event_tx: event_tx.clone(),
        game_id: config.game_id,
        white: config.white,
        black: config.black,
    };

    tokio::spawn(run_session(
        state,
        cmd_rx,
        event_tx,
        persistence,
        lifecycle,
        timer_broadcast_interval,
    ));

    handle
}

async fn run_session(
    mut state: SessionState,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: broadcast::Sender<SessionEvent>,
    persistence: Arc<Persistence>,
    lifecycle: Arc<LifecycleManager>,
    timer_broadcast_interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(timer_broadcast_interval);
    ticker.tick().await; // first tick fires immediately; discard it

    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    None => break,
                    Some(cmd) => {
                        handle_command(&mut state, cmd, &event_tx, &persistence).await;
                        if state.finished {
                            break;
                        }
                    }
                }
            }

            _ = ticker.tick() => {
                let now = Instant::now();
                if let Some(losing) = state.clock.poll_flag(now) {
                    let winner = Some(match losing {
                        Side::White => state.black.user_id,
                        Side::Black => state.white.user_id,
                    });
                    let timed_out = Some(match losing {
                        Side::White => state.white.user_id,
                        Side::Black => state.black.user_id,
                    });
                    finalize(&mut state, EndReason::Timeout, winner, None, timed_out, &event_tx, &persistence).await;
                    break;
                }
                let snap = state.clock.snapshot(now);
                let _ = event_tx.send(SessionEvent::TimerUpdate {
                    game_id: state.game_id,
                    white_remaining_ms: snap.white_remaining_ms,
                    black_remaining_ms: snap.black_remaining_ms,
                    running_side: snap.running_side,
                    server_timestamp: chrono::Utc::now().timestamp_millis(),
                });
            }
        }
    }

    lifecycle.evict(state.game_id).await;
}

async fn handle_command(
    state: &mut SessionState,
    cmd: SessionCommand,
    event_tx: &broadcast::Sender<SessionEvent>,
    persistence: &Arc<Persistence>,
) {
    match cmd {
        SessionCommand::ApplyMove { player_id, mv, reply } => {
            let _ = reply.send(apply_move(state, player_id, mv, event_tx, persistence).await);
        }
        SessionCommand::Resign { player_id, reply } => {
            let _ = reply.send(do_resign(state, player_id, event_tx, persistence).await);
        }
        SessionCommand::ReconnectSnapshot { player_id, reply } => {
            let _ = reply.send(reconnect_snapshot(state, player_id));
        }
    }
}

async fn apply_move(
    state: &mut SessionState,
    player_id: Uuid,
    mv: MoveDescriptor,
    event_tx: &broadcast::Sender<SessionEvent>,
    persistence: &Arc<Persistence>,
) -> Result<MoveOutcome, SessionCommandError> {
    if state.finished {
        return Err(SessionCommandError::NotActive);
    }

    let mover_side = side_of(state, player_id).ok_or(SessionCommandError::UnknownPlayer)?;
    if mover_side != state.position.turn() {
        return Err(SessionCommandError::NotYourTurn);
    }

    let next = state
        .position
        .apply(&mv)
        .map_err(|_| SessionCommandError::IllegalMove)?;

    let now = Instant::now();
    state.clock.switch(now);
    state.position = next;

    let applied = state.position.history().last().expect("move just applied").clone();
    let snap = state.clock.snapshot(now);
    let fen = state.position.fen();
    let turn = state.position.turn();
    let move_number = state.position.history().len() as u32;
    let game_id = state.game_id;
    let san = applied.san.clone();
    let from = applied.from.to_string();
    let to = applied.to.to_string();

    if let Err(err) = persistence
        .append_move(game_id, move_number, &san, player_id, &fen, side_str(turn))
        .await
    {
        tracing::warn!(%game_id, %err, "append_move persistence write failed, in-memory state remains authoritative");
    }

    let outcome = MoveOutcome {
        san: san.clone(),
        from: from.clone(),
        to: to.clone(),
        fen: fen.clone(),
        turn,
        mover: player_id,
        white_remaining_ms: snap.white_remaining_ms,
        black_remaining_ms: snap.black_remaining_ms,
    };

    match state.position.terminal() {
        Terminal::None => {
            let _ = event_tx.send(SessionEvent::MoveMade {
                game_id,
                san,
                from,
                to,
                fen,
                turn,
                mover: player_id,
                white_remaining_ms: snap.white_remaining_ms,
                black_remaining_ms: snap.black_remaining_ms,
                server_timestamp: chrono::Utc::now().timestamp_millis(),
            });
        }
        Terminal::Checkmate => {
            let winner = Some(player_id);
            finalize(state, EndReason::Checkmate, winner, None, None, event_tx, persistence).await;
        }
        Terminal::Stalemate => {
            finalize(state, EndReason::Stalemate, None, None, None, event_tx, persistence).await;
        }
        Terminal::Draw(reason) => {
            let end_reason = match reason {
                DrawReason::InsufficientMaterial => EndReason::InsufficientMaterial,
                DrawReason::ThreefoldRepetition => EndReason::ThreefoldRepetition,
                DrawReason::FiftyMoveRule => EndReason::FiftyMoveRule,
            };
            finalize(state, end_reason, None, None, None, event_tx, persistence).await;
        }
    }

    Ok(outcome)
}

async fn do_resign(
    state: &mut SessionState,
    player_id: Uuid,
    event_tx: &broadcast::Sender<SessionEvent>,
    persistence: &Arc<Persistence>,
) -> Result<(), SessionCommandError> {
    if state.finished {
        return Err(SessionCommandError::NotActive);
    }
    let side = side_of(state, player_id).ok_or(SessionCommandError::UnknownPlayer)?;
    let winner = Some(match side {
        Side::White => state.black.user_id,
        Side::Black => state.white.user_id,
    });
    finalize(
        state,
        EndReason::Resignation,
        winner,
        Some(player_id),
        None,
        event_tx,
        persistence,
    )
    .await;
    Ok(())
}

fn reconnect_snapshot(
    state: &SessionState,
    player_id: Uuid,
) -> Result<ReconnectSnapshot, SessionCommandError> {
    if state.finished {
        return Err(SessionCommandError::NotActive);
    }
    let your_color = side_of(state, player_id).ok_or(SessionCommandError::UnknownPlayer)?;
    let snap = state.clock.snapshot(Instant::now());
    Ok(ReconnectSnapshot {
        fen: state.position.fen(),
        turn: state.position.turn(),
        history_san: state.position.history().iter().map(|m| m.san.clone()).collect(),
        white_remaining_ms: snap.white_remaining_ms,
        black_remaining_ms: snap.black_remaining_ms,
        your_color,
    })
}

/// Single-shot: a second call after `state.finished` is already set is a
/// silent no-op, satisfying "invariant violation ignored" for a stray
/// flag-fall racing a just-adjudicated checkmate.
async fn finalize(
    state: &mut SessionState,
    reason: EndReason,
    winner: Option<Uuid>,
    resigned_player: Option<Uuid>,
    timed_out_player: Option<Uuid>,
    event_tx: &broadcast::Sender<SessionEvent>,
    persistence: &Arc<Persistence>,
) {
    if state.finished {
        return;
    }
    state.finished = true;
    state.clock.stop(Instant::now());

    let total_moves = state.position.history().len() as u32;
    let final_fen = state.position.fen();
    let (_wire_result, wire_reason) = reason.wire_strings();

    let elo_changes = if reason.is_decisive() {
        let outcome = if winner == Some(state.white.user_id) {
            Outcome::AWins
        } else {
            Outcome::BWins
        };
        let delta = rating::compute(RatingInput {
            rating_a: state.white.elo,
            games_a: state.white.games_played,
            rating_b: state.black.elo,
            games_b: state.black.games_played,
            outcome,
        });
        persistence
            .apply_rating_delta(state.white.user_id, delta.delta_a, winner == Some(state.white.user_id))
            .await;
        persistence
            .apply_rating_delta(state.black.user_id, delta.delta_b, winner == Some(state.black.user_id))
            .await;
        Some((delta.delta_a, delta.delta_b))
    } else {
        None
    };

    persistence
        .finalize_game(state.game_id, winner, wire_reason, total_moves)
        .await;

    let _ = event_tx.send(SessionEvent::GameOver {
        game_id: state.game_id,
        winner,
        reason,
        final_fen,
        total_moves,
        resigned_player,
        timed_out_player,
        elo_changes,
    });
}

fn side_of(state: &SessionState, player_id: Uuid) -> Option<Side> {
    if player_id == state.white.user_id {
        Some(Side::White)
    } else if player_id == state.black.user_id {
        Some(Side::Black)
    } else {
        None
    }
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::White => "white",
        Side::Black => "black",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{DurableStore, EphemeralCache, Persistence};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;

    async fn test_persistence() -> Arc<Persistence> {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let durable = DurableStore::new(pool);
        durable.init_schema().await.unwrap();
        // No live redis in unit tests; EphemeralCache::connect only builds a
        // lazy pool, it does not eagerly open a connection.
        let cache = EphemeralCache::connect("redis://127.0.0.1:6399").await.unwrap();
        Arc::new(Persistence::new(durable, cache))
    }

    fn player(name: &str) -> PlayerInfo {
        PlayerInfo {
            user_id: Uuid::new_v4(),
            username: name.to_string(),
            elo: 1200,
            games_played: 0,
        }
    }

    async fn spawn_test_session(
        white: PlayerInfo,
        black: PlayerInfo,
        minutes: u32,
    ) -> (SessionHandle, Arc<LifecycleManager>) {
        let persistence = test_persistence().await;
        let lifecycle = Arc::new(LifecycleManager::new(persistence.clone()));
        let config = SessionConfig {
            game_id: Uuid::new_v4(),
            white,
            black,
            time_control_minutes: minutes,
        };
        let handle = lifecycle.clone().spawn_session(config, Duration::from_secs(5)).await;
        (handle, lifecycle)
    }

    #[tokio::test]
    async fn fools_mate_ends_with_checkmate_and_rating_change() {
        let alice = player("alice");
        let bob = player("bob");
        let (handle, _lifecycle) = spawn_test_session(alice.clone(), bob.clone(), 30).await;
        let mut events = handle.subscribe();

        handle.apply_move(alice.user_id, MoveDescriptor::San("f3".into())).await.unwrap();
        handle.apply_move(bob.user_id, MoveDescriptor::San("e5".into())).await.unwrap();
        handle.apply_move(alice.user_id, MoveDescriptor::San("g4".into())).await.unwrap();
        handle.apply_move(bob.user_id, MoveDescriptor::San("Qh4".into())).await.unwrap();

        let mut saw_game_over = false;
        for _ in 0..5 {
            if let Ok(event) = events.try_recv() {
                if let SessionEvent::GameOver { winner, reason, elo_changes, .. } = event {
                    assert_eq!(winner, Some(bob.user_id));
                    assert_eq!(reason, EndReason::Checkmate);
                    let (white_delta, black_delta) = elo_changes.unwrap();
                    assert!(white_delta < 0);
                    assert!(black_delta > 0);
                    saw_game_over = true;
                }
            }
        }
        assert!(saw_game_over, "expected a game_over event after checkmate");
    }

    #[tokio::test]
    async fn illegal_move_is_rejected_without_mutating_state() {
        let alice = player("alice");
        let bob = player("bob");
        let (handle, _lifecycle) = spawn_test_session(alice.clone(), bob.clone(), 30).await;

        let err = handle
            .apply_move(alice.user_id, MoveDescriptor::San("e5".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionCommandError::IllegalMove));

        let snapshot = handle.reconnect_snapshot(alice.user_id).await.unwrap();
        assert!(snapshot.history_san.is_empty());
    }

    #[tokio::test]
    async fn not_your_turn_is_rejected_before_consulting_the_oracle() {
        let alice = player("alice");
        let bob = player("bob");
        let (handle, _lifecycle) = spawn_test_session(alice.clone(), bob.clone(), 30).await;

        let err = handle
            .apply_move(bob.user_id, MoveDescriptor::San("e5".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionCommandError::NotYourTurn));
    }

    #[tokio::test]
    async fn resignation_declares_the_other_player_winner() {
        let alice = player("alice");
        let bob = player("bob");
        let (handle, _lifecycle) = spawn_test_session(alice.clone(), bob.clone(), 30).await;
        let mut events = handle.subscribe();

        handle.resign(bob.user_id).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            SessionEvent::GameOver { winner, reason, resigned_player, .. } => {
                assert_eq!(winner, Some(alice.user_id));
                assert_eq!(reason, EndReason::Resignation);
                assert_eq!(resigned_player, Some(bob.user_id));
            }
            other => panic!("expected GameOver, got {other:?}"),
        }

        let err = handle.apply_move(bob.user_id, MoveDescriptor::San("e5".into())).await.unwrap_err();
        assert!(matches!(err, SessionCommandError::NotActive));
    }

    #[tokio::test]
    async fn reconnect_after_a_move_replays_the_authoritative_position() {
        let alice = player("alice");
        let bob = player("bob");
        let (handle, _lifecycle) = spawn_test_session(alice.clone(), bob.clone(), 30).await;

        handle.apply_move(alice.user_id, MoveDescriptor::San("e4".into())).await.unwrap();
        handle.apply_move(bob.user_id, MoveDescriptor::San("c5".into())).await.unwrap();

        let snapshot = handle.reconnect_snapshot(bob.user_id).await.unwrap();
        assert_eq!(snapshot.history_san, vec!["e4".to_string(), "c5".to_string()]);
        assert_eq!(snapshot.turn, Side::White);
        assert_eq!(snapshot.your_color, Side::Black);
    }
}
