//! Client Registry & Router: tracks every live connection, routes inbound
//! events to auth, the Matchmaker, or a specific Session, and fans
//! server-originated events back to the right participants.
//!
//! The WebSocket itself is split into a receive loop (this module) and a
//! forwarding task per connection that drains an `mpsc::UnboundedSender`
//! into the socket — the standard axum WebSocket fan-out shape.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use chess_logic_shared::{MoveDescriptor, Side};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::auth;
use crate::config::Config;
use crate::error::SessionCommandError;
use crate::lifecycle::LifecycleManager;
use crate::matchmaker::{self, Matchmaker, SearchOutcome};
use crate::persistence::Persistence;
use crate::session::{PlayerInfo, ReconnectSnapshot, SessionEvent, SessionHandle};
use shared::{ClientEvent, EloChanges, MoveInput, OpponentSummary, ServerEvent, TimerSnapshotWire};

struct ConnectionRecord {
    connection_id: Uuid,
    player_id: Option<Uuid>,
    last_seen: Instant,
    outbox: mpsc::UnboundedSender<ServerEvent>,
}

pub struct ClientRegistry {
    connections: Mutex<HashMap<Uuid, ConnectionRecord>>,
    player_index: Mutex<HashMap<Uuid, Uuid>>,
    forwarders: Mutex<HashSet<(Uuid, Uuid)>>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            player_index: Mutex::new(HashMap::new()),
            forwarders: Mutex::new(HashSet::new()),
        }
    }

    /// Claims the forwarder slot for `(connection_id, game_id)`. Returns
    /// `false` if one is already running, so a repeated reconnect request
    /// doesn't spawn a second task subscribed to the same broadcast channel.
    async fn claim_forwarder(&self, connection_id: Uuid, game_id: Uuid) -> bool {
        self.forwarders.lock().await.insert((connection_id, game_id))
    }

    async fn release_forwarder(&self, connection_id: Uuid, game_id: Uuid) {
        self.forwarders.lock().await.remove(&(connection_id, game_id));
    }

    async fn register_connection(&self, outbox: mpsc::UnboundedSender<ServerEvent>) -> Uuid {
        let connection_id = Uuid::new_v4();
        self.connections.lock().await.insert(
            connection_id,
            ConnectionRecord {
                connection_id,
                player_id: None,
                last_seen: Instant::now(),
                outbox,
            },
        );
        connection_id
    }

    async fn authenticate(&self, connection_id: Uuid, player_id: Uuid) {
        if let Some(rec) = self.connections.lock().await.get_mut(&connection_id) {
            rec.player_id = Some(player_id);
        }
        self.player_index.lock().await.insert(player_id, connection_id);
    }

    async fn touch(&self, connection_id: Uuid) {
        if let Some(rec) = self.connections.lock().await.get_mut(&connection_id) {
            rec.last_seen = Instant::now();
        }
    }

    async fn player_id_for(&self, connection_id: Uuid) -> Option<Uuid> {
        self.connections.lock().await.get(&connection_id)?.player_id
    }

    async fn connection_id_for(&self, player_id: Uuid) -> Option<Uuid> {
        self.player_index.lock().await.get(&player_id).copied()
    }

    async fn connected_player_ids(&self) -> HashSet<Uuid> {
        self.player_index.lock().await.keys().copied().collect()
    }

    async fn send_to_connection(&self, connection_id: Uuid, event: ServerEvent) -> bool {
        match self.connections.lock().await.get(&connection_id) {
            Some(rec) => rec.outbox.send(event).is_ok(),
            None => false,
        }
    }

    async fn send_to_player(&self, player_id: Uuid, event: ServerEvent) -> bool {
        match self.connection_id_for(player_id).await {
            Some(connection_id) => self.send_to_connection(connection_id, event).await,
            None => false,
        }
    }

    /// Removes the connection and, if it was authenticated, its player-index
    /// entry (but only if that entry still points at this connection — a
    /// reconnect may already have replaced it).
    async fn disconnect(&self, connection_id: Uuid) -> Option<Uuid> {
        let player_id = self.connections.lock().await.remove(&connection_id)?.player_id;
        if let Some(pid) = player_id {
            let mut index = self.player_index.lock().await;
            if index.get(&pid) == Some(&connection_id) {
                index.remove(&pid);
            }
        }
        self.forwarders.lock().await.retain(|(cid, _)| *cid != connection_id);
        player_id
    }

    /// Invalidates any connection whose `last_seen` is older than
    /// `reap_after`. Returns the player-ids that were authenticated on a
    /// reaped connection, so the caller can withdraw their waiting games.
    pub async fn sweep(&self, reap_after: Duration) -> Vec<Uuid> {
        let now = Instant::now();
        let stale: Vec<Uuid> = self
            .connections
            .lock()
            .await
            .values()
            .filter(|rec| now.saturating_duration_since(rec.last_seen) > reap_after)
            .map(|rec| rec.connection_id)
            .collect();

        let mut reaped = Vec::new();
        for connection_id in stale {
            if let Some(player_id) = self.disconnect(connection_id).await {
                reaped.push(player_id);
            }
        }
        reaped
    }
}

pub struct Router {
    pub registry: Arc<ClientRegistry>,
    pub matchmaker: Arc<Matchmaker>,
    pub lifecycle: Arc<LifecycleManager>,
    pub persistence: Arc<Persistence>,
    pub config: Config,
}

impl Router {
    pub fn new(
        matchmaker: Arc<Matchmaker>,
        lifecycle: Arc<LifecycleManager>,
        persistence: Arc<Persistence>,
        config: Config,
    ) -> Self {
        Self {
            registry: Arc::new(ClientRegistry::new()),
            matchmaker,
            lifecycle,
            persistence,
            config,
        }
    }

    pub async fn sweep_once(&self) {
        let reaped = self.registry.sweep(self.config.liveness_reap).await;
        for player_id in reaped {
            self.matchmaker.withdraw(player_id).await;
        }
    }

    pub async fn handle_disconnect(&self, connection_id: Uuid) {
        if let Some(player_id) = self.registry.disconnect(connection_id).await {
            self.matchmaker.withdraw(player_id).await;
        }
    }

    pub async fn handle_event(self: &Arc<Self>, connection_id: Uuid, event: ClientEvent) {
        self.registry.touch(connection_id).await;
        match event {
            ClientEvent::Register { username, password } => {
                self.on_register(connection_id, username, password).await;
            }
            ClientEvent::Login { username, password } => {
                self.on_login(connection_id, username, password).await;
            }
            ClientEvent::Heartbeat {} => {}
            ClientEvent::CreateGame { time_control_minutes } => {
                self.on_create_game(connection_id, time_control_minutes).await;
            }
            ClientEvent::SearchForGame {} => {
                self.on_search_for_game(connection_id).await;
            }
            ClientEvent::CancelMatchmaking {} => {
                self.on_cancel_matchmaking(connection_id).await;
            }
            ClientEvent::Move { game_id, mv } => {
                self.on_move(connection_id, game_id, mv).await;
            }
            ClientEvent::Resign { game_id } => {
                self.on_resign(connection_id, game_id).await;
            }
            ClientEvent::Chat { game_id, message } => {
                self.on_chat(connection_id, game_id, message).await;
            }
            ClientEvent::ReconnectToGame { game_id } => {
                self.on_reconnect(connection_id, game_id).await;
            }
            ClientEvent::RequestGameSync { game_id } => {
                self.on_request_sync(connection_id, game_id).await;
            }
        }
    }

    async fn send_error(&self, connection_id: Uuid, message: &str) {
        self.registry
            .send_to_connection(connection_id, ServerEvent::Error { message: message.to_string() })
            .await;
    }

    async fn authenticated_player_id(&self, connection_id: Uuid) -> Option<Uuid> {
        self.registry.player_id_for(connection_id).await
    }

    async fn authenticated_player(&self, connection_id: Uuid) -> Option<PlayerInfo> {
        let player_id = self.authenticated_player_id(connection_id).await?;
        let user = self.persistence.durable.find_user_by_id(player_id).await.ok().flatten()?;
        Some(PlayerInfo {
            user_id: user.id,
            username: user.username,
            elo: user.elo,
            games_played: user.games_played,
        })
    }

    async fn on_register(&self, connection_id: Uuid, username: String, password: String) {
        match auth::register(&self.persistence, &username, &password).await {
            Ok(_) => {
                self.registry.send_to_connection(connection_id, ServerEvent::RegistrationSuccess).await;
            }
            Err(err) => {
                self.registry
                    .send_to_connection(connection_id, ServerEvent::RegistrationFailure { reason: err.to_string() })
                    .await;
            }
        }
    }

    async fn on_login(&self, connection_id: Uuid, username: String, password: String) {
        match auth::login(&self.persistence, &username, &password).await {
            Ok(user) => {
                self.registry.authenticate(connection_id, user.id).await;
                self.registry
                    .send_to_connection(
                        connection_id,
                        ServerEvent::LoginSuccess {
                            user_id: user.id,
                            username: user.username,
                            elo: user.elo,
                            games_played: user.games_played,
                            games_won: user.games_won,
                        },
                    )
                    .await;
            }
            Err(err) => {
                self.registry
                    .send_to_connection(connection_id, ServerEvent::LoginFailure { reason: err.to_string() })
                    .await;
            }
        }
    }

    async fn on_create_game(&self, connection_id: Uuid, time_control_minutes: Option<u32>) {
        let Some(player) = self.authenticated_player(connection_id).await else {
            self.send_error(connection_id, "not authenticated").await;
            return;
        };
        let minutes = time_control_minutes.unwrap_or(self.config.default_time_control_minutes);
        let game_id = self.matchmaker.create_waiting(player, minutes).await;
        self.registry
            .send_to_connection(
                connection_id,
                ServerEvent::WaitingForOpponent { game_id, time_control_minutes: minutes, position: "white".to_string() },
            )
            .await;
    }

    async fn on_search_for_game(self: &Arc<Self>, connection_id: Uuid) {
        let Some(player) = self.authenticated_player(connection_id).await else {
            self.send_error(connection_id, "not authenticated").await;
            return;
        };
        let connected = self.registry.connected_player_ids().await;
        let outcome = self.matchmaker.search(player, |pid| connected.contains(&pid)).await;
        match outcome {
            SearchOutcome::NoneFound => {
                self.registry.send_to_connection(connection_id, ServerEvent::NoGamesFound).await;
            }
            SearchOutcome::Paired { game_id, time_control_minutes, white, black } => {
                self.fan_out_match_found(game_id, time_control_minutes, white, black).await;
            }
        }
    }

    async fn fan_out_match_found(
        self: &Arc<Self>,
        game_id: Uuid,
        time_control_minutes: u32,
        white: PlayerInfo,
        black: PlayerInfo,
    ) {
        let Some(handle) = self.lifecycle.get(game_id).await else {
            tracing::error!(%game_id, "matchmaker paired a game with no live session");
            return;
        };
        for (player, opponent, side) in [(&white, &black, Side::White), (&black, &white, Side::Black)] {
            self.registry
                .send_to_player(
                    player.user_id,
                    ServerEvent::MatchFound {
                        game_id,
                        your_color: matchmaker::color_for(side).to_string(),
                        opponent: OpponentSummary { username: opponent.username.clone(), elo: opponent.elo },
                        time_control_minutes,
                    },
                )
                .await;
            self.spawn_forwarder(player.user_id, handle.clone()).await;
        }
    }

    async fn on_cancel_matchmaking(&self, connection_id: Uuid) {
        let Some(player_id) = self.authenticated_player_id(connection_id).await else {
            self.send_error(connection_id, "not authenticated").await;
            return;
        };
        self.matchmaker.withdraw(player_id).await;
        self.registry.send_to_connection(connection_id, ServerEvent::MatchmakingCancelled).await;
    }

    async fn on_move(&self, connection_id: Uuid, game_id: Uuid, mv: MoveInput) {
        let Some(player_id) = self.authenticated_player_id(connection_id).await else {
            self.send_error(connection_id, "not authenticated").await;
            return;
        };
        let Some(handle) = self.lifecycle.get(game_id).await else {
            self.send_error(connection_id, "game not active").await;
            return;
        };
        if let Err(err) = handle.apply_move(player_id, convert_move_input(mv)).await {
            let reason = match err {
                SessionCommandError::IllegalMove => "Invalid move",
                SessionCommandError::NotYourTurn => "not your turn",
                SessionCommandError::NotActive => "game not active",
                SessionCommandError::UnknownPlayer => "not part of this game",
            };
            self.registry
                .send_to_connection(connection_id, ServerEvent::InvalidMove { reason: reason.to_string() })
                .await;
        }
    }

    async fn on_resign(&self, connection_id: Uuid, game_id: Uuid) {
        let Some(player_id) = self.authenticated_player_id(connection_id).await else {
            self.send_error(connection_id, "not authenticated").await;
            return;
        };
        let Some(handle) = self.lifecycle.get(game_id).await else {
            self.send_error(connection_id, "game not active").await;
            return;
        };
        if let Err(err) = handle.resign(player_id).await {
            let reason = match err {
                SessionCommandError::IllegalMove => "Invalid move",
                SessionCommandError::NotYourTurn => "not your turn",
                SessionCommandError::NotActive => "game not active",
                SessionCommandError::UnknownPlayer => "not part of this game",
            };
            self.registry
                .send_to_connection(connection_id, ServerEvent::InvalidMove { reason: reason.to_string() })
                .await;
        }
    }

    async fn on_chat(&self, connection_id: Uuid, game_id: Uuid, message: String) {
        let Some(player_id) = self.authenticated_player_id(connection_id).await else {
            return;
        };
        let Some(handle) = self.lifecycle.get(game_id).await else {
            return;
        };
        let Some(username) = username_of(&handle, player_id) else {
            return;
        };
        let trimmed: String = message.trim().chars().take(200).collect();
        let event = ServerEvent::Chat {
            game_id,
            username,
            message: trimmed,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        self.registry.send_to_player(handle.white.user_id, event.clone()).await;
        self.registry.send_to_player(handle.black.user_id, event).await;
    }

    async fn on_reconnect(self: &Arc<Self>, connection_id: Uuid, game_id: Uuid) {
        let Some(player_id) = self.authenticated_player_id(connection_id).await else {
            self.send_error(connection_id, "not authenticated").await;
            return;
        };
        let Some(handle) = self.lifecycle.get(game_id).await else {
            self.send_error(connection_id, "game not active").await;
            return;
        };
        match handle.reconnect_snapshot(player_id).await {
            Ok(snapshot) => {
                self.registry
                    .send_to_connection(connection_id, game_state_sync_event(game_id, &snapshot))
                    .await;
                self.spawn_forwarder(player_id, handle).await;
            }
            Err(_) => self.send_error(connection_id, "game not active").await,
        }
    }

    async fn on_request_sync(&self, connection_id: Uuid, game_id: Uuid) {
        let Some(player_id) = self.authenticated_player_id(connection_id).await else {
            self.send_error(connection_id, "not authenticated").await;
            return;
        };
        let Some(handle) = self.lifecycle.get(game_id).await else {
            self.send_error(connection_id, "game not active").await;
            return;
        };
        match handle.reconnect_snapshot(player_id).await {
            Ok(snapshot) => {
                self.registry
                    .send_to_connection(connection_id, game_state_sync_event(game_id, &snapshot))
                    .await;
            }
            Err(_) => self.send_error(connection_id, "game not active").await,
        }
    }

    /// Subscribes a fresh forwarding task to a Session's broadcast channel
    /// for the current connection backing `player_id`. On reconnect the
    /// previous connection is already gone by the time this fires, so its
    /// own forwarder will simply find its outbox closed and stop.
    ///
    /// A repeated reconnect/sync request for a connection that already has
    /// a forwarder running for this game is a no-op: without this guard
    /// every session event would be delivered to that connection once per
    /// spawned forwarder.
    async fn spawn_forwarder(self: &Arc<Self>, player_id: Uuid, handle: SessionHandle) {
        let Some(connection_id) = self.registry.connection_id_for(player_id).await else {
            return;
        };
        if !self.registry.claim_forwarder(connection_id, handle.game_id).await {
            return;
        }
        let registry = Arc::clone(&self.registry);
        let mut events = handle.subscribe();
        let Some(side) = handle.side_of(player_id) else {
            registry.release_forwarder(connection_id, handle.game_id).await;
            return;
        };
        let game_id = handle.game_id;

        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                let is_game_over = matches!(event, SessionEvent::GameOver { .. });
                let wire = translate_session_event(event, &handle, side);
                if !registry.send_to_connection(connection_id, wire).await {
                    break;
                }
                if is_game_over {
                    break;
                }
            }
            registry.release_forwarder(connection_id, game_id).await;
        });
    }
}

fn username_of(handle: &SessionHandle, player_id: Uuid) -> Option<String> {
    if player_id == handle.white.user_id {
        Some(handle.white.username.clone())
    } else if player_id == handle.black.user_id {
        Some(handle.black.username.clone())
    } else {
        None
    }
}

fn convert_move_input(mv: MoveInput) -> MoveDescriptor {
    match mv {
        MoveInput::San(san) => MoveDescriptor::San(san),
        MoveInput::Coordinate { from, to, promotion } => MoveDescriptor::Coordinate { from, to, promotion },
    }
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::White => "white",
        Side::Black => "black",
    }
}

fn game_state_sync_event(game_id: Uuid, snapshot: &ReconnectSnapshot) -> ServerEvent {
    ServerEvent::GameStateSync {
        game_id,
        fen: snapshot.fen.clone(),
        turn: side_str(snapshot.turn).to_string(),
        moves: snapshot.history_san.clone(),
        is_player_white: snapshot.your_color == Side::White,
        timer_data: TimerSnapshotWire {
            white_remaining_ms: snapshot.white_remaining_ms,
            black_remaining_ms: snapshot.black_remaining_ms,
            running_side: side_str(snapshot.turn).to_string(),
            server_instant: chrono::Utc::now().timestamp_millis(),
        },
        game_status: "in_progress".to_string(),
    }
}

fn translate_session_event(event: SessionEvent, handle: &SessionHandle, recipient: Side) -> ServerEvent {
    match event {
        SessionEvent::MoveMade {
            game_id,
            san,
            from,
            to,
            fen,
            turn,
            mover,
            white_remaining_ms,
            black_remaining_ms,
            server_timestamp,
        } => {
            let (player_time, opponent_time) = match recipient {
                Side::White => (white_remaining_ms, black_remaining_ms),
                Side::Black => (black_remaining_ms, white_remaining_ms),
            };
            ServerEvent::MoveMade {
                game_id,
                san,
                from,
                to,
                fen,
                turn: side_str(turn).to_string(),
                player: mover,
                player_time_remaining_ms: player_time,
                opponent_time_remaining_ms: opponent_time,
                server_timestamp,
                last_opponent_move: None,
            }
        }
        SessionEvent::TimerUpdate { game_id, white_remaining_ms, black_remaining_ms, running_side, server_timestamp } => {
            ServerEvent::TimerUpdate {
                game_id,
                player1_time_ms: white_remaining_ms,
                player2_time_ms: black_remaining_ms,
                current_player: side_str(running_side).to_string(),
                server_timestamp,
            }
        }
        SessionEvent::GameOver {
            game_id,
            winner,
            reason,
            final_fen,
            total_moves,
            resigned_player,
            timed_out_player,
            elo_changes,
        } => {
            let (result, reason_str) = reason.wire_strings();
            ServerEvent::GameOver {
                game_id,
                result: result.to_string(),
                winner: winner.and_then(|id| username_of(handle, id)),
                reason: reason_str.to_string(),
                final_fen: Some(final_fen),
                total_moves: Some(total_moves),
                game_duration_secs: None,
                elo_changes: elo_changes.map(|(white, black)| EloChanges { white, black }),
                resigned_player: resigned_player.and_then(|id| username_of(handle, id)),
                timed_out_player: timed_out_player.and_then(|id| username_of(handle, id)),
            }
        }
    }
}

/// Drives a single connection end to end: registers it, confirms it,
/// deserializes inbound frames into `ClientEvent`s for the Router, and
/// serializes outbound `ServerEvent`s from its private outbox.
pub async fn handle_socket(socket: WebSocket, router: Arc<Router>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let connection_id = router.registry.register_connection(outbox_tx).await;

    let send_task = tokio::spawn(async move {
        while let Some(event) = outbox_rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    router
        .registry
        .send_to_connection(
            connection_id,
            ServerEvent::ConnectionConfirmed {
                socket_id: connection_id,
                server: "xfchess".to_string(),
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        )
        .await;

    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => router.handle_event(connection_id, event).await,
                Err(err) => {
                    tracing::debug!(%connection_id, %err, "malformed client event");
                    router
                        .registry
                        .send_to_connection(connection_id, ServerEvent::Error { message: "malformed message".to_string() })
                        .await;
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    router.handle_disconnect(connection_id).await;
    send_task.abort();
}
