//! Wire protocol for the XFChess realtime game channel.
//!
//! Both directions are plain JSON frames over a single WebSocket per
//! connection, tagged by `type` so a client can dispatch on
//! `serde_json::Value["type"]` without knowing the full schema up front.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type GameId = Uuid;
pub type UserId = Uuid;

/// Events the client may send.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Register {
        username: String,
        password: String,
    },
    Login {
        username: String,
        password: String,
    },
    Heartbeat {},
    CreateGame {
        #[serde(default, rename = "timeControl")]
        time_control_minutes: Option<u32>,
    },
    SearchForGame {},
    CancelMatchmaking {},
    Move {
        #[serde(rename = "gameId")]
        game_id: GameId,
        #[serde(rename = "move")]
        mv: MoveInput,
    },
    Resign {
        #[serde(rename = "gameId")]
        game_id: GameId,
    },
    Chat {
        #[serde(rename = "gameId")]
        game_id: GameId,
        message: String,
    },
    ReconnectToGame {
        #[serde(rename = "gameId")]
        game_id: GameId,
    },
    RequestGameSync {
        #[serde(rename = "gameId")]
        game_id: GameId,
    },
}

/// A move as received from the client: either SAN or a coordinate triple.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MoveInput {
    San(String),
    Coordinate {
        from: String,
        to: String,
        promotion: Option<char>,
    },
}

/// Events the server may send.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    ConnectionConfirmed {
        #[serde(rename = "socketId")]
        socket_id: Uuid,
        server: String,
        timestamp: i64,
    },
    RegistrationSuccess,
    RegistrationFailure {
        reason: String,
    },
    LoginSuccess {
        #[serde(rename = "userId")]
        user_id: UserId,
        username: String,
        elo: i32,
        #[serde(rename = "gamesPlayed")]
        games_played: i32,
        #[serde(rename = "gamesWon")]
        games_won: i32,
    },
    LoginFailure {
        reason: String,
    },
    WaitingForOpponent {
        #[serde(rename = "gameId")]
        game_id: GameId,
        #[serde(rename = "timeControl")]
        time_control_minutes: u32,
        position: String,
    },
    NoGamesFound,
    MatchFound {
        #[serde(rename = "gameId")]
        game_id: GameId,
        #[serde(rename = "yourColor")]
        your_color: String,
        opponent: OpponentSummary,
        #[serde(rename = "timeControl")]
        time_control_minutes: u32,
    },
    MoveMade {
        #[serde(rename = "gameId")]
        game_id: GameId,
        san: String,
        from: String,
        to: String,
        fen: String,
        turn: String,
        player: UserId,
        #[serde(rename = "playerTimeRemaining")]
        player_time_remaining_ms: u64,
        #[serde(rename = "opponentTimeRemaining")]
        opponent_time_remaining_ms: u64,
        #[serde(rename = "serverTimestamp")]
        server_timestamp: i64,
        #[serde(rename = "lastOpponentMove", skip_serializing_if = "Option::is_none")]
        last_opponent_move: Option<String>,
    },
    InvalidMove {
        reason: String,
    },
    TimerUpdate {
        #[serde(rename = "gameId")]
        game_id: GameId,
        #[serde(rename = "player1Time")]
        player1_time_ms: u64,
        #[serde(rename = "player2Time")]
        player2_time_ms: u64,
        #[serde(rename = "currentPlayer")]
        current_player: String,
        #[serde(rename = "serverTimestamp")]
        server_timestamp: i64,
    },
    Chat {
        #[serde(rename = "gameId")]
        game_id: GameId,
        username: String,
        message: String,
        timestamp: i64,
    },
    GameOver {
        #[serde(rename = "gameId")]
        game_id: GameId,
        result: String,
        winner: Option<String>,
        reason: String,
        #[serde(rename = "finalFen", skip_serializing_if = "Option::is_none")]
        final_fen: Option<String>,
        #[serde(rename = "totalMoves", skip_serializing_if = "Option::is_none")]
        total_moves: Option<u32>,
        #[serde(rename = "gameDuration", skip_serializing_if = "Option::is_none")]
        game_duration_secs: Option<u64>,
        #[serde(rename = "eloChanges", skip_serializing_if = "Option::is_none")]
        elo_changes: Option<EloChanges>,
        #[serde(rename = "resignedPlayer", skip_serializing_if = "Option::is_none")]
        resigned_player: Option<String>,
        #[serde(rename = "timedOutPlayer", skip_serializing_if = "Option::is_none")]
        timed_out_player: Option<String>,
    },
    GameStateSync {
        #[serde(rename = "gameId")]
        game_id: GameId,
        fen: String,
        turn: String,
        moves: Vec<String>,
        #[serde(rename = "isPlayerWhite")]
        is_player_white: bool,
        #[serde(rename = "timerData")]
        timer_data: TimerSnapshotWire,
        #[serde(rename = "gameStatus")]
        game_status: String,
    },
    MatchmakingCancelled,
    Error {
        message: String,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OpponentSummary {
    pub username: String,
    pub elo: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EloChanges {
    pub white: i32,
    pub black: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimerSnapshotWire {
    #[serde(rename = "whiteRemaining")]
    pub white_remaining_ms: u64,
    #[serde(rename = "blackRemaining")]
    pub black_remaining_ms: u64,
    #[serde(rename = "runningSide")]
    pub running_side: String,
    #[serde(rename = "serverInstant")]
    pub server_instant: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_event_round_trips_coordinate_input() {
        let event = ClientEvent::Move {
            game_id: Uuid::nil(),
            mv: MoveInput::Coordinate {
                from: "e2".into(),
                to: "e4".into(),
                promotion: None,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        let decoded: ClientEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn move_event_accepts_san_input() {
        let json = r#"{"type":"move","gameId":"00000000-0000-0000-0000-000000000000","move":"e4"}"#;
        let decoded: ClientEvent = serde_json::from_str(json).unwrap();
        match decoded {
            ClientEvent::Move { mv: MoveInput::San(san), .. } => assert_eq!(san, "e4"),
            other => panic!("expected SAN move, got {other:?}"),
        }
    }

    #[test]
    fn game_over_serializes_without_optional_fields() {
        let event = ServerEvent::GameOver {
            game_id: Uuid::nil(),
            result: "resignation".into(),
            winner: Some("alice".into()),
            reason: "resignation".into(),
            final_fen: None,
            total_moves: None,
            game_duration_secs: None,
            elo_changes: None,
            resigned_player: Some("bob".into()),
            timed_out_player: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("finalFen").is_none());
        assert_eq!(json["resignedPlayer"], "bob");
    }
}
