//! The durable relational store: users, games, move records. SQLite via
//! `sqlx`, runtime queries (not the `query!` macro) so the crate builds
//! without a live database at compile time, matching the teacher's
//! `auth.rs`.

use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

use crate::error::PersistenceError;

#[derive(Clone, Debug)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub elo: i32,
    pub games_played: i32,
    pub games_won: i32,
}

#[derive(Clone, Debug)]
pub struct WaitingGameRow {
    pub game_id: Uuid,
    pub creator_id: Uuid,
    pub time_control_minutes: u32,
}

#[derive(Clone, Debug)]
pub struct GameSummary {
    pub id: Uuid,
    pub player_white_id: Uuid,
    pub player_black_id: Option<Uuid>,
    pub status: String,
    pub winner_id: Option<Uuid>,
    pub end_reason: Option<String>,
    pub total_moves: i64,
    pub time_control_minutes: i64,
}

#[derive(Clone)]
pub struct DurableStore {
    pool: Pool<Sqlite>,
}

impl DurableStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                elo INTEGER NOT NULL DEFAULT 1200,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                last_login DATETIME,
                games_played INTEGER NOT NULL DEFAULT 0,
                games_won INTEGER NOT NULL DEFAULT 0
            );",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS games (
                id TEXT PRIMARY KEY,
                player_white_id TEXT NOT NULL,
                player_black_id TEXT,
                status TEXT NOT NULL DEFAULT 'waiting',
                winner_id TEXT,
                end_reason TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                finished_at DATETIME,
                total_moves INTEGER NOT NULL DEFAULT 0,
                time_control_minutes INTEGER NOT NULL DEFAULT 30
            );",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS game_moves (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                game_id TEXT NOT NULL,
                move_number INTEGER NOT NULL,
                move_notation TEXT NOT NULL,
                player_id TEXT NOT NULL,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_user(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<Uuid, PersistenceError> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO users (id, username, password_hash) VALUES ($1, $2, $3)")
            .bind(id.to_string())
            .bind(username)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn find_user_by_name(
        &self,
        username: &str,
    ) -> Result<Option<User>, PersistenceError> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, elo, games_played, games_won
             FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_user))
    }

    pub async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, PersistenceError> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, elo, games_played, games_won
             FROM users WHERE id = $1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_user))
    }

    pub async fn touch_last_login(&self, id: Uuid) -> Result<(), PersistenceError> {
        sqlx::query("UPDATE users SET last_login = CURRENT_TIMESTAMP WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_waiting_game(
        &self,
        creator_id: Uuid,
        time_control_minutes: u32,
    ) -> Result<Uuid, PersistenceError> {
        let game_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO games (id, player_white_id, status, time_control_minutes)
             VALUES ($1, $2, 'waiting', $3)",
        )
        .bind(game_id.to_string())
        .bind(creator_id.to_string())
        .bind(time_control_minutes as i64)
        .execute(&self.pool)
        .await?;
        Ok(game_id)
    }

    pub async fn promote_to_in_progress(
        &self,
        game_id: Uuid,
        black_id: Uuid,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            "UPDATE games SET status = 'inprogress', player_black_id = $1 WHERE id = $2",
        )
        .bind(black_id.to_string())
        .bind(game_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_waiting(&self, game_id: Uuid) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM games WHERE id = $1 AND status = 'waiting'")
            .bind(game_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn append_move(
        &self,
        game_id: Uuid,
        move_number: u32,
        san: &str,
        player_id: Uuid,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO game_moves (game_id, move_number, move_notation, player_id)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(game_id.to_string())
        .bind(move_number as i64)
        .bind(san)
        .bind(player_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn finalize_game(
        &self,
        game_id: Uuid,
        winner_id: Option<Uuid>,
        end_reason: &str,
        total_moves: u32,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            "UPDATE games SET status = 'finished', winner_id = $1, end_reason = $2,
             total_moves = $3, finished_at = CURRENT_TIMESTAMP WHERE id = $4",
        )
        .bind(winner_id.map(|id| id.to_string()))
        .bind(end_reason)
        .bind(total_moves as i64)
        .bind(game_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomic: re-reads the current rating inside the write so two
    /// finalizations touching the same user never clobber each other.
    pub async fn apply_rating_delta(
        &self,
        user_id: Uuid,
        delta: i32,
        won: bool,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            "UPDATE users SET
                elo = MAX(100, elo + $1),
                games_played = games_played + 1,
                games_won = games_won + $2
             WHERE id = $3",
        )
        .bind(delta)
        .bind(if won { 1 } else { 0 })
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn leaderboard(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<(String, i32, i32, i32)>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT username, elo, games_played, games_won FROM users
             ORDER BY elo DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.get::<String, _>("username"),
                    r.get::<i64, _>("elo") as i32,
                    r.get::<i64, _>("games_played") as i32,
                    r.get::<i64, _>("games_won") as i32,
                )
            })
            .collect())
    }

    pub async fn recent_games(&self, limit: i64) -> Result<Vec<GameSummary>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT id, player_white_id, player_black_id, status, winner_id, end_reason,
                    total_moves, time_control_minutes
             FROM games ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_game_summary).collect())
    }
}

fn row_to_user(row: sqlx::sqlite::SqliteRow) -> User {
    let id_str: String = row.get("id");
    User {
        id: Uuid::parse_str(&id_str).unwrap_or_default(),
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        elo: row.get::<i64, _>("elo") as i32,
        games_played: row.get::<i64, _>("games_played") as i32,
        games_won: row.get::<i64, _>("games_won") as i32,
    }
}

fn row_to_game_summary(row: sqlx::sqlite::SqliteRow) -> GameSummary {
    let id: String = row.get("id");
    let white: String = row.get("player_white_id");
    let black: Option<String> = row.get("player_black_id");
    let winner: Option<String> = row.get("winner_id");
    GameSummary {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        player_white_id: Uuid::parse_str(&white).unwrap_or_default(),
        player_black_id: black.and_then(|b| Uuid::parse_str(&b).ok()),
        status: row.get("status"),
        winner_id: winner.and_then(|w| Uuid::parse_str(&w).ok()),
        end_reason: row.get("end_reason"),
        total_moves: row.get::<i64, _>("total_moves"),
        time_control_minutes: row.get::<i64, _>("time_control_minutes"),
    }
}
