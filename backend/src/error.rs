//! Typed errors for the session engine and its gateways. `main` collapses
//! everything into `anyhow` at the process boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionCommandError {
    #[error("it is not your turn to move")]
    NotYourTurn,
    #[error("illegal move")]
    IllegalMove,
    #[error("game is not active")]
    NotActive,
    #[error("player is not part of this game")]
    UnknownPlayer,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("durable store error: {0}")]
    Durable(#[from] sqlx::Error),
    #[error("cache error: {0}")]
    Cache(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("username must be at least 3 characters")]
    UsernameTooShort,
    #[error("password must be at least 4 characters")]
    PasswordTooShort,
    #[error("username already taken")]
    UsernameTaken,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("password hashing failed")]
    Hashing,
    #[error("token generation failed")]
    Token,
}
