//! Registration and login. Treated as an external collaborator by the
//! session engine (it only ever reads `Persistence::find_user_by_id`) but
//! still lives in this crate since something has to populate the `users`
//! table the core depends on. Argon2 + JWT, same shape as the teacher's
//! `backend/src/auth.rs`.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthError;
use crate::persistence::{Persistence, User};

const MIN_USERNAME_LEN: usize = 3;
const MIN_PASSWORD_LEN: usize = 4;
const TOKEN_LIFETIME_DAYS: i64 = 7;

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

pub async fn register(
    persistence: &Persistence,
    username: &str,
    password: &str,
) -> Result<Uuid, AuthError> {
    if username.len() < MIN_USERNAME_LEN {
        return Err(AuthError::UsernameTooShort);
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AuthError::PasswordTooShort);
    }
    if persistence.durable.find_user_by_name(username).await?.is_some() {
        return Err(AuthError::UsernameTaken);
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| AuthError::Hashing)?;

    let id = persistence.durable.insert_user(username, &password_hash).await?;
    Ok(id)
}

pub async fn login(persistence: &Persistence, username: &str, password: &str) -> Result<User, AuthError> {
    let user = persistence
        .durable
        .find_user_by_name(username)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    let parsed_hash = PasswordHash::new(&user.password_hash).map_err(|_| AuthError::Hashing)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AuthError::InvalidCredentials)?;

    persistence.durable.touch_last_login(user.id).await?;
    Ok(user)
}

/// Issued for the HTTP surface only; the realtime channel authenticates a
/// connection directly via the `login` event instead of a bearer token.
pub fn issue_jwt(user_id: Uuid, secret: &str) -> Result<String, AuthError> {
    let expiration = Utc::now()
        .checked_add_signed(ChronoDuration::days(TOKEN_LIFETIME_DAYS))
        .expect("valid timestamp")
        .timestamp();

    encode(
        &Header::default(),
        &Claims {
            sub: user_id.to_string(),
            exp: expiration as usize,
        },
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .map_err(|_| AuthError::Token)
}
