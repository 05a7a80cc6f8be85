use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid, // User ID
    pub email: String,
    pub kind: TokenKind,
    /// Row id in `refresh_tokens`; only set on refresh tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<Uuid>,
    pub exp: i64,
    pub iat: i64,
}

fn sign(claims: &Claims, secret: &str) -> Result<String, AppError> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to create token: {}", e)))
}

fn claims(user_id: Uuid, email: &str, kind: TokenKind, jti: Option<Uuid>, ttl: i64) -> Claims {
    let now = Utc::now();
    Claims {
        sub: user_id,
        email: email.to_string(),
        kind,
        jti,
        exp: (now + Duration::seconds(ttl)).timestamp(),
        iat: now.timestamp(),
    }
}

pub fn create_access_token(
    user_id: Uuid,
    email: &str,
    secret: &str,
    expires_in_secs: i64,
) -> Result<String, AppError> {
    sign(
        &claims(user_id, email, TokenKind::Access, None, expires_in_secs),
        secret,
    )
}

/// Refresh token bound to the `refresh_tokens` row `token_id`.
pub fn create_refresh_token(
    user_id: Uuid,
    email: &str,
    token_id: Uuid,
    secret: &str,
    expires_in_secs: i64,
) -> Result<String, AppError> {
    sign(
        &claims(user_id, email, TokenKind::Refresh, Some(token_id), expires_in_secs),
        secret,
    )
}

pub fn verify_token(token: &str, secret: &str, expected: TokenKind) -> Result<Claims, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        tracing::debug!("Token verification failed: {}", e);
        AppError::Unauthorized
    })?;

    if token_data.claims.kind != expected {
        tracing::debug!("Rejected {:?} token where {:?} was expected", token_data.claims.kind, expected);
        return Err(AppError::Unauthorized);
    }

    Ok(token_data.claims)
}
