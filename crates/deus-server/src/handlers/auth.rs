use axum::{extract::State, Extension, Json};
use chrono::{DateTime, Duration, Utc};
use deus_shared::api::{
    AuthResponse, ConfirmPasswordResetRequest, LoginRequest, MessageResponse,
    PasswordResetRequest, RefreshRequest, RoleResponse, SignUpRequest, UpdatePasswordRequest,
    UpdateProfileRequest,
};
use deus_shared::validation::{validate_email, validate_full_name, validate_new_password};
use deus_shared::User;
use rand::{distributions::Alphanumeric, Rng};
use uuid::Uuid;

use crate::auth::{
    create_access_token, create_refresh_token, hash_password, verify_password, verify_token,
    AuthUser, TokenKind,
};
use crate::error::AppError;
use crate::routes::AppState;

const RESET_SECRET_LEN: usize = 32;

/// Issue an access/refresh pair and persist the refresh token's hash.
async fn issue_tokens(state: &AppState, user_id: Uuid, email: &str) -> Result<AuthResponse, AppError> {
    let token_id = Uuid::new_v4();
    let access_token = create_access_token(
        user_id,
        email,
        &state.config.jwt_secret,
        state.config.jwt_expires_in,
    )?;
    let refresh_token = create_refresh_token(
        user_id,
        email,
        token_id,
        &state.config.jwt_secret,
        state.config.refresh_token_expires_in,
    )?;

    let token_hash = hash_password(&refresh_token)?;
    let expires_at = Utc::now() + Duration::seconds(state.config.refresh_token_expires_in);

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(token_id)
    .bind(user_id)
    .bind(&token_hash)
    .bind(expires_at)
    .execute(&state.db)
    .await?;

    Ok(AuthResponse {
        access_token,
        refresh_token,
        user_id,
    })
}

/// POST /api/v1/auth/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let email = validate_email(&req.email)?;
    validate_new_password(&req.password, &req.confirm_password)?;
    let full_name = validate_full_name(req.full_name.as_deref())?;

    let existing: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    if existing.is_some() {
        return Err(AppError::Conflict("Email already registered".to_string()));
    }

    let password_hash = hash_password(&req.password)?;
    let user_id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO users (id, email, password_hash, full_name)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(user_id)
    .bind(&email)
    .bind(&password_hash)
    .bind(&full_name)
    .execute(&state.db)
    .await?;

    tracing::info!(user = %user_id, "User signed up");

    Ok(Json(issue_tokens(&state, user_id, &email).await?))
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let email = validate_email(&req.email)?;
    if req.password.is_empty() {
        return Err(AppError::Validation("Password is required".to_string()));
    }

    let row: Option<(Uuid, String)> =
        sqlx::query_as("SELECT id, password_hash FROM users WHERE email = $1")
            .bind(&email)
            .fetch_optional(&state.db)
            .await?;

    let (user_id, password_hash) = row.ok_or(AppError::InvalidCredentials)?;

    if !verify_password(&req.password, &password_hash)? {
        return Err(AppError::InvalidCredentials);
    }

    sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
        .bind(user_id)
        .execute(&state.db)
        .await?;

    Ok(Json(issue_tokens(&state, user_id, &email).await?))
}

/// POST /api/v1/auth/refresh
///
/// Rotates the refresh token: the presented one is revoked and a new pair
/// is issued.
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let claims = verify_token(&req.refresh_token, &state.config.jwt_secret, TokenKind::Refresh)?;
    let token_id = claims.jti.ok_or(AppError::Unauthorized)?;

    let row: Option<(String, String)> = sqlx::query_as(
        r#"
        SELECT rt.token_hash, u.email
        FROM refresh_tokens rt
        JOIN users u ON u.id = rt.user_id
        WHERE rt.id = $1
          AND rt.user_id = $2
          AND rt.revoked_at IS NULL
          AND rt.expires_at > NOW()
        "#,
    )
    .bind(token_id)
    .bind(claims.sub)
    .fetch_optional(&state.db)
    .await?;

    let (token_hash, email) = row.ok_or(AppError::Unauthorized)?;
    if !verify_password(&req.refresh_token, &token_hash)? {
        return Err(AppError::Unauthorized);
    }

    sqlx::query("UPDATE refresh_tokens SET revoked_at = NOW() WHERE id = $1")
        .bind(token_id)
        .execute(&state.db)
        .await?;

    Ok(Json(issue_tokens(&state, claims.sub, &email).await?))
}

/// POST /api/v1/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE refresh_tokens SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL",
    )
    .bind(user.id)
    .execute(&state.db)
    .await?;

    Ok(())
}

type UserRow = (Uuid, String, Option<String>, Option<String>, DateTime<Utc>, DateTime<Utc>);

const USER_COLUMNS: &str = "id, email, full_name, avatar_url, created_at, updated_at";

fn row_to_user(row: UserRow) -> User {
    let (id, email, full_name, avatar_url, created_at, updated_at) = row;
    User {
        id,
        email,
        full_name,
        avatar_url,
        created_at,
        updated_at,
    }
}

/// GET /api/v1/auth/me
pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<User>, AppError> {
    let row: Option<UserRow> =
        sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(user.id)
            .fetch_optional(&state.db)
            .await?;

    Ok(Json(row_to_user(row.ok_or(AppError::NotFound)?)))
}

/// PATCH /api/v1/auth/me
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<User>, AppError> {
    let full_name = validate_full_name(req.full_name.as_deref())?;

    let row: Option<UserRow> = sqlx::query_as(&format!(
        "UPDATE users SET full_name = $1, updated_at = NOW() WHERE id = $2 RETURNING {}",
        USER_COLUMNS
    ))
    .bind(&full_name)
    .bind(user.id)
    .fetch_optional(&state.db)
    .await?;

    tracing::info!(user = %user.id, "Profile updated");

    Ok(Json(row_to_user(row.ok_or(AppError::NotFound)?)))
}

/// GET /api/v1/auth/role
pub async fn role(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<RoleResponse>, AppError> {
    let role = user.role(&state).await?;
    Ok(Json(RoleResponse { role }))
}

/// PUT /api/v1/auth/password
pub async fn update_password(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<UpdatePasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    validate_new_password(&req.new_password, &req.confirm_password)?;

    let password_hash = hash_password(&req.new_password)?;
    let result = sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
        .bind(&password_hash)
        .bind(user.id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    Ok(Json(MessageResponse {
        message: "Password updated".to_string(),
    }))
}

/// POST /api/v1/auth/password-reset
///
/// Always answers the same way so the endpoint cannot be used to discover
/// which emails are registered.
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(req): Json<PasswordResetRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let email = validate_email(&req.email)?;

    let user: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    if let Some((user_id,)) = user {
        let reset_id = Uuid::new_v4();
        let secret: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(RESET_SECRET_LEN)
            .map(char::from)
            .collect();
        let expires_at = Utc::now() + Duration::seconds(state.config.reset_token_expires_in);

        sqlx::query(
            r#"
            INSERT INTO password_resets (id, user_id, secret_hash, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(reset_id)
        .bind(user_id)
        .bind(hash_password(&secret)?)
        .bind(expires_at)
        .execute(&state.db)
        .await?;

        state.mailer.send_password_reset(
            &email,
            &format!("{}.{}", reset_id, secret),
            state.config.reset_token_expires_in,
        );
    } else {
        tracing::debug!("Password reset requested for unknown email");
    }

    Ok(Json(MessageResponse {
        message: "If that email is registered, a reset link is on its way".to_string(),
    }))
}

/// Split a `<reset id>.<secret>` token.
pub(crate) fn parse_reset_token(token: &str) -> Result<(Uuid, &str), AppError> {
    let invalid = || AppError::Validation("Reset link is invalid or has expired".to_string());
    let (id, secret) = token.trim().split_once('.').ok_or_else(invalid)?;
    let id = Uuid::parse_str(id).map_err(|_| invalid())?;
    if secret.is_empty() {
        return Err(invalid());
    }
    Ok((id, secret))
}

/// POST /api/v1/auth/password-reset/confirm
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Json(req): Json<ConfirmPasswordResetRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    validate_new_password(&req.new_password, &req.confirm_password)?;
    let (reset_id, secret) = parse_reset_token(&req.token)?;

    let row: Option<(Uuid, String)> = sqlx::query_as(
        r#"
        SELECT user_id, secret_hash
        FROM password_resets
        WHERE id = $1 AND used_at IS NULL AND expires_at > NOW()
        "#,
    )
    .bind(reset_id)
    .fetch_optional(&state.db)
    .await?;

    let expired = || AppError::Validation("Reset link is invalid or has expired".to_string());
    let (user_id, secret_hash) = row.ok_or_else(expired)?;
    if !verify_password(secret, &secret_hash)? {
        return Err(expired());
    }

    let password_hash = hash_password(&req.new_password)?;
    let mut tx = state.db.begin().await?;

    sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
        .bind(&password_hash)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE password_resets SET used_at = NOW() WHERE id = $1")
        .bind(reset_id)
        .execute(&mut *tx)
        .await?;

    // Sessions opened with the old password end here.
    sqlx::query(
        "UPDATE refresh_tokens SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL",
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(user = %user_id, "Password reset completed");

    Ok(Json(MessageResponse {
        message: "Password updated, you can sign in now".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_tokens_split_into_id_and_secret() {
        let id = Uuid::new_v4();
        let token = format!("{}.abcDEF123", id);
        let (parsed, secret) = parse_reset_token(&token).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(secret, "abcDEF123");
    }

    #[test]
    fn malformed_reset_tokens_are_validation_errors() {
        let empty_secret = format!("{}.", Uuid::new_v4());
        for token in ["", "no-dot", "not-a-uuid.secret", empty_secret.as_str()] {
            assert!(
                matches!(parse_reset_token(token), Err(AppError::Validation(_))),
                "{token:?} should be rejected"
            );
        }
    }
}
