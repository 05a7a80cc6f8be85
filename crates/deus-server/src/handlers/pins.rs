use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use deus_shared::PinSet;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::routes::AppState;

/// GET /api/v1/pins
pub async fn list_pins(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<PinSet>, AppError> {
    let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT page_id FROM page_pins WHERE user_id = $1")
        .bind(user.id)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(rows.into_iter().map(|(page_id,)| page_id).collect()))
}

/// PUT /api/v1/pins/:page_id
pub async fn pin_page(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(page_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM pages WHERE id = $1")
        .bind(page_id)
        .fetch_optional(&state.db)
        .await?;

    if exists.is_none() {
        return Err(AppError::NotFound);
    }

    sqlx::query(
        r#"
        INSERT INTO page_pins (user_id, page_id)
        VALUES ($1, $2)
        ON CONFLICT (user_id, page_id) DO NOTHING
        "#,
    )
    .bind(user.id)
    .bind(page_id)
    .execute(&state.db)
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/pins/:page_id
///
/// Unpinning something that is not pinned is not an error.
pub async fn unpin_page(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(page_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    sqlx::query("DELETE FROM page_pins WHERE user_id = $1 AND page_id = $2")
        .bind(user.id)
        .bind(page_id)
        .execute(&state.db)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
