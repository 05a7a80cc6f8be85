use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use deus_shared::Role;
use uuid::Uuid;

use crate::{error::AppError, routes::AppState};

use super::jwt::{verify_token, TokenKind};

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

impl AuthUser {
    /// Role from the side table; users without a row are viewers.
    pub async fn role(&self, state: &AppState) -> Result<Role, AppError> {
        let row: Option<(Role,)> = sqlx::query_as("SELECT role FROM user_roles WHERE user_id = $1")
            .bind(self.id)
            .fetch_optional(&state.db)
            .await?;

        Ok(row.map(|(role,)| role).unwrap_or_default())
    }

    pub async fn require_editor(&self, state: &AppState) -> Result<Role, AppError> {
        let role = self.role(state).await?;
        if !role.can_edit() {
            tracing::debug!(user = %self.id, role = role.label(), "Edit rejected");
            return Err(AppError::Forbidden);
        }
        Ok(role)
    }
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    let claims = verify_token(token, &state.config.jwt_secret, TokenKind::Access)?;

    request.extensions_mut().insert(AuthUser {
        id: claims.sub,
        email: claims.email,
    });

    Ok(next.run(request).await)
}
