use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    Extension, Json,
};
use deus_shared::api::{UploadParams, UploadResponse};
use deus_shared::validation::validate_storage_folder;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::routes::AppState;
use crate::storage::{image_extension, object_path, write_object};

/// Who may write into a folder.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FolderAccess {
    /// `pages/...`: anyone who can edit pages.
    Editors,
    /// `avatars/<uid>`: that user, or an admin.
    Avatar { owner: Uuid },
}

pub(crate) fn folder_access(folder: &str) -> Result<FolderAccess, AppError> {
    let mut segments = folder.split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some("pages"), _, _) => Ok(FolderAccess::Editors),
        (Some("avatars"), Some(owner), None) => Uuid::parse_str(owner)
            .map(|owner| FolderAccess::Avatar { owner })
            .map_err(|_| AppError::Validation("Avatar folder must name a user".to_string())),
        (Some("avatars"), _, _) => Err(AppError::Validation(
            "Avatar folder must name a user".to_string(),
        )),
        _ => Err(AppError::Validation("Unknown upload folder".to_string())),
    }
}

/// POST /api/v1/storage?folder=&filename=
///
/// Body is the raw image. Everything that can be checked without the
/// database is checked first.
pub async fn upload(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>, AppError> {
    let folder = validate_storage_folder(&params.folder)?;

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let extension = image_extension(content_type, &params.filename)
        .ok_or_else(|| AppError::Validation("Only image uploads are allowed".to_string()))?;

    if body.is_empty() {
        return Err(AppError::Validation("File is empty".to_string()));
    }
    if body.len() > state.config.max_upload_bytes {
        return Err(AppError::PayloadTooLarge(
            state.config.max_upload_bytes / (1024 * 1024),
        ));
    }

    let access = folder_access(&folder)?;
    match access {
        FolderAccess::Editors => {
            user.require_editor(&state).await?;
        }
        FolderAccess::Avatar { owner } if owner != user.id => {
            if !user.role(&state).await?.can_admin() {
                return Err(AppError::Forbidden);
            }
        }
        FolderAccess::Avatar { .. } => {}
    }

    let path = object_path(&folder, extension);
    write_object(&state.config.storage_dir, &path, &body).await?;
    let url = state.config.media_url(&path);

    if let FolderAccess::Avatar { owner } = access {
        sqlx::query("UPDATE users SET avatar_url = $1, updated_at = NOW() WHERE id = $2")
            .bind(&url)
            .bind(owner)
            .execute(&state.db)
            .await?;
    }

    tracing::info!(user = %user.id, %path, bytes = body.len(), "Stored upload");

    Ok(Json(UploadResponse { url, path }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_folders_need_editors() {
        assert_eq!(folder_access("pages/abc").unwrap(), FolderAccess::Editors);
    }

    #[test]
    fn avatar_folders_name_their_owner() {
        let owner = Uuid::new_v4();
        assert_eq!(
            folder_access(&format!("avatars/{}", owner)).unwrap(),
            FolderAccess::Avatar { owner }
        );

        for folder in ["avatars", "avatars/not-a-user", &format!("avatars/{}/x", owner)] {
            assert!(matches!(folder_access(folder), Err(AppError::Validation(_))));
        }
    }

    #[test]
    fn other_folders_are_rejected() {
        assert!(matches!(
            folder_access("secrets/x"),
            Err(AppError::Validation(_))
        ));
    }
}
