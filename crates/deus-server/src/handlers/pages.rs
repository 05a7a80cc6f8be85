use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use deus_shared::api::{CreatePageRequest, PageListParams, UpdatePageRequest};
use deus_shared::slug::slugify;
use deus_shared::validation::{validate_external_url, validate_slug, validate_title};
use deus_shared::{PageKind, PageRecord, PageStatus};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::routes::AppState;

type PageRow = (
    Uuid,                // id
    Option<Uuid>,        // parent_id
    String,              // title
    String,              // slug
    PageKind,            // kind
    Option<String>,      // icon
    PageStatus,          // status
    Option<String>,      // content_html
    Option<String>,      // external_url
    Option<Uuid>,        // created_by
    Option<Uuid>,        // updated_by
    DateTime<Utc>,       // created_at
    DateTime<Utc>,       // updated_at
);

const PAGE_COLUMNS: &str = "id, parent_id, title, slug, kind, icon, status, content_html, \
                            external_url, created_by, updated_by, created_at, updated_at";

fn row_to_page(row: PageRow) -> PageRecord {
    PageRecord {
        id: row.0,
        parent_id: row.1,
        title: row.2,
        slug: row.3,
        kind: row.4,
        icon: row.5,
        status: row.6,
        content_html: row.7,
        external_url: row.8,
        created_by: row.9,
        updated_by: row.10,
        created_at: row.11,
        updated_at: row.12,
    }
}

/// A create request after validation, ready to insert.
#[derive(Debug, PartialEq)]
pub(crate) struct NewPage {
    pub title: String,
    pub slug: String,
    pub kind: PageKind,
    pub parent_id: Option<Uuid>,
    pub status: PageStatus,
    pub external_url: Option<String>,
}

pub(crate) fn prepare_new_page(req: CreatePageRequest) -> Result<NewPage, AppError> {
    let title = validate_title(&req.title)?;

    let slug = match req.slug {
        Some(slug) => {
            validate_slug(&slug)?;
            slug
        }
        None => slugify(&title),
    };

    let external_url = match req.kind {
        PageKind::Link => Some(validate_external_url(req.external_url.as_deref().unwrap_or(""))?),
        _ => None,
    };

    Ok(NewPage {
        title,
        slug,
        kind: req.kind,
        parent_id: req.parent_id,
        status: req.status.unwrap_or_default(),
        external_url,
    })
}

/// GET /api/v1/pages
///
/// Bodies are left out of the listing; fetch a single page for its content.
pub async fn list_pages(
    State(state): State<AppState>,
    Query(params): Query<PageListParams>,
) -> Result<Json<Vec<PageRecord>>, AppError> {
    let rows: Vec<PageRow> = sqlx::query_as(
        r#"
        SELECT id, parent_id, title, slug, kind, icon, status, NULL::text AS content_html,
               external_url, created_by, updated_by, created_at, updated_at
        FROM pages
        WHERE ($1::uuid IS NULL OR parent_id = $1)
          AND ($2::page_status IS NULL OR status = $2)
        ORDER BY title
        "#,
    )
    .bind(params.parent_id)
    .bind(params.status)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(rows.into_iter().map(row_to_page).collect()))
}

/// POST /api/v1/pages
pub async fn create_page(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreatePageRequest>,
) -> Result<Json<PageRecord>, AppError> {
    let page = prepare_new_page(req)?;
    user.require_editor(&state).await?;

    if let Some(parent_id) = page.parent_id {
        let parent: Option<(PageKind,)> = sqlx::query_as("SELECT kind FROM pages WHERE id = $1")
            .bind(parent_id)
            .fetch_optional(&state.db)
            .await?;

        match parent {
            Some((kind,)) if kind.is_folder() => {}
            Some(_) => {
                return Err(AppError::Validation(
                    "Pages can only be created inside a folder".to_string(),
                ))
            }
            None => return Err(AppError::Validation("Parent page not found".to_string())),
        }
    }

    let row: PageRow = sqlx::query_as(&format!(
        r#"
        INSERT INTO pages (id, parent_id, title, slug, kind, status, external_url,
                           created_by, updated_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
        RETURNING {}
        "#,
        PAGE_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(page.parent_id)
    .bind(&page.title)
    .bind(&page.slug)
    .bind(page.kind)
    .bind(page.status)
    .bind(&page.external_url)
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(page = %row.0, slug = %row.3, kind = %page.kind, "Page created");

    Ok(Json(row_to_page(row)))
}

/// GET /api/v1/pages/:id
pub async fn get_page(
    State(state): State<AppState>,
    Path(page_id): Path<Uuid>,
) -> Result<Json<PageRecord>, AppError> {
    let row: PageRow = sqlx::query_as(&format!("SELECT {} FROM pages WHERE id = $1", PAGE_COLUMNS))
        .bind(page_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(Json(row_to_page(row)))
}

/// GET /api/v1/pages/by-slug/:slug
///
/// Slugs are not unique in storage; the oldest page wins.
pub async fn get_page_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<PageRecord>, AppError> {
    let row: PageRow = sqlx::query_as(&format!(
        "SELECT {} FROM pages WHERE slug = $1 ORDER BY created_at, id LIMIT 1",
        PAGE_COLUMNS
    ))
    .bind(&slug)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound)?;

    Ok(Json(row_to_page(row)))
}

/// PATCH /api/v1/pages/:id
pub async fn update_page(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(page_id): Path<Uuid>,
    Json(req): Json<UpdatePageRequest>,
) -> Result<Json<PageRecord>, AppError> {
    let title = req.title.as_deref().map(validate_title).transpose()?;
    user.require_editor(&state).await?;

    let (kind,): (PageKind,) = sqlx::query_as("SELECT kind FROM pages WHERE id = $1")
        .bind(page_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound)?;

    let external_url = match (req.external_url.as_deref(), kind) {
        (None, _) => None,
        (Some(url), PageKind::Link) => Some(validate_external_url(url)?),
        (Some(_), _) => {
            return Err(AppError::Validation("Only link pages have a URL".to_string()))
        }
    };

    // Some("") clears the custom icon.
    let icon_set = req.icon.is_some();
    let icon = req
        .icon
        .map(|icon| icon.trim().to_string())
        .filter(|icon| !icon.is_empty());

    let row: PageRow = sqlx::query_as(&format!(
        r#"
        UPDATE pages
        SET title = COALESCE($1, title),
            content_html = COALESCE($2, content_html),
            icon = CASE WHEN $3 THEN $4 ELSE icon END,
            status = COALESCE($5, status),
            external_url = COALESCE($6, external_url),
            updated_by = $7,
            updated_at = NOW()
        WHERE id = $8
        RETURNING {}
        "#,
        PAGE_COLUMNS
    ))
    .bind(&title)
    .bind(&req.content_html)
    .bind(icon_set)
    .bind(&icon)
    .bind(req.status)
    .bind(&external_url)
    .bind(user.id)
    .bind(page_id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(row_to_page(row)))
}

/// DELETE /api/v1/pages/:id
pub async fn delete_page(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(page_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    user.require_editor(&state).await?;

    let (children,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pages WHERE parent_id = $1")
        .bind(page_id)
        .fetch_one(&state.db)
        .await?;

    if children > 0 {
        return Err(AppError::Conflict(format!(
            "Page still has {} child page(s); move or delete them first",
            children
        )));
    }

    let result = sqlx::query("DELETE FROM pages WHERE id = $1")
        .bind(page_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    tracing::info!(page = %page_id, "Page deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(title: &str, kind: PageKind) -> CreatePageRequest {
        CreatePageRequest {
            title: title.to_string(),
            kind,
            slug: None,
            parent_id: None,
            status: None,
            external_url: None,
        }
    }

    #[test]
    fn new_pages_get_a_slug_and_default_status() {
        let page = prepare_new_page(request("  Incident Runbook ", PageKind::Sop)).unwrap();
        assert_eq!(page.title, "Incident Runbook");
        assert_eq!(page.slug, "incident-runbook");
        assert_eq!(page.status, PageStatus::Published);
        assert_eq!(page.external_url, None);
    }

    #[test]
    fn client_slug_is_kept_when_valid() {
        let mut req = request("Runbook", PageKind::Doc);
        req.slug = Some("runbook-3fa2".to_string());
        assert_eq!(prepare_new_page(req).unwrap().slug, "runbook-3fa2");

        let mut req = request("Runbook", PageKind::Doc);
        req.slug = Some("Not A Slug".to_string());
        assert!(matches!(prepare_new_page(req), Err(AppError::Validation(_))));
    }

    #[test]
    fn link_pages_need_a_url() {
        assert!(matches!(
            prepare_new_page(request("Budget", PageKind::Link)),
            Err(AppError::Validation(_))
        ));

        let mut req = request("Budget", PageKind::Link);
        req.external_url = Some(" https://docs.google.com/spreadsheets/d/1 ".to_string());
        let page = prepare_new_page(req).unwrap();
        assert_eq!(
            page.external_url.as_deref(),
            Some("https://docs.google.com/spreadsheets/d/1")
        );
    }

    #[test]
    fn url_is_dropped_for_other_kinds() {
        let mut req = request("Notes", PageKind::Doc);
        req.external_url = Some("https://example.com".to_string());
        assert_eq!(prepare_new_page(req).unwrap().external_url, None);
    }

    #[test]
    fn blank_titles_are_rejected() {
        assert!(matches!(
            prepare_new_page(request("   ", PageKind::Folder)),
            Err(AppError::Validation(_))
        ));
    }
}
