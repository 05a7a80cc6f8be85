use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{PageKind, PageStatus};

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePageRequest {
    pub title: String,
    pub kind: PageKind,
    /// Client-chosen slug; the server falls back to slugifying the title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
}

/// Partial update. An empty `icon` resets the page to its kind's default icon.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdatePageRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PageListParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PageStatus>,
}
