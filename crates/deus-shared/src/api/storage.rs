use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadParams {
    /// Path prefix such as `pages/<page id>` or `avatars/<user id>`.
    pub folder: String,
    /// Original file name; only its extension is kept.
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub url: String,
    pub path: String,
}
