use std::path::Path;

use anyhow::Context;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use deus_shared::{
    api::{
        AuthResponse, ConfirmPasswordResetRequest, CreatePageRequest, LoginRequest,
        MessageResponse, PageListParams, PasswordResetRequest, RefreshRequest, RoleResponse,
        SignUpRequest, UpdatePageRequest, UpdatePasswordRequest, UpdateProfileRequest,
        UploadResponse,
    },
    PageRecord, PinSet, Role, User,
};
use reqwest::{header::CONTENT_TYPE, Client, RequestBuilder, StatusCode};
use uuid::Uuid;

use super::auth::AuthTokens;

/// JWT payload claims we need for expiry checking
#[derive(serde::Deserialize)]
struct JwtClaims {
    exp: i64,
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not authenticated")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("Not found")]
    NotFound,
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Server error: {0}")]
    Server(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// The server's `{"error": ...}` message, or the raw body when it is not JSON.
fn error_message(text: String) -> String {
    serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text)
}

/// Content type for an image upload, picked from the file extension.
pub fn image_content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "avif" => Some("image/avif"),
        _ => None,
    }
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    tokens: Option<AuthTokens>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens: None,
        }
    }

    /// Load tokens from disk
    pub fn load_tokens(&mut self) -> anyhow::Result<bool> {
        self.tokens = AuthTokens::load()?;
        Ok(self.tokens.is_some())
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    fn bearer(&self) -> Result<String, ApiError> {
        self.tokens
            .as_ref()
            .map(|t| format!("Bearer {}", t.access_token))
            .ok_or(ApiError::Unauthorized)
    }

    fn store_tokens(&mut self, auth: AuthResponse) -> Result<(), ApiError> {
        let tokens = AuthTokens::from(auth);
        tokens.save().map_err(ApiError::Other)?;
        self.tokens = Some(tokens);
        Ok(())
    }

    /// Decode JWT payload and extract expiration time
    fn decode_token_exp(token: &str) -> Option<i64> {
        let mut parts = token.split('.');
        let (_, payload, _) = (parts.next()?, parts.next()?, parts.next()?);
        let payload = URL_SAFE_NO_PAD.decode(payload).ok()?;
        let claims: JwtClaims = serde_json::from_slice(&payload).ok()?;
        Some(claims.exp)
    }

    /// Check if the access token is expiring soon (within 60 seconds)
    fn is_token_expiring_soon(&self) -> bool {
        let Some(tokens) = &self.tokens else {
            return true;
        };

        let Some(exp) = Self::decode_token_exp(&tokens.access_token) else {
            return false; // Can't decode = don't refresh proactively
        };

        exp < chrono::Utc::now().timestamp() + 60
    }

    /// Ensure we have a valid token, refreshing if needed.
    /// Returns false when there is no session or the refresh failed.
    pub async fn ensure_valid_token(&mut self) -> bool {
        if !self.is_authenticated() {
            return false;
        }

        if self.is_token_expiring_soon() {
            if let Err(e) = self.refresh().await {
                tracing::warn!("Token refresh failed: {}", e);
                return false;
            }
        }

        true
    }

    // ============ Authenticated Request Helpers ============

    /// Attach a fresh bearer token to `build(url)` and send it.
    async fn authed(
        &mut self,
        path: &str,
        build: impl FnOnce(&Client, String) -> RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        if !self.ensure_valid_token().await {
            return Err(ApiError::Unauthorized);
        }
        let bearer = self.bearer()?;
        build(&self.client, self.url(path))
            .header("Authorization", bearer)
            .send()
            .await
            .map_err(ApiError::Network)
    }

    async fn authed_get(&mut self, path: &str) -> Result<reqwest::Response, ApiError> {
        self.authed(path, |c, url| c.get(url)).await
    }

    async fn authed_post<T: serde::Serialize>(
        &mut self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, ApiError> {
        self.authed(path, |c, url| c.post(url).json(body)).await
    }

    async fn authed_patch<T: serde::Serialize>(
        &mut self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, ApiError> {
        self.authed(path, |c, url| c.patch(url).json(body)).await
    }

    async fn authed_put<T: serde::Serialize>(
        &mut self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, ApiError> {
        self.authed(path, |c, url| c.put(url).json(body)).await
    }

    async fn authed_put_empty(&mut self, path: &str) -> Result<reqwest::Response, ApiError> {
        self.authed(path, |c, url| c.put(url)).await
    }

    async fn authed_delete(&mut self, path: &str) -> Result<reqwest::Response, ApiError> {
        self.authed(path, |c, url| c.delete(url)).await
    }

    async fn error_for(response: reqwest::Response) -> ApiError {
        let status = response.status();
        let text = error_message(response.text().await.unwrap_or_default());

        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            StatusCode::FORBIDDEN => ApiError::Forbidden(text),
            StatusCode::NOT_FOUND => ApiError::NotFound,
            StatusCode::BAD_REQUEST
            | StatusCode::UNPROCESSABLE_ENTITY
            | StatusCode::PAYLOAD_TOO_LARGE => ApiError::Validation(text),
            StatusCode::CONFLICT => ApiError::Conflict(text),
            _ => ApiError::Server(format!("{}: {}", status, text)),
        }
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                response.json().await.map_err(ApiError::Network)
            }
            _ => Err(Self::error_for(response).await),
        }
    }

    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<(), ApiError> {
        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            _ => Err(Self::error_for(response).await),
        }
    }

    // ============ Auth ============

    pub async fn signup(
        &mut self,
        email: &str,
        password: &str,
        confirm_password: &str,
        full_name: Option<&str>,
    ) -> Result<User, ApiError> {
        let req = SignUpRequest {
            email: email.to_string(),
            password: password.to_string(),
            confirm_password: confirm_password.to_string(),
            full_name: full_name.map(str::to_string),
        };

        let response = self
            .client
            .post(self.url("/auth/signup"))
            .json(&req)
            .send()
            .await?;

        let auth: AuthResponse = self.handle_response(response).await?;
        self.store_tokens(auth)?;
        self.me().await
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<User, ApiError> {
        let req = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };

        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(&req)
            .send()
            .await?;

        let auth: AuthResponse = self.handle_response(response).await?;
        self.store_tokens(auth)?;
        self.me().await
    }

    pub async fn logout(&mut self) -> Result<(), ApiError> {
        if let Ok(bearer) = self.bearer() {
            // Server-side revocation is best effort; local tokens go regardless.
            let _ = self
                .client
                .post(self.url("/auth/logout"))
                .header("Authorization", bearer)
                .send()
                .await;
        }

        self.tokens = None;
        AuthTokens::delete().map_err(ApiError::Other)?;
        Ok(())
    }

    pub async fn refresh(&mut self) -> Result<(), ApiError> {
        let refresh_token = self
            .tokens
            .as_ref()
            .map(|t| t.refresh_token.clone())
            .ok_or(ApiError::Unauthorized)?;

        let response = self
            .client
            .post(self.url("/auth/refresh"))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let auth: AuthResponse = self.handle_response(response).await?;
        self.store_tokens(auth)
    }

    pub async fn me(&mut self) -> Result<User, ApiError> {
        let response = self.authed_get("/auth/me").await?;
        self.handle_response(response).await
    }

    pub async fn update_profile(&mut self, full_name: Option<String>) -> Result<User, ApiError> {
        let req = UpdateProfileRequest { full_name };
        let response = self.authed_patch("/auth/me", &req).await?;
        self.handle_response(response).await
    }

    pub async fn role(&mut self) -> Result<Role, ApiError> {
        let response = self.authed_get("/auth/role").await?;
        let body: RoleResponse = self.handle_response(response).await?;
        Ok(body.role)
    }

    pub async fn update_password(
        &mut self,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<String, ApiError> {
        let req = UpdatePasswordRequest {
            new_password: new_password.to_string(),
            confirm_password: confirm_password.to_string(),
        };
        let response = self.authed_put("/auth/password", &req).await?;
        let body: MessageResponse = self.handle_response(response).await?;
        Ok(body.message)
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<String, ApiError> {
        let response = self
            .client
            .post(self.url("/auth/password-reset"))
            .json(&PasswordResetRequest {
                email: email.to_string(),
            })
            .send()
            .await?;

        let body: MessageResponse = self.handle_response(response).await?;
        Ok(body.message)
    }

    pub async fn confirm_password_reset(
        &self,
        token: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<String, ApiError> {
        let req = ConfirmPasswordResetRequest {
            token: token.to_string(),
            new_password: new_password.to_string(),
            confirm_password: confirm_password.to_string(),
        };

        let response = self
            .client
            .post(self.url("/auth/password-reset/confirm"))
            .json(&req)
            .send()
            .await?;

        let body: MessageResponse = self.handle_response(response).await?;
        Ok(body.message)
    }

    // ============ Pages ============

    pub async fn list_pages(&mut self, params: &PageListParams) -> Result<Vec<PageRecord>, ApiError> {
        let mut query_parts = Vec::new();
        if let Some(parent_id) = params.parent_id {
            query_parts.push(format!("parent_id={}", parent_id));
        }
        if let Some(status) = params.status {
            query_parts.push(format!("status={}", status.label().to_lowercase()));
        }

        let mut path = "/pages".to_string();
        if !query_parts.is_empty() {
            path.push('?');
            path.push_str(&query_parts.join("&"));
        }

        let response = self.authed_get(&path).await?;
        self.handle_response(response).await
    }

    pub async fn get_page(&mut self, page_id: Uuid) -> Result<PageRecord, ApiError> {
        let response = self.authed_get(&format!("/pages/{}", page_id)).await?;
        self.handle_response(response).await
    }

    pub async fn get_page_by_slug(&mut self, slug: &str) -> Result<PageRecord, ApiError> {
        let response = self
            .authed_get(&format!("/pages/by-slug/{}", urlencoding::encode(slug)))
            .await?;
        self.handle_response(response).await
    }

    pub async fn create_page(&mut self, req: &CreatePageRequest) -> Result<PageRecord, ApiError> {
        let response = self.authed_post("/pages", req).await?;
        self.handle_response(response).await
    }

    pub async fn update_page(
        &mut self,
        page_id: Uuid,
        req: &UpdatePageRequest,
    ) -> Result<PageRecord, ApiError> {
        let response = self
            .authed_patch(&format!("/pages/{}", page_id), req)
            .await?;
        self.handle_response(response).await
    }

    pub async fn save_content(
        &mut self,
        page_id: Uuid,
        content_html: String,
    ) -> Result<PageRecord, ApiError> {
        let req = UpdatePageRequest {
            content_html: Some(content_html),
            ..Default::default()
        };
        self.update_page(page_id, &req).await
    }

    pub async fn delete_page(&mut self, page_id: Uuid) -> Result<(), ApiError> {
        let response = self.authed_delete(&format!("/pages/{}", page_id)).await?;
        self.handle_empty_response(response).await
    }

    // ============ Pins ============

    pub async fn list_pins(&mut self) -> Result<PinSet, ApiError> {
        let response = self.authed_get("/pins").await?;
        self.handle_response(response).await
    }

    pub async fn pin(&mut self, page_id: Uuid) -> Result<(), ApiError> {
        let response = self.authed_put_empty(&format!("/pins/{}", page_id)).await?;
        self.handle_empty_response(response).await
    }

    pub async fn unpin(&mut self, page_id: Uuid) -> Result<(), ApiError> {
        let response = self.authed_delete(&format!("/pins/{}", page_id)).await?;
        self.handle_empty_response(response).await
    }

    // ============ Storage ============

    /// Upload an image file into `folder` and return its public URL.
    pub async fn upload_image(&mut self, folder: &str, file: &Path) -> Result<UploadResponse, ApiError> {
        let content_type = image_content_type(file).ok_or_else(|| {
            ApiError::Validation("Only png, jpg, gif, webp and avif images can be uploaded".to_string())
        })?;
        let bytes = tokio::fs::read(file)
            .await
            .with_context(|| format!("Could not read {}", file.display()))?;
        let filename = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image");

        let path = format!(
            "/storage?folder={}&filename={}",
            urlencoding::encode(folder),
            urlencoding::encode(filename)
        );
        let response = self
            .authed(&path, |c, url| {
                c.post(url).header(CONTENT_TYPE, content_type).body(bytes)
            })
            .await?;
        self.handle_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with_exp(exp: i64) -> String {
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"x","exp":{}}}"#, exp));
        format!("header.{}.signature", payload)
    }

    #[test]
    fn token_expiry_is_read_from_the_payload() {
        assert_eq!(ApiClient::decode_token_exp(&token_with_exp(1234)), Some(1234));
        assert_eq!(ApiClient::decode_token_exp("not-a-jwt"), None);
    }

    #[test]
    fn expiring_tokens_are_detected() {
        let mut api = ApiClient::new("http://localhost:3000/");
        assert!(api.is_token_expiring_soon());

        let now = chrono::Utc::now().timestamp();
        api.tokens = Some(AuthTokens {
            access_token: token_with_exp(now + 30),
            refresh_token: String::new(),
            user_id: Uuid::new_v4(),
        });
        assert!(api.is_token_expiring_soon());

        api.tokens = Some(AuthTokens {
            access_token: token_with_exp(now + 600),
            refresh_token: String::new(),
            user_id: Uuid::new_v4(),
        });
        assert!(!api.is_token_expiring_soon());
    }

    #[test]
    fn urls_are_rooted_at_the_api() {
        let api = ApiClient::new("http://localhost:3000/");
        assert_eq!(api.url("/pages"), "http://localhost:3000/api/v1/pages");
    }

    #[test]
    fn server_error_bodies_are_unwrapped() {
        assert_eq!(error_message(r#"{"error":"Title cannot be empty"}"#.to_string()), "Title cannot be empty");
        assert_eq!(error_message("Bad Gateway".to_string()), "Bad Gateway");
    }

    #[test]
    fn upload_types_follow_the_extension() {
        assert_eq!(image_content_type(Path::new("a/shot.PNG")), Some("image/png"));
        assert_eq!(image_content_type(Path::new("photo.jpeg")), Some("image/jpeg"));
        assert_eq!(image_content_type(Path::new("notes.txt")), None);
        assert_eq!(image_content_type(Path::new("noext")), None);
    }
}
