//! In-process HTTP tests. The pool never connects, so every case here must
//! be decided before a query runs.

use std::path::PathBuf;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::IntoResponse,
    Router,
};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;
use uuid::Uuid;

use crate::auth::{create_access_token, create_refresh_token};
use crate::config::Config;
use crate::error::AppError;
use crate::mailer::Mailer;
use crate::routes::create_router;

const SECRET: &str = "test-secret";

fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/deus_test".to_string(),
        jwt_secret: SECRET.to_string(),
        jwt_expires_in: 900,
        refresh_token_expires_in: 3600,
        reset_token_expires_in: 3600,
        port: 3000,
        storage_dir: PathBuf::from("./target/test-storage"),
        public_base_url: "http://localhost:3000".to_string(),
        max_upload_bytes: 1024,
    }
}

fn app() -> Router {
    let config = test_config();
    let pool = PgPoolOptions::new()
        .connect_lazy(&config.database_url)
        .unwrap();
    create_router(pool, config, Mailer)
}

fn access_token(user_id: Uuid) -> String {
    create_access_token(user_id, "user@example.com", SECRET, 60).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn upload(folder: &str, content_type: &str, token: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(format!("/api/v1/storage?folder={}&filename=image.png", folder))
        .header(header::CONTENT_TYPE, content_type)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn health_check_answers_ok() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let response = app()
        .oneshot(Request::get("/api/v1/pages").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "Authentication required");
}

#[tokio::test]
async fn refresh_tokens_are_not_access_tokens() {
    let refresh =
        create_refresh_token(Uuid::new_v4(), "user@example.com", Uuid::new_v4(), SECRET, 60)
            .unwrap();

    let response = app()
        .oneshot(
            Request::get("/api/v1/auth/role")
                .header(header::AUTHORIZATION, format!("Bearer {}", refresh))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn signup_rejects_bad_input_before_the_database() {
    let cases = [
        serde_json::json!({"email": "not-an-email", "password": "longenough", "confirm_password": "longenough"}),
        serde_json::json!({"email": "a@example.com", "password": "short", "confirm_password": "short"}),
        serde_json::json!({"email": "a@example.com", "password": "longenough", "confirm_password": "different"}),
    ];

    for body in cases {
        let response = app()
            .oneshot(post_json("/api/v1/auth/signup", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
    }
}

#[tokio::test]
async fn malformed_reset_tokens_are_rejected() {
    let response = app()
        .oneshot(post_json(
            "/api/v1/auth/password-reset/confirm",
            serde_json::json!({"token": "garbage", "new_password": "longenough", "confirm_password": "longenough"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn uploads_must_be_images() {
    let token = access_token(Uuid::new_v4());
    let response = app()
        .oneshot(upload("pages/abc", "text/plain", &token, b"hello".to_vec()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "Only image uploads are allowed");
}

#[tokio::test]
async fn uploads_into_traversal_folders_are_rejected() {
    let token = access_token(Uuid::new_v4());
    let response = app()
        .oneshot(upload("pages/../etc", "image/png", &token, vec![1, 2, 3]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_uploads_get_413() {
    let token = access_token(Uuid::new_v4());
    let response = app()
        .oneshot(upload("pages/abc", "image/png", &token, vec![0; 4096]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn avatar_folders_must_name_a_user() {
    let token = access_token(Uuid::new_v4());
    let response = app()
        .oneshot(upload("avatars/someone", "image/png", &token, vec![1, 2, 3]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "Avatar folder must name a user");
}

#[tokio::test]
async fn profile_updates_validate_the_name_first() {
    let token = access_token(Uuid::new_v4());
    let request = Request::builder()
        .method(Method::PATCH)
        .uri("/api/v1/auth/me")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::from(
            serde_json::json!({"full_name": "n".repeat(101)}).to_string(),
        ))
        .unwrap();

    let response = app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"],
        "Name must be at most 100 characters"
    );
}

#[tokio::test]
async fn profile_updates_require_a_token() {
    let request = Request::builder()
        .method(Method::PATCH)
        .uri("/api/v1/auth/me")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::json!({"full_name": "Ayu"}).to_string()))
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn errors_map_to_statuses_and_json_bodies() {
    let cases = [
        (AppError::NotFound, StatusCode::NOT_FOUND),
        (AppError::Forbidden, StatusCode::FORBIDDEN),
        (AppError::InvalidCredentials, StatusCode::UNAUTHORIZED),
        (AppError::Conflict("has children".to_string()), StatusCode::CONFLICT),
        (AppError::PayloadTooLarge(3), StatusCode::PAYLOAD_TOO_LARGE),
        (
            AppError::Internal(anyhow::anyhow!("boom")),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];

    for (error, status) in cases {
        let response = error.into_response();
        assert_eq!(response.status(), status);
        let body = json_body(response).await;
        assert!(body["error"].is_string());
        assert_ne!(body["error"], "boom", "internal details must not leak");
    }
}
