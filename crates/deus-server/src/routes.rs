use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, services::ServeDir, trace::TraceLayer,
};

use crate::auth::auth_middleware;
use crate::config::Config;
use crate::db::DbPool;
use crate::handlers::{
    auth as auth_handlers, pages as page_handlers, pins as pin_handlers,
    storage as storage_handlers,
};
use crate::mailer::Mailer;

/// Headroom over the upload limit so oversized images get a JSON 413 from
/// the handler rather than a bare rejection from the extractor.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub mailer: Mailer,
}

pub fn create_router(db: DbPool, config: Config, mailer: Mailer) -> Router {
    let media = ServeDir::new(&config.storage_dir);
    let body_limit = config.max_upload_bytes + BODY_LIMIT_SLACK;
    let state = AppState { db, config, mailer };

    let public_auth_routes = Router::new()
        .route("/signup", post(auth_handlers::signup))
        .route("/login", post(auth_handlers::login))
        .route("/refresh", post(auth_handlers::refresh))
        .route("/password-reset", post(auth_handlers::request_password_reset))
        .route(
            "/password-reset/confirm",
            post(auth_handlers::confirm_password_reset),
        );

    let protected_auth_routes = Router::new()
        .route("/logout", post(auth_handlers::logout))
        .route(
            "/me",
            get(auth_handlers::me).patch(auth_handlers::update_profile),
        )
        .route("/password", put(auth_handlers::update_password))
        .route("/role", get(auth_handlers::role))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let auth_routes = Router::new()
        .merge(public_auth_routes)
        .merge(protected_auth_routes);

    let page_routes = Router::new()
        .route(
            "/",
            get(page_handlers::list_pages).post(page_handlers::create_page),
        )
        .route("/by-slug/:slug", get(page_handlers::get_page_by_slug))
        .route(
            "/:id",
            get(page_handlers::get_page)
                .patch(page_handlers::update_page)
                .delete(page_handlers::delete_page),
        );

    let pin_routes = Router::new()
        .route("/", get(pin_handlers::list_pins))
        .route(
            "/:page_id",
            put(pin_handlers::pin_page).delete(pin_handlers::unpin_page),
        );

    let storage_routes = Router::new()
        .route("/", post(storage_handlers::upload))
        .layer(DefaultBodyLimit::max(body_limit));

    let protected_routes = Router::new()
        .nest("/pages", page_routes)
        .nest("/pins", pin_routes)
        .nest("/storage", storage_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1/auth", auth_routes)
        .nest("/api/v1", protected_routes)
        .nest_service("/media", media)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
