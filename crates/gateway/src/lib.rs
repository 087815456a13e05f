use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod intake;
pub mod mail;
pub mod models;
pub mod store;
pub mod tokens;

use crate::intake::{UploadIntake, MAX_UPLOAD_BYTES};
use crate::mail::MailOutbox;
use crate::store::UserStore;
use crate::tokens::TokenService;

/// Multipart framing allowance on top of the file cap.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub tokens: TokenService,
    pub intake: UploadIntake,
    pub outbox: MailOutbox,
    // Public origin used when building verification and download links.
    pub base_url: String,
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("docshare_gateway=debug,tower_http=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route("/", get(home))
        .route("/readyz", get(health_check))
        .route("/users/signup", post(handlers::users::signup))
        .route("/users/login", post(handlers::users::login))
        .route("/users/verify/resend", post(handlers::users::resend_verification))
        .route("/users/verify/:token", get(handlers::users::verify_email))
        .route(
            "/users/files/upload",
            post(handlers::files::upload)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + MULTIPART_OVERHEAD_BYTES)),
        )
        .route("/users/files/download/:file_id", get(handlers::files::issue_download_link))
        .route(
            "/users/files/download-link/:download_token",
            get(handlers::files::redeem_download_link),
        )
        .route("/users/files/list", get(handlers::files::list_files))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn home() -> &'static str {
    "home route"
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "docshare-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
