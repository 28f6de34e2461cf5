//! Meditrack Backend Server
//!
//! Account service and fracture-prediction relay for the Meditrack SPA.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    MEDITRACK BACKEND                       │
//! ├────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌───────────┐  ┌────────────────────────┐  │
//! │  │  API      │  │  Auth     │  │  Prediction Relay      │  │
//! │  │  Gateway  │  │  Service  │  │  (classifier           │  │
//! │  │  (Axum)   │  │  (JWT)    │  │   subprocess)          │  │
//! │  └─────┬─────┘  └─────┬─────┘  └───────────┬────────────┘  │
//! │        └──────────────┼────────────────────┘               │
//! │                       ▼                                    │
//! │                 ┌──────────┐                               │
//! │                 │  SQLite  │                               │
//! │                 └──────────┘                               │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod captcha;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod relay;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::SqlitePool,
    pub config: config::Config,
    pub captcha: Arc<captcha::CaptchaStore>,
    pub relay: Arc<relay::PredictRelay>,
}

/// Create the main router with all routes
pub fn create_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::check))
        .route("/captcha", get(handlers::captcha::challenge))
        .route("/signup", post(handlers::auth::signup))
        .route("/login", post(handlers::auth::login));

    // Authenticated routes (user JWT auth)
    let protected_routes = Router::new()
        .route("/predict", post(handlers::predict::predict))
        // Multipart bodies carry up to the image ceiling plus form overhead;
        // the handler enforces the exact per-image limit.
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes * 2))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_user_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
