//! Axum router setup.

use crate::auth::auth_middleware;
use crate::config::RelayConfig;
use crate::handlers::{objects, token};
use crate::storage::RelayStorage;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(storage: RelayStorage, config: &RelayConfig) -> Router {
    // Authenticated routes
    let authenticated = Router::new()
        .route("/user/token", delete(token::revoke))
        .route("/objects", get(objects::fetch).put(objects::push))
        .layer(middleware::from_fn_with_state(
            storage.clone(),
            auth_middleware,
        ));

    // Unauthenticated routes
    let public = Router::new()
        .route("/user/token", put(token::issue))
        .route("/health", get(health));

    Router::new()
        .merge(authenticated)
        .merge(public)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_payload_size))
        .with_state(storage)
}

async fn health() -> &'static str {
    "ok"
}
