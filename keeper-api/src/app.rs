// Application state and router assembly
use axum::routing::get;
use axum::Router;
use keeper_providers::ComputeProvider;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn ComputeProvider>,
}

impl AppState {
    pub fn new(provider: Arc<dyn ComputeProvider>) -> Arc<Self> {
        Arc::new(Self { provider })
    }
}

/// Create CORS layer with permissive settings
pub fn create_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/version", get(handlers::version))
        .route(
            "/reconcile",
            get(handlers::reconcile).post(handlers::reconcile),
        )
        .layer(create_cors())
        .with_state(state)
}
