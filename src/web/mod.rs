use axum::{http::Method, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::store::SourceSinkStore;

pub mod error;
pub mod routes;

pub use error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub source_sink_store: Arc<dyn SourceSinkStore>,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_axum_router(source_sink_store: Arc<dyn SourceSinkStore>) -> Router {
    let app_state = Arc::new(AppState { source_sink_store });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check_handler))
        .nest(
            "/sourceMonitor",
            routes::source_monitor_routes::create_source_monitor_router(),
        )
        .with_state(app_state)
        .layer(cors)
}
