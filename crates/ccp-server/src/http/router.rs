//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`. Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Packages
        .route("/packages", post(handlers::package::create_package))
        .route("/packages/active", get(handlers::package::list_active))
        .route(
            "/packages/{id}/decisions",
            get(handlers::decision::package_decisions),
        )
        // Decisions
        .route("/decisions", get(handlers::decision::list_decisions))
        .route(
            "/decisions/{id}/resolve",
            post(handlers::decision::resolve_decision),
        )
        // Legacy resolution by job id
        .route(
            "/jobs/{id}/decision",
            post(handlers::decision::resolve_job_decision),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
