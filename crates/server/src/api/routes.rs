use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{audit, export, handlers, middleware::metrics_middleware, tickets, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health, config and metrics
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/metrics", get(handlers::get_metrics))
        // Audit
        .route("/audit", get(audit::query_audit))
        // Tickets and dependencies
        .route("/ticket-sets/{id}/tickets", get(tickets::list_tickets))
        .route(
            "/ticket-sets/{id}/dependencies",
            post(tickets::add_dependency).delete(tickets::remove_dependency),
        )
        // Export
        .route("/ticket-sets/{id}/export/readiness", get(export::get_readiness))
        .route(
            "/ticket-sets/{id}/export",
            post(export::start_export).get(export::get_export),
        )
        .route("/ticket-sets/{id}/export/retry", post(export::retry_export))
        .route("/ticket-sets/{id}/export/cancel", post(export::cancel_export))
        .route("/ticket-sets/{id}/manual-fixes", get(export::list_manual_fixes))
        // Progress stream
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
