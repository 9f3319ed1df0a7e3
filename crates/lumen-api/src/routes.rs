//! Router setup with all routes and middleware.

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{admin, auth, session};

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ws", get(session::ws_handler));

    let admin_routes = Router::new()
        .route("/admin/prompt", get(admin::get_prompt).post(admin::set_prompt))
        .route(
            "/admin/documents",
            get(admin::list_documents).post(admin::upload_document),
        )
        .route("/admin/documents/{name}", delete(admin::delete_document))
        .route("/admin/reload", post(admin::reload))
        .route("/admin/conversations", get(admin::list_conversations))
        .route(
            "/admin/conversations/{id}/download",
            get(admin::download_conversation),
        )
        .route(
            "/admin/conversations/{id}",
            delete(admin::delete_conversation),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin,
        ));

    public_routes
        .merge(admin_routes)
        .layer(DefaultBodyLimit::max(16 * 1024 * 1024)) // uploads
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `GET /health` / `GET /healthz`
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
