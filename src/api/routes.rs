//! API Routes
//!
//! Configures the Axum router with all admin endpoints.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    check_quota_handler, clear_handler, delete_handler, get_handler, health_handler,
    keys_handler, quota_handler, reset_quota_handler, set_handler, stats_handler,
    sweep_all_handler, sweep_handler, AppState,
};

/// Creates the admin router.
///
/// # Endpoints
/// - `PUT|GET|DELETE /cache/:namespace/:key` - Entry access
/// - `GET|DELETE /cache/:namespace` - List keys / clear namespace
/// - `POST /sweep/:namespace` - Sweep one namespace now
/// - `POST /sweep` - Sweep every namespace now
/// - `POST|GET /quota/:op_type/:actor` - Count a call / inspect budget
/// - `DELETE /quota/:actor` - Reset an actor's buckets
/// - `GET /stats`, `GET /health`
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/cache/:namespace/:key",
            put(set_handler).get(get_handler).delete(delete_handler),
        )
        .route("/cache/:namespace", get(keys_handler).delete(clear_handler))
        .route("/sweep", post(sweep_all_handler))
        .route("/sweep/:namespace", post(sweep_handler))
        .route(
            "/quota/:op_type/:actor",
            post(check_quota_handler).get(quota_handler),
        )
        .route("/quota/:actor", delete(reset_quota_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
