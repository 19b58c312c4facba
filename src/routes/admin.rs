use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, put},
};

/// Admin Router Module
///
/// The moderation queue. Nested under `/admin` behind the auth layer; every
/// handler additionally requires `role == admin` and answers 403 otherwise.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/stats
        // Totals of users, pending notices and approved notices.
        .route("/stats", get(handlers::get_admin_stats))
        // GET /admin/notices/pending
        .route("/notices/pending", get(handlers::get_pending_notices))
        // PUT /admin/notices/{id}/approve
        // pending → approved, stamping approved_by and approved_at.
        .route("/notices/{id}/approve", put(handlers::approve_notice))
        // DELETE /admin/notices/{id}
        // Rejection: the pending notice is deleted outright.
        .route("/notices/{id}", delete(handlers::reject_notice))
}
