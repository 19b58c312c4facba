use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Routes for any signed-in user. Role restrictions (faculty/admin for
/// submitting, creator-only for editing) are enforced inside the handlers
/// using the resolved `AuthUser`.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        .route("/auth/logout", post(handlers::logout))
        // GET /me
        // The caller's profile.
        .route("/me", get(handlers::get_me))
        // GET /me/notices
        // The caller's own notices, any status.
        .route("/me/notices", get(handlers::get_my_notices))
        // GET /users/{id}/name
        // Creator display name for notice cards.
        .route("/users/{id}/name", get(handlers::get_user_name))
        // GET/POST /notices
        // Student feed (approved only) and submission (faculty/admin, starts pending).
        .route(
            "/notices",
            get(handlers::list_notices).post(handlers::create_notice),
        )
        .route("/notices/categories", get(handlers::notice_categories))
        // GET /notices/live?scope=approved|pending|mine
        // SSE stream of snapshots, re-sent after every notice change.
        .route("/notices/live", get(handlers::live_notices))
        // GET/PUT /notices/{id}
        // Detail, and creator-only edit while pending.
        .route(
            "/notices/{id}",
            get(handlers::get_notice).put(handlers::update_notice),
        )
}
