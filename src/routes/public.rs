use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a session. `/session/route` accepts an
/// optional bearer token and treats a bad one as "no user" rather than
/// rejecting the request.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe.
        .route("/health", get(|| async { "ok" }))
        // POST /auth/signup
        // Provider account + verification e-mail + profile. Does not sign in.
        .route("/auth/signup", post(handlers::signup))
        // POST /auth/login
        // Password sign-in; refuses unverified e-mail.
        .route("/auth/login", post(handlers::login))
        .route("/auth/resend-verification", post(handlers::resend_verification))
        // GET/DELETE /session/route
        // Session router decision for the current auth state, and unsubscribe.
        .route(
            "/session/route",
            get(handlers::route_session).delete(handlers::unsubscribe_session),
        )
}
