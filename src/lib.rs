use axum::{
    extract::{FromRef, Request},
    http::HeaderName,
    Router,
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod config;
pub mod error;
pub mod feed;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod repository;
pub mod session;

// Public, authenticated and admin routers.
pub mod routes;
use routes::{admin, authenticated, public};
use auth::AuthUser;

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::AppError;
pub use feed::NoticeFeed;
pub use identity::{IdentityState, MockIdentityProvider, SupabaseIdentityClient};
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};
pub use session::SessionRouter;

/// ApiDoc
///
/// OpenAPI document for every handler, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::signup, handlers::login, handlers::resend_verification, handlers::logout,
        handlers::route_session, handlers::unsubscribe_session, handlers::get_me,
        handlers::get_user_name, handlers::list_notices, handlers::notice_categories,
        handlers::live_notices, handlers::get_notice, handlers::create_notice,
        handlers::update_notice, handlers::get_my_notices, handlers::get_pending_notices,
        handlers::approve_notice, handlers::reject_notice, handlers::get_admin_stats
    ),
    components(
        schemas(
            models::Role, models::NoticeStatus, models::Category, models::UserProfile,
            models::Notice, models::NoticeDraft, models::SignupRequest, models::LoginRequest,
            models::ResendVerificationRequest, models::LoginResponse,
            models::AdminDashboardStats, models::CategoryCount, models::UserName,
            session::RouteResponse, handlers::LiveScope,
        )
    ),
    tags(
        (name = "campus-notices", description = "Campus Notice Board API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single shared container for every service a handler can reach.
#[derive(Clone)]
pub struct AppState {
    /// Profile and notice store.
    pub repo: RepositoryState,
    /// External identity provider (accounts, sessions, e-mail verification).
    pub identity: IdentityState,
    /// Auth-state router and its per-session registry.
    pub sessions: SessionRouter,
    /// Fan-out of notice changes to live queries.
    pub feed: NoticeFeed,
    pub config: AppConfig,
}

impl AppState {
    /// Wires the session router to the same identity provider and store the handlers use.
    pub fn new(repo: RepositoryState, identity: IdentityState, config: AppConfig) -> Self {
        Self {
            sessions: SessionRouter::new(identity.clone(), repo.clone()),
            feed: NoticeFeed::new(),
            repo,
            identity,
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for IdentityState {
    fn from_ref(app_state: &AppState) -> IdentityState {
        app_state.identity.clone()
    }
}

impl FromRef<AppState> for SessionRouter {
    fn from_ref(app_state: &AppState) -> SessionRouter {
        app_state.sessions.clone()
    }
}

impl FromRef<AppState> for NoticeFeed {
    fn from_ref(app_state: &AppState) -> NoticeFeed {
        app_state.feed.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Rejects the request with 401 before it reaches a handler unless `AuthUser`
/// resolves (token valid and profile present).
async fn auth_middleware(
    _auth_user: AuthUser,
    request: Request,
    next: Next,
) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the routers, the auth layer and the observability stack.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes()
                .route_layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth_middleware
                ))
        )
        // Admin routes: authenticated here, role checked inside each handler.
        .nest(
            "/admin",
            admin::admin_routes()
                .route_layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth_middleware
                ))
        )
        .with_state(state);

    base_router
        .layer(
             ServiceBuilder::new()
                 .layer(SetRequestIdLayer::new(
                     x_request_id.clone(),
                     MakeRequestUuid,
                 ))
                 .layer(
                     TraceLayer::new_for_http()
                         .make_span_with(trace_span_logger)
                         .on_response(
                             DefaultOnResponse::new()
                                 .level(Level::INFO)
                                 .latency_unit(tower_http::LatencyUnit::Millis)
                         )
                 )
                 .layer(PropagateRequestIdLayer::new(x_request_id))
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for every request, carrying the `x-request-id` set by `SetRequestIdLayer`
/// so all log lines of one request correlate.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
