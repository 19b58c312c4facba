use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{identity::IdentityState, models::Role, repository::RepositoryState};

/// Destination
///
/// The screens the router can send a client to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Login,
    StudentHome,
    FacultyDashboard,
    AdminDashboard,
}

impl Destination {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Student => Destination::StudentHome,
            Role::Faculty => Destination::FacultyDashboard,
            Role::Admin => Destination::AdminDashboard,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Destination::Login => "/login",
            Destination::StudentHome => "/student-home",
            Destination::FacultyDashboard => "/faculty-dashboard",
            Destination::AdminDashboard => "/admin-dashboard",
        }
    }
}

/// SessionToken
///
/// Identifies one sign-in session. Taken from the JWT `session_id` claim when
/// the provider sets it, otherwise derived from the subject and issue time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        SessionToken(value.into())
    }

    pub fn derived(user_id: Uuid, issued_at: usize) -> Self {
        SessionToken(format!("{}:{}", user_id, issued_at))
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ActiveSession
///
/// A session the identity provider currently considers signed in.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub token: SessionToken,
    pub user_id: Uuid,
    /// Bearer token used for the reload and sign-out calls.
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// AuthEvent
///
/// One auth-state notification. `session: None` means the provider reports no user.
#[derive(Debug, Clone, Default)]
pub struct AuthEvent {
    pub session: Option<ActiveSession>,
}

/// RouteContext
///
/// Request-scoped facts about the client, passed into every classification.
#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RouteContext {
    /// First path segment of the screen the client is showing, e.g. "login".
    #[serde(default, rename = "screen")]
    pub current_screen: Option<String>,
    /// Set by the client between account creation and profile creation.
    #[serde(default)]
    pub signup_in_progress: bool,
}

impl RouteContext {
    fn is_on(&self, screen: &str) -> bool {
        self.current_screen
            .as_deref()
            .map(|s| s.trim_start_matches('/'))
            == Some(screen)
    }

    fn on_login(&self) -> bool {
        self.is_on("login")
    }

    fn on_auth_screen(&self) -> bool {
        self.is_on("login") || self.is_on("signup")
    }
}

/// SessionState
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    PendingVerification,
    Routed(Role),
}

/// RouteOutcome
///
/// The router's verdict for one event. `navigate_to: None` means "stay where you are".
#[derive(Debug, Clone, PartialEq)]
pub struct RouteOutcome {
    pub state: SessionState,
    pub navigate_to: Option<Destination>,
    pub signed_out: bool,
}

impl RouteOutcome {
    fn unauthenticated(navigate_to: Option<Destination>, signed_out: bool) -> Self {
        RouteOutcome {
            state: SessionState::Unauthenticated,
            navigate_to,
            signed_out,
        }
    }
}

/// RouteResponse
///
/// Wire form of a `RouteOutcome` (GET /session/route).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct RouteResponse {
    /// "unauthenticated" | "pending_verification" | "routed"
    pub state: String,
    pub role: Option<Role>,
    pub navigate_to: Option<String>,
    pub signed_out: bool,
}

impl From<RouteOutcome> for RouteResponse {
    fn from(outcome: RouteOutcome) -> Self {
        let (state, role) = match outcome.state {
            SessionState::Unauthenticated => ("unauthenticated", None),
            SessionState::PendingVerification => ("pending_verification", None),
            SessionState::Routed(role) => ("routed", Some(role)),
        };
        RouteResponse {
            state: state.to_string(),
            role,
            navigate_to: outcome.navigate_to.map(|d| d.path().to_string()),
            signed_out: outcome.signed_out,
        }
    }
}

#[derive(Debug, Clone)]
struct SessionEntry {
    has_routed: bool,
    expires_at: Option<DateTime<Utc>>,
}

/// SessionRegistry
///
/// The `has_routed` flag of every live session, keyed by session token. A
/// token seen for the first time starts unrouted.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: DashMap<SessionToken, SessionEntry>,
    claims: AtomicUsize,
}

/// Expired entries are swept on every this-many claims.
pub const PRUNE_EVERY: usize = 64;

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the session as routed. Returns true only for the first caller.
    pub fn claim_first_route(&self, session: &ActiveSession) -> bool {
        if self.claims.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == 0 {
            self.prune_expired(Utc::now());
        }
        let mut entry = self
            .entries
            .entry(session.token.clone())
            .or_insert_with(|| SessionEntry {
                has_routed: false,
                expires_at: session.expires_at,
            });
        if entry.has_routed {
            false
        } else {
            entry.has_routed = true;
            true
        }
    }

    pub fn has_routed(&self, token: &SessionToken) -> bool {
        self.entries.get(token).is_some_and(|e| e.has_routed)
    }

    /// Unsubscribe: the next event on this session routes again.
    pub fn reset(&self, token: &SessionToken) {
        if let Some(mut entry) = self.entries.get_mut(token) {
            entry.has_routed = false;
        }
    }

    pub fn forget(&self, token: &SessionToken) {
        self.entries.remove(token);
    }

    pub fn prune_expired(&self, now: DateTime<Utc>) {
        self.entries
            .retain(|_, entry| entry.expires_at.is_none_or(|at| at > now));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// SessionRouter
///
/// Classifies a session on every auth event and maps it to a destination:
///
/// 1. no session: `Login`, unless the client is already on login or signup;
/// 2. signup in progress: `PendingVerification`, no navigation;
/// 3. email not verified (fresh from the provider): sign out, `Login`;
/// 4. verified: read the role, route to its dashboard once per session.
///
/// Any failure while reloading the user or reading the role signs the session
/// out and routes to `Login`.
#[derive(Clone)]
pub struct SessionRouter {
    identity: IdentityState,
    repo: RepositoryState,
    registry: Arc<SessionRegistry>,
}

impl SessionRouter {
    pub fn new(identity: IdentityState, repo: RepositoryState) -> Self {
        Self {
            identity,
            repo,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub async fn handle(&self, event: AuthEvent, ctx: &RouteContext) -> RouteOutcome {
        let Some(session) = event.session else {
            let navigate_to = (!ctx.on_auth_screen()).then_some(Destination::Login);
            return RouteOutcome::unauthenticated(navigate_to, false);
        };

        if ctx.signup_in_progress {
            tracing::debug!(session = %session.token, "signup in progress, routing suppressed");
            return RouteOutcome {
                state: SessionState::PendingVerification,
                navigate_to: None,
                signed_out: false,
            };
        }

        let user = match self.identity.reload_user(&session.access_token).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(user_id = %session.user_id, "reload failed, signing out: {}", e);
                return self.fail_closed(&session).await;
            }
        };

        if !user.email_verified {
            tracing::info!(user_id = %user.id, "email not verified, forcing sign-out");
            self.end_session(&session).await;
            let navigate_to = (!ctx.on_login()).then_some(Destination::Login);
            return RouteOutcome::unauthenticated(navigate_to, true);
        }

        let role = match self.repo.get_profile(user.id).await {
            Ok(Some(profile)) => profile.role,
            Ok(None) => {
                tracing::warn!(user_id = %user.id, "no profile for verified user, signing out");
                return self.fail_closed(&session).await;
            }
            Err(e) => {
                tracing::warn!(user_id = %user.id, "profile lookup failed, signing out: {}", e);
                return self.fail_closed(&session).await;
            }
        };

        let navigate_to = if self.registry.claim_first_route(&session) {
            let destination = Destination::for_role(role);
            tracing::info!(user_id = %user.id, role = %role, "routing session to {}", destination.path());
            Some(destination)
        } else {
            None
        };

        RouteOutcome {
            state: SessionState::Routed(role),
            navigate_to,
            signed_out: false,
        }
    }

    /// route_events
    ///
    /// Processes a client's auth-state stream one event at a time: each
    /// classification finishes before the next event is looked at.
    pub fn route_events<S>(&self, events: S) -> impl Stream<Item = RouteOutcome> + Send + 'static
    where
        S: Stream<Item = (AuthEvent, RouteContext)> + Send + 'static,
    {
        let router = self.clone();
        events.then(move |(event, ctx)| {
            let router = router.clone();
            async move { router.handle(event, &ctx).await }
        })
    }

    /// The client stopped listening; the next event on this session routes again.
    pub fn unsubscribe(&self, token: &SessionToken) {
        self.registry.reset(token);
    }

    /// Explicit sign-out requested by the user.
    pub async fn sign_out(&self, session: &ActiveSession) -> Result<(), crate::identity::IdentityError> {
        self.registry.forget(&session.token);
        self.identity.sign_out(&session.access_token).await
    }

    async fn fail_closed(&self, session: &ActiveSession) -> RouteOutcome {
        self.end_session(session).await;
        RouteOutcome::unauthenticated(Some(Destination::Login), true)
    }

    async fn end_session(&self, session: &ActiveSession) {
        self.registry.forget(&session.token);
        if let Err(e) = self.identity.sign_out(&session.access_token).await {
            // The session is treated as ended either way.
            tracing::warn!(user_id = %session.user_id, "sign-out call failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(token: &str, expires_at: Option<DateTime<Utc>>) -> ActiveSession {
        ActiveSession {
            token: SessionToken::new(token),
            user_id: Uuid::new_v4(),
            access_token: format!("access-{}", token),
            expires_at,
        }
    }

    #[test]
    fn registry_claims_once_per_session() {
        let registry = SessionRegistry::new();
        let s = session("a", None);
        assert!(registry.claim_first_route(&s));
        assert!(!registry.claim_first_route(&s));
        assert!(registry.has_routed(&s.token));
    }

    #[test]
    fn registry_reset_allows_another_route() {
        let registry = SessionRegistry::new();
        let s = session("a", None);
        registry.claim_first_route(&s);
        registry.reset(&s.token);
        assert!(registry.claim_first_route(&s));
    }

    #[test]
    fn new_session_token_starts_unrouted() {
        let registry = SessionRegistry::new();
        registry.claim_first_route(&session("old", None));
        assert!(registry.claim_first_route(&session("new", None)));
    }

    #[test]
    fn expired_entries_are_pruned() {
        let registry = SessionRegistry::new();
        let past = Utc::now() - chrono::Duration::minutes(5);
        let future = Utc::now() + chrono::Duration::minutes(5);
        registry.claim_first_route(&session("stale", Some(past)));
        registry.claim_first_route(&session("live", Some(future)));

        registry.prune_expired(Utc::now());
        assert_eq!(registry.len(), 1);
        assert!(registry.has_routed(&SessionToken::new("live")));
    }

    #[test]
    fn claims_sweep_expired_entries_periodically() {
        let registry = SessionRegistry::new();
        let past = Utc::now() - chrono::Duration::minutes(5);
        registry.claim_first_route(&session("stale", Some(past)));

        for i in 1..PRUNE_EVERY {
            registry.claim_first_route(&session(&format!("live-{}", i), None));
        }
        assert_eq!(registry.len(), PRUNE_EVERY);
        assert!(registry.has_routed(&SessionToken::new("stale")));

        registry.claim_first_route(&session("sweeper", None));
        assert_eq!(registry.len(), PRUNE_EVERY);
        assert!(!registry.has_routed(&SessionToken::new("stale")));
    }

    #[test]
    fn context_matches_screen_with_or_without_slash() {
        let ctx = RouteContext {
            current_screen: Some("/signup".to_string()),
            signup_in_progress: false,
        };
        assert!(ctx.on_auth_screen());
        assert!(!ctx.on_login());
    }

    #[test]
    fn destinations_follow_role() {
        assert_eq!(Destination::for_role(Role::Student).path(), "/student-home");
        assert_eq!(Destination::for_role(Role::Faculty).path(), "/faculty-dashboard");
        assert_eq!(Destination::for_role(Role::Admin).path(), "/admin-dashboard");
    }
}
