use crate::{
    AppState,
    auth::{self, AuthUser, MaybeSession},
    error::AppError,
    feed::NoticeChange,
    identity::{IdentityError, IdentityUser},
    models::{
        self, AdminDashboardStats, Category, CategoryCount, LoginRequest, LoginResponse, Notice,
        NoticeDraft, NoticeQuery, ResendVerificationRequest, Role, SignupRequest, UserName,
        UserProfile,
    },
    session::{AuthEvent, Destination, RouteContext, RouteResponse},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use chrono::Utc;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

// --- Filter Structs ---

/// NoticeFilter
///
/// Query parameters for the student feed (GET /notices).
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct NoticeFilter {
    /// Case-insensitive substring matched against title and content.
    pub search: Option<String>,
    /// Restricts the feed to one category.
    pub category: Option<String>,
}

/// LiveScope
///
/// Which of the three live queries a stream follows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LiveScope {
    #[default]
    Approved,
    Pending,
    Mine,
}

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct LiveFilter {
    #[serde(default)]
    pub scope: LiveScope,
}

/// LiveSnapshot
///
/// Payload of every `snapshot` event: the full query result, plus the change
/// that triggered it (absent on the first snapshot and after a lag).
#[derive(Debug, Serialize)]
pub struct LiveSnapshot {
    pub change: Option<NoticeChange>,
    pub notices: Vec<Notice>,
}

// --- Helpers ---

fn require_admin(role: Role) -> Result<(), AppError> {
    if role != Role::Admin {
        return Err(AppError::admin_only());
    }
    Ok(())
}

fn require_submitter(role: Role) -> Result<(), AppError> {
    if !role.can_submit_notices() {
        return Err(AppError::Forbidden(
            "Only faculty and admins can submit notices.".to_string(),
        ));
    }
    Ok(())
}

fn no_longer_pending() -> AppError {
    AppError::Conflict("This notice is no longer pending.".to_string())
}

/// Loads a notice an admin is about to moderate: 404 if missing, 409 if already decided.
async fn load_pending(state: &AppState, id: Uuid) -> Result<Notice, AppError> {
    let notice = state
        .repo
        .get_notice(id)
        .await?
        .ok_or_else(AppError::notice_not_found)?;
    if !notice.is_pending() {
        return Err(no_longer_pending());
    }
    Ok(notice)
}

/// An earlier signup can create the provider account and then fail to write
/// the profile. If the supplied credentials open such an account, returns its
/// user so signup can finish; any other outcome leaves the e-mail taken.
async fn account_without_profile(
    state: &AppState,
    email: &str,
    password: &str,
) -> Result<Option<IdentityUser>, AppError> {
    let session = match state.identity.sign_in(email, password).await {
        Ok(session) => session,
        Err(e) => {
            tracing::debug!("existing account did not accept signup credentials: {}", e);
            return Ok(None);
        }
    };
    let profile = state.repo.get_profile(session.user.id).await;
    if let Err(e) = state.identity.sign_out(&session.access_token).await {
        tracing::warn!(user_id = %session.user.id, "sign-out after signup check failed: {}", e);
    }
    Ok(match profile? {
        Some(_) => None,
        None => Some(session.user),
    })
}

// --- Auth Handlers ---

/// signup
///
/// [Public Route] Creates the identity-provider account, sends the
/// verification e-mail and writes the profile. The caller is not signed in
/// afterwards; they have to verify and log in. Retrying with the same
/// credentials finishes a signup whose profile write failed.
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created, verification e-mail sent", body = UserProfile),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "E-mail already registered")
    )
)]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<UserProfile>), AppError> {
    payload.validate()?;
    let email = payload.email.trim();

    let (user_id, send_verification) = match state.identity.sign_up(email, &payload.password).await {
        Ok(outcome) => (outcome.user.id, !outcome.verification_sent),
        Err(IdentityError::EmailAlreadyInUse) => {
            let Some(user) = account_without_profile(&state, email, &payload.password).await? else {
                return Err(IdentityError::EmailAlreadyInUse.into());
            };
            tracing::info!(user_id = %user.id, "completing signup for account without a profile");
            (user.id, !user.email_verified)
        }
        Err(e) => return Err(e.into()),
    };
    if send_verification {
        state.identity.send_verification_email(email).await?;
    }

    let profile = state
        .repo
        .create_profile(UserProfile {
            id: user_id,
            name: payload.name.trim().to_string(),
            email: email.to_string(),
            role: payload.role,
            created_at: Utc::now(),
        })
        .await?;

    tracing::info!(user_id = %profile.id, role = %profile.role, "account created, awaiting verification");
    Ok((StatusCode::CREATED, Json(profile)))
}

/// login
///
/// [Public Route] Password sign-in. Unverified accounts are signed straight
/// back out; verified ones get their tokens and the dashboard for their role.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = LoginResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "E-mail not verified"),
        (status = 404, description = "Profile missing")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let email = payload.email.trim();
    if email.is_empty() || payload.password.is_empty() {
        return Err(AppError::Validation("Please fill in all fields".to_string()));
    }

    let session = state.identity.sign_in(email, &payload.password).await?;
    let user = state.identity.reload_user(&session.access_token).await?;

    if !user.email_verified {
        tracing::info!(user_id = %user.id, "login refused, e-mail not verified");
        if let Err(e) = state.identity.sign_out(&session.access_token).await {
            tracing::warn!(user_id = %user.id, "sign-out after refused login failed: {}", e);
        }
        return Err(IdentityError::EmailNotVerified.into());
    }

    let Some(profile) = state.repo.get_profile(user.id).await? else {
        tracing::warn!(user_id = %user.id, "verified user has no profile");
        if let Err(e) = state.identity.sign_out(&session.access_token).await {
            tracing::warn!(user_id = %user.id, "sign-out after missing profile failed: {}", e);
        }
        return Err(AppError::profile_not_found());
    };

    // The dashboard below is this session's first route.
    if let Ok(active) = auth::decode_session(&session.access_token, &state.config.jwt_secret) {
        state.sessions.registry().claim_first_route(&active);
    }

    Ok(Json(LoginResponse {
        access_token: session.access_token,
        refresh_token: session.refresh_token,
        expires_in: session.expires_in,
        role: profile.role,
        email_verified: user.email_verified,
        navigate_to: Destination::for_role(profile.role).path().to_string(),
    }))
}

/// resend_verification
///
/// [Public Route] Asks the identity provider to send the verification e-mail again.
#[utoipa::path(
    post,
    path = "/auth/resend-verification",
    request_body = ResendVerificationRequest,
    responses((status = 204, description = "Sent"))
)]
pub async fn resend_verification(
    State(state): State<AppState>,
    Json(payload): Json<ResendVerificationRequest>,
) -> Result<StatusCode, AppError> {
    let email = payload.email.trim();
    if email.is_empty() {
        return Err(AppError::Validation("Please enter your email".to_string()));
    }
    state.identity.send_verification_email(email).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// logout
///
/// [Authenticated Route] Ends the provider session and forgets its routing state.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Signed out"))
)]
pub async fn logout(
    AuthUser { id, session, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    if let Some(session) = session {
        state.sessions.sign_out(&session).await?;
    }
    tracing::info!(user_id = %id, "signed out");
    Ok(StatusCode::NO_CONTENT)
}

// --- Session Routing ---

/// route_session
///
/// [Public Route] Runs the session router for the caller's current auth
/// state. A missing or invalid bearer token counts as "no user".
#[utoipa::path(
    get,
    path = "/session/route",
    params(RouteContext),
    responses((status = 200, description = "Routing decision", body = RouteResponse))
)]
pub async fn route_session(
    State(state): State<AppState>,
    MaybeSession(session): MaybeSession,
    Query(ctx): Query<RouteContext>,
) -> Json<RouteResponse> {
    let outcome = state.sessions.handle(AuthEvent { session }, &ctx).await;
    Json(outcome.into())
}

/// unsubscribe_session
///
/// [Public Route] The client stopped listening for auth changes; its next
/// routing call on the same session navigates again.
#[utoipa::path(
    delete,
    path = "/session/route",
    responses((status = 204, description = "Unsubscribed"))
)]
pub async fn unsubscribe_session(
    State(state): State<AppState>,
    MaybeSession(session): MaybeSession,
) -> StatusCode {
    if let Some(session) = session {
        state.sessions.unsubscribe(&session.token);
    }
    StatusCode::NO_CONTENT
}

// --- Profiles ---

/// get_me
///
/// [Authenticated Route] The caller's profile.
#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Profile", body = UserProfile),
        (status = 404, description = "Profile missing")
    )
)]
pub async fn get_me(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<UserProfile>, AppError> {
    let profile = state
        .repo
        .get_profile(id)
        .await?
        .ok_or_else(AppError::profile_not_found)?;
    Ok(Json(profile))
}

/// get_user_name
///
/// [Authenticated Route] Display name for a notice's creator.
#[utoipa::path(
    get,
    path = "/users/{id}/name",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Name", body = UserName),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn get_user_name(
    _user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserName>, AppError> {
    let profile = state
        .repo
        .get_profile(id)
        .await?
        .ok_or_else(AppError::profile_not_found)?;
    Ok(Json(UserName {
        id: profile.id,
        name: profile.name,
    }))
}

// --- Notices ---

/// list_notices
///
/// [Authenticated Route] The student feed: approved notices, newest first,
/// optionally narrowed by a search term and a category.
#[utoipa::path(
    get,
    path = "/notices",
    params(NoticeFilter),
    responses(
        (status = 200, description = "Approved notices", body = [Notice]),
        (status = 400, description = "Unknown category")
    )
)]
pub async fn list_notices(
    _user: AuthUser,
    State(state): State<AppState>,
    Query(filter): Query<NoticeFilter>,
) -> Result<Json<Vec<Notice>>, AppError> {
    let category = filter
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::parse::<Category>)
        .transpose()?;
    let needle = filter
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let notices = state
        .repo
        .list_notices(NoticeQuery::Approved)
        .await?
        .into_iter()
        .filter(|n| category.is_none_or(|c| n.category == c))
        .filter(|n| {
            needle.as_deref().is_none_or(|needle| {
                n.title.to_lowercase().contains(needle) || n.content.to_lowercase().contains(needle)
            })
        })
        .collect();
    Ok(Json(notices))
}

/// notice_categories
///
/// [Authenticated Route] Approved notice counts for every category.
#[utoipa::path(
    get,
    path = "/notices/categories",
    responses((status = 200, description = "Counts", body = [CategoryCount]))
)]
pub async fn notice_categories(
    _user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<CategoryCount>>, AppError> {
    let approved = state.repo.list_notices(NoticeQuery::Approved).await?;
    Ok(Json(models::count_by_category(&approved)))
}

/// live_notices
///
/// [Authenticated Route] Server-sent events for one of the live queries. A
/// `snapshot` event carries the complete result on subscribe and again after
/// every notice change.
#[utoipa::path(
    get,
    path = "/notices/live",
    params(LiveFilter),
    responses(
        (status = 200, description = "text/event-stream of snapshot events"),
        (status = 403, description = "Scope not allowed for this role")
    )
)]
pub async fn live_notices(
    AuthUser { id, role, .. }: AuthUser,
    State(state): State<AppState>,
    Query(filter): Query<LiveFilter>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let query = match filter.scope {
        LiveScope::Approved => NoticeQuery::Approved,
        LiveScope::Pending => {
            require_admin(role)?;
            NoticeQuery::Pending
        }
        LiveScope::Mine => {
            require_submitter(role)?;
            NoticeQuery::CreatedBy(id)
        }
    };

    let repo = state.repo.clone();
    // Subscribe before the first snapshot so no change falls in between.
    let mut changes = state.feed.subscribe();
    tracing::debug!(user_id = %id, ?query, "live query subscribed");

    let stream = async_stream::stream! {
        let mut change = None;
        loop {
            match repo.list_notices(query).await {
                Ok(notices) => {
                    match Event::default().event("snapshot").json_data(LiveSnapshot { change, notices }) {
                        Ok(event) => yield Ok::<Event, Infallible>(event),
                        Err(e) => {
                            tracing::error!("failed to encode snapshot: {}", e);
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(?query, "live query failed: {}", e);
                    yield Ok(Event::default().event("error").data("Something went wrong. Please try again."));
                    break;
                }
            }

            change = match changes.recv().await {
                Ok(next) => Some(next),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "live query lagged, resending full snapshot");
                    None
                }
                Err(RecvError::Closed) => break,
            };
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// get_notice
///
/// [Authenticated Route] Notice detail. Pending notices are only visible to
/// their creator and to admins; anyone else gets 404.
#[utoipa::path(
    get,
    path = "/notices/{id}",
    params(("id" = Uuid, Path, description = "Notice ID")),
    responses(
        (status = 200, description = "Found", body = Notice),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_notice(
    AuthUser { id: user_id, role, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Notice>, AppError> {
    match state.repo.get_notice(id).await? {
        Some(notice) if notice.is_visible_to(user_id, role) => Ok(Json(notice)),
        _ => Err(AppError::notice_not_found()),
    }
}

/// create_notice
///
/// [Authenticated Route] Submits a notice for review. Faculty and admins
/// only; the notice always starts pending.
#[utoipa::path(
    post,
    path = "/notices",
    request_body = NoticeDraft,
    responses(
        (status = 201, description = "Submitted for review", body = Notice),
        (status = 400, description = "Missing field or unknown category"),
        (status = 403, description = "Students cannot submit")
    )
)]
pub async fn create_notice(
    AuthUser { id, role, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<NoticeDraft>,
) -> Result<(StatusCode, Json<Notice>), AppError> {
    require_submitter(role)?;
    let fields = payload.validate()?;

    let notice = state.repo.create_notice(fields, id, role).await?;
    state.feed.publish(NoticeChange::Submitted(notice.id));
    tracing::info!(notice_id = %notice.id, created_by = %id, "notice submitted for approval");
    Ok((StatusCode::CREATED, Json(notice)))
}

/// update_notice
///
/// [Authenticated Route] Edits a notice. Only the creator may edit, and only
/// while the notice is pending; it stays pending.
#[utoipa::path(
    put,
    path = "/notices/{id}",
    params(("id" = Uuid, Path, description = "Notice ID")),
    request_body = NoticeDraft,
    responses(
        (status = 200, description = "Updated", body = Notice),
        (status = 403, description = "Not the creator, or no longer pending"),
        (status = 404, description = "Not found")
    )
)]
pub async fn update_notice(
    AuthUser { id: user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<NoticeDraft>,
) -> Result<Json<Notice>, AppError> {
    let existing = state
        .repo
        .get_notice(id)
        .await?
        .ok_or_else(AppError::notice_not_found)?;
    existing.check_editable_by(user_id)?;
    let fields = payload.validate()?;

    // The store re-checks owner and status, so a concurrent approval wins.
    let updated = state
        .repo
        .update_pending_notice(id, user_id, fields)
        .await?
        .ok_or_else(|| AppError::Forbidden("Only pending notices can be edited.".to_string()))?;

    state.feed.publish(NoticeChange::Edited(id));
    tracing::info!(notice_id = %id, "notice edited");
    Ok(Json(updated))
}

/// get_my_notices
///
/// [Authenticated Route] Everything the caller has submitted, any status, newest first.
#[utoipa::path(
    get,
    path = "/me/notices",
    responses((status = 200, description = "My notices", body = [Notice]))
)]
pub async fn get_my_notices(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Notice>>, AppError> {
    Ok(Json(state.repo.list_notices(NoticeQuery::CreatedBy(id)).await?))
}

// --- Admin ---

/// get_pending_notices
///
/// [Admin Route] The moderation queue, newest first.
#[utoipa::path(
    get,
    path = "/admin/notices/pending",
    responses(
        (status = 200, description = "Pending notices", body = [Notice]),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn get_pending_notices(
    AuthUser { role, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Notice>>, AppError> {
    require_admin(role)?;
    Ok(Json(state.repo.list_notices(NoticeQuery::Pending).await?))
}

/// approve_notice
///
/// [Admin Route] Publishes a pending notice to students.
#[utoipa::path(
    put,
    path = "/admin/notices/{id}/approve",
    params(("id" = Uuid, Path, description = "Notice ID")),
    responses(
        (status = 200, description = "Approved", body = Notice),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Already approved")
    )
)]
pub async fn approve_notice(
    AuthUser { id: admin_id, role, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Notice>, AppError> {
    require_admin(role)?;
    load_pending(&state, id).await?;

    let approved = state
        .repo
        .approve_notice(id, admin_id, Utc::now())
        .await?
        .ok_or_else(no_longer_pending)?;

    state.feed.publish(NoticeChange::Approved(id));
    tracing::info!(notice_id = %id, approved_by = %admin_id, "notice approved");
    Ok(Json(approved))
}

/// reject_notice
///
/// [Admin Route] Rejects a pending notice. Rejection is a hard delete: the
/// notice disappears from every query.
#[utoipa::path(
    delete,
    path = "/admin/notices/{id}",
    params(("id" = Uuid, Path, description = "Notice ID")),
    responses(
        (status = 204, description = "Rejected and deleted"),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Already approved")
    )
)]
pub async fn reject_notice(
    AuthUser { id: admin_id, role, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    require_admin(role)?;
    load_pending(&state, id).await?;

    if !state.repo.delete_pending_notice(id).await? {
        return Err(no_longer_pending());
    }

    state.feed.publish(NoticeChange::Rejected(id));
    tracing::info!(notice_id = %id, rejected_by = %admin_id, "notice rejected and deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// get_admin_stats
///
/// [Admin Route] Dashboard totals.
#[utoipa::path(
    get,
    path = "/admin/stats",
    responses(
        (status = 200, description = "Stats", body = AdminDashboardStats),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn get_admin_stats(
    AuthUser { role, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<AdminDashboardStats>, AppError> {
    require_admin(role)?;
    Ok(Json(state.repo.get_stats().await?))
}
