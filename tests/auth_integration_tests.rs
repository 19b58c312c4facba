use axum::{
    extract::FromRequestParts,
    http::{Method, Request, StatusCode, Uri, header, request::Parts},
};
use campus_notices::{
    AppState, InMemoryRepository, MockIdentityProvider,
    auth::{AuthUser, Claims, MaybeSession},
    config::{AppConfig, Env},
    models::{Role, UserProfile},
    repository::Repository,
    session::SessionToken,
};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use std::{sync::Arc, time::SystemTime};
use uuid::Uuid;

// --- Helper Functions ---

const TEST_JWT_SECRET: &str = "test-secret-value-1234567890";
const TEST_USER_ID: Uuid = Uuid::from_u128(1);

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn create_token(user_id: Uuid, exp_offset: i64, session_id: Option<Uuid>, secret: &str) -> String {
    let now = now_secs();
    let claims = Claims {
        sub: user_id,
        iat: now as usize,
        exp: (now + exp_offset) as usize,
        session_id,
    };
    let key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), &claims, &key).unwrap()
}

async fn repo_with_profile(id: Uuid, role: Role) -> InMemoryRepository {
    let repo = InMemoryRepository::new();
    repo.create_profile(UserProfile {
        id,
        name: "Test User".to_string(),
        email: "test@campus.edu".to_string(),
        role,
        created_at: Utc::now(),
    })
    .await
    .unwrap();
    repo
}

fn create_app_state(env: Env, repo: InMemoryRepository) -> AppState {
    let config = AppConfig {
        env,
        jwt_secret: TEST_JWT_SECRET.to_string(),
        ..AppConfig::default()
    };
    AppState::new(Arc::new(repo), Arc::new(MockIdentityProvider::new()), config)
}

fn get_request_parts(method: Method, uri: Uri) -> Parts {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let (parts, _) = request.into_parts();
    parts
}

fn with_bearer(mut parts: Parts, token: &str) -> Parts {
    parts.headers.insert(
        header::AUTHORIZATION,
        header::HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    );
    parts
}

// --- AuthUser ---

#[tokio::test]
async fn test_auth_success_with_valid_jwt() {
    let session_id = Uuid::new_v4();
    let token = create_token(TEST_USER_ID, 3600, Some(session_id), TEST_JWT_SECRET);
    let app_state = create_app_state(Env::Production, repo_with_profile(TEST_USER_ID, Role::Faculty).await);

    let mut parts = with_bearer(get_request_parts(Method::GET, "/".parse().unwrap()), &token);
    let user = AuthUser::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap();

    assert_eq!(user.id, TEST_USER_ID);
    assert_eq!(user.role, Role::Faculty);
    let session = user.session.expect("bearer auth carries its session");
    assert_eq!(session.token, SessionToken::new(session_id.to_string()));
    assert_eq!(session.access_token, token);
    assert!(session.expires_at.is_some());
}

#[tokio::test]
async fn test_auth_failure_with_missing_header() {
    let app_state = create_app_state(Env::Production, InMemoryRepository::new());

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    let auth_user = AuthUser::from_request_parts(&mut parts, &app_state).await;

    assert_eq!(auth_user.unwrap_err(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_failure_with_expired_jwt() {
    // Well past the default 60s leeway.
    let token = create_token(TEST_USER_ID, -3600, None, TEST_JWT_SECRET);
    let app_state = create_app_state(Env::Production, repo_with_profile(TEST_USER_ID, Role::Student).await);

    let mut parts = with_bearer(get_request_parts(Method::GET, "/".parse().unwrap()), &token);
    let auth_user = AuthUser::from_request_parts(&mut parts, &app_state).await;

    assert_eq!(auth_user.unwrap_err(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_failure_with_foreign_signature() {
    let token = create_token(TEST_USER_ID, 3600, None, "some-other-projects-secret");
    let app_state = create_app_state(Env::Production, repo_with_profile(TEST_USER_ID, Role::Student).await);

    let mut parts = with_bearer(get_request_parts(Method::GET, "/".parse().unwrap()), &token);
    let auth_user = AuthUser::from_request_parts(&mut parts, &app_state).await;

    assert_eq!(auth_user.unwrap_err(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_failure_when_profile_missing() {
    let token = create_token(TEST_USER_ID, 3600, None, TEST_JWT_SECRET);
    let app_state = create_app_state(Env::Production, InMemoryRepository::new());

    let mut parts = with_bearer(get_request_parts(Method::GET, "/".parse().unwrap()), &token);
    let auth_user = AuthUser::from_request_parts(&mut parts, &app_state).await;

    assert_eq!(auth_user.unwrap_err(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_failure_when_store_is_down() {
    let token = create_token(TEST_USER_ID, 3600, None, TEST_JWT_SECRET);
    let app_state = create_app_state(Env::Production, InMemoryRepository::new_failing());

    let mut parts = with_bearer(get_request_parts(Method::GET, "/".parse().unwrap()), &token);
    let auth_user = AuthUser::from_request_parts(&mut parts, &app_state).await;

    assert_eq!(auth_user.unwrap_err(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_local_bypass_success() {
    let mock_user_id = Uuid::new_v4();
    let app_state = create_app_state(Env::Local, repo_with_profile(mock_user_id, Role::Admin).await);

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    parts.headers.insert(
        header::HeaderName::from_static("x-user-id"),
        header::HeaderValue::from_str(&mock_user_id.to_string()).unwrap(),
    );

    let user = AuthUser::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap();
    assert_eq!(user.id, mock_user_id);
    assert_eq!(user.role, Role::Admin);
    assert!(user.session.is_none());
}

#[tokio::test]
async fn test_local_bypass_disabled_in_prod() {
    let mock_user_id = Uuid::new_v4();
    let app_state = create_app_state(Env::Production, repo_with_profile(mock_user_id, Role::Admin).await);

    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    parts.headers.insert(
        header::HeaderName::from_static("x-user-id"),
        header::HeaderValue::from_str(&mock_user_id.to_string()).unwrap(),
    );

    let auth_user = AuthUser::from_request_parts(&mut parts, &app_state).await;
    assert_eq!(auth_user.unwrap_err(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_local_bypass_for_unknown_user_falls_back_to_bearer() {
    let app_state = create_app_state(Env::Local, repo_with_profile(TEST_USER_ID, Role::Student).await);
    let token = create_token(TEST_USER_ID, 3600, None, TEST_JWT_SECRET);

    let mut parts = with_bearer(get_request_parts(Method::GET, "/".parse().unwrap()), &token);
    parts.headers.insert(
        header::HeaderName::from_static("x-user-id"),
        header::HeaderValue::from_str(&Uuid::new_v4().to_string()).unwrap(),
    );

    let user = AuthUser::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap();
    assert_eq!(user.id, TEST_USER_ID);
    assert!(user.session.is_some());
}

// --- MaybeSession ---

#[tokio::test]
async fn test_maybe_session_without_token_is_none() {
    let app_state = create_app_state(Env::Production, InMemoryRepository::new());
    let mut parts = get_request_parts(Method::GET, "/session/route".parse().unwrap());

    let MaybeSession(session) = MaybeSession::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap();
    assert!(session.is_none());
}

#[tokio::test]
async fn test_maybe_session_treats_garbage_as_no_user() {
    let app_state = create_app_state(Env::Production, InMemoryRepository::new());
    let mut parts = with_bearer(
        get_request_parts(Method::GET, "/session/route".parse().unwrap()),
        "not-a-jwt",
    );

    let MaybeSession(session) = MaybeSession::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap();
    assert!(session.is_none());
}

#[tokio::test]
async fn test_maybe_session_derives_token_without_session_claim() {
    // No profile needed: the router decides what a session without a profile means.
    let app_state = create_app_state(Env::Production, InMemoryRepository::new());
    let token = create_token(TEST_USER_ID, 3600, None, TEST_JWT_SECRET);
    let mut parts = with_bearer(
        get_request_parts(Method::GET, "/session/route".parse().unwrap()),
        &token,
    );

    let MaybeSession(session) = MaybeSession::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap();
    let session = session.unwrap();
    assert_eq!(session.user_id, TEST_USER_ID);
    assert!(session.token.to_string().starts_with(&TEST_USER_ID.to_string()));
}
