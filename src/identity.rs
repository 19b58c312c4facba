use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use parking_lot::Mutex;
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc};
use uuid::Uuid;

use crate::auth::Claims;

/// IdentityUser
///
/// What the identity provider knows about a user. `email_verified` is owned by
/// the provider; this application only ever reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityUser {
    pub id: Uuid,
    pub email: String,
    pub email_verified: bool,
}

/// SignedInSession
///
/// The result of a password sign-in: the bearer token the client sends on
/// every request, plus the user as of sign-in time.
#[derive(Debug, Clone)]
pub struct SignedInSession {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub user: IdentityUser,
}

/// SignUpOutcome
///
/// Some providers send the verification e-mail as part of signup; when
/// `verification_sent` is false the caller must request it explicitly.
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user: IdentityUser,
    pub verification_sent: bool,
}

/// IdentityError
///
/// Provider failures, already classified into the cases the client shows
/// distinct messages for.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("This email is already registered. Please login instead.")]
    EmailAlreadyInUse,
    #[error("Invalid email address format.")]
    InvalidEmail,
    #[error("Password is too weak. Please use a stronger password.")]
    WeakPassword,
    #[error("Invalid email or password.")]
    InvalidCredentials,
    #[error("Please verify your email before logging in")]
    EmailNotVerified,
    #[error("Your session has expired. Please sign in again.")]
    SessionExpired,
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("Could not reach the authentication service.")]
    Transport(#[from] reqwest::Error),
}

impl IdentityError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IdentityError::EmailAlreadyInUse => StatusCode::CONFLICT,
            IdentityError::InvalidEmail | IdentityError::WeakPassword => StatusCode::BAD_REQUEST,
            IdentityError::InvalidCredentials | IdentityError::SessionExpired => {
                StatusCode::UNAUTHORIZED
            }
            IdentityError::EmailNotVerified => StatusCode::FORBIDDEN,
            IdentityError::Rejected { status, .. } if (400..500).contains(status) => {
                StatusCode::BAD_REQUEST
            }
            IdentityError::Rejected { .. } | IdentityError::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

// 1. IdentityProvider Contract
/// IdentityProvider
///
/// The calls this application makes into the external identity service. The
/// auth-state subscription of a client is modeled separately, as the stream of
/// `AuthEvent`s fed to the session router.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Creates the credential record. The user is not signed in afterwards.
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, IdentityError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<SignedInSession, IdentityError>;

    /// Invalidates the session behind `access_token`.
    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError>;

    /// Fetches the current user for a session, including a fresh
    /// `email_verified` flag.
    async fn reload_user(&self, access_token: &str) -> Result<IdentityUser, IdentityError>;

    async fn send_verification_email(&self, email: &str) -> Result<(), IdentityError>;
}

/// IdentityState
///
/// The concrete type used to share the identity provider across the application state.
pub type IdentityState = Arc<dyn IdentityProvider>;

// 2. The Real Implementation (Supabase Auth / GoTrue)
/// SupabaseIdentityClient
///
/// Talks to the GoTrue REST API under `{project_url}/auth/v1`. Every request
/// carries the project's anon key in the `apikey` header; session-bound calls
/// add the user's bearer token.
#[derive(Clone)]
pub struct SupabaseIdentityClient {
    http: reqwest::Client,
    auth_url: String,
    anon_key: String,
}

#[derive(Deserialize)]
struct GoTrueUser {
    id: Uuid,
    email: Option<String>,
    email_confirmed_at: Option<DateTime<Utc>>,
    confirmation_sent_at: Option<DateTime<Utc>>,
    // Empty on the placeholder user GoTrue returns for an already confirmed address.
    #[serde(default)]
    identities: Option<Vec<serde_json::Value>>,
}

impl From<GoTrueUser> for IdentityUser {
    fn from(user: GoTrueUser) -> Self {
        IdentityUser {
            id: user.id,
            email: user.email.unwrap_or_default(),
            email_verified: user.email_confirmed_at.is_some(),
        }
    }
}

#[derive(Deserialize)]
struct GoTrueSession {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    user: GoTrueUser,
}

// With e-mail confirmation enabled GoTrue answers signup with the bare user;
// with autoconfirm it answers with a full session.
#[derive(Deserialize)]
#[serde(untagged)]
enum SignUpBody {
    Session(GoTrueSession),
    User(GoTrueUser),
}

#[derive(Deserialize, Default)]
struct GoTrueErrorBody {
    error_code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
}

impl SupabaseIdentityClient {
    pub fn new(project_url: &str, anon_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            auth_url: format!("{}/auth/v1", project_url.trim_end_matches('/')),
            anon_key: anon_key.to_string(),
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{}", self.auth_url, path))
            .header("apikey", &self.anon_key)
    }

    /// Passes successful responses through and classifies the rest.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, IdentityError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let body: GoTrueErrorBody = serde_json::from_str(&text).unwrap_or_default();
        Err(classify_error(status.as_u16(), body))
    }
}

fn classify_error(status: u16, body: GoTrueErrorBody) -> IdentityError {
    let code = body
        .error_code
        .clone()
        .or_else(|| body.error.clone())
        .unwrap_or_default();
    let message = body
        .msg
        .or(body.message)
        .or(body.error_description)
        .or(body.error)
        .unwrap_or_else(|| format!("authentication service returned {}", status));
    let lowered = message.to_ascii_lowercase();

    match code.as_str() {
        "user_already_exists" | "email_exists" => IdentityError::EmailAlreadyInUse,
        "email_address_invalid" => IdentityError::InvalidEmail,
        "validation_failed" if lowered.contains("email") => IdentityError::InvalidEmail,
        "weak_password" => IdentityError::WeakPassword,
        "invalid_credentials" => IdentityError::InvalidCredentials,
        "email_not_confirmed" => IdentityError::EmailNotVerified,
        "bad_jwt" | "session_not_found" | "session_expired" => IdentityError::SessionExpired,
        // Older GoTrue releases only send a description.
        "invalid_grant" if lowered.contains("not confirmed") => IdentityError::EmailNotVerified,
        "invalid_grant" => IdentityError::InvalidCredentials,
        _ if status == 401 => IdentityError::SessionExpired,
        _ if lowered.contains("already registered") => IdentityError::EmailAlreadyInUse,
        _ => IdentityError::Rejected { status, message },
    }
}

/// Turns a successful signup body into an outcome. With confirmation enabled,
/// signing up a confirmed address again yields a 200 with an obfuscated user
/// and no identities instead of an error.
fn signup_outcome(body: SignUpBody) -> Result<SignUpOutcome, IdentityError> {
    let user = match body {
        SignUpBody::Session(session) => session.user,
        SignUpBody::User(user) => user,
    };
    if user.identities.as_ref().is_some_and(|identities| identities.is_empty()) {
        return Err(IdentityError::EmailAlreadyInUse);
    }
    let verification_sent = user.confirmation_sent_at.is_some();
    Ok(SignUpOutcome {
        user: user.into(),
        verification_sent,
    })
}

#[async_trait]
impl IdentityProvider for SupabaseIdentityClient {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, IdentityError> {
        let response = self
            .post("/signup")
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        let body = Self::check(response).await?.json::<SignUpBody>().await?;
        signup_outcome(body)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<SignedInSession, IdentityError> {
        let response = self
            .post("/token?grant_type=password")
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        let session = Self::check(response).await?.json::<GoTrueSession>().await?;

        Ok(SignedInSession {
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            expires_in: session.expires_in,
            user: session.user.into(),
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError> {
        let response = self.post("/logout").bearer_auth(access_token).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn reload_user(&self, access_token: &str) -> Result<IdentityUser, IdentityError> {
        let response = self
            .http
            .get(format!("{}/user", self.auth_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        let user = Self::check(response).await?.json::<GoTrueUser>().await?;
        Ok(user.into())
    }

    async fn send_verification_email(&self, email: &str) -> Result<(), IdentityError> {
        let response = self
            .post("/resend")
            .json(&serde_json::json!({ "type": "signup", "email": email }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

// 3. The Mock Implementation (For Tests)
/// MockIdentityProvider
///
/// In-process identity provider used by unit and integration tests. Accounts
/// and sessions live in memory, and every sign-out and verification e-mail is
/// recorded so tests can assert on them.
#[derive(Default)]
pub struct MockIdentityProvider {
    /// When true, every call fails as if the provider were unreachable.
    pub should_fail: bool,
    /// When set, sign-in issues HS256 access tokens signed with this secret
    /// instead of opaque strings.
    jwt_secret: Option<String>,
    inner: Mutex<MockIdentityInner>,
}

#[derive(Default)]
struct MockIdentityInner {
    accounts: HashMap<String, MockAccount>,
    sessions: HashMap<String, Uuid>,
    signed_out: Vec<String>,
    verification_emails: Vec<String>,
}

#[derive(Clone)]
struct MockAccount {
    id: Uuid,
    password: String,
    email_verified: bool,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn with_jwt_secret(secret: &str) -> Self {
        Self {
            jwt_secret: Some(secret.to_string()),
            ..Self::default()
        }
    }

    fn mint_access_token(&self, user_id: Uuid) -> Result<String, IdentityError> {
        let Some(secret) = &self.jwt_secret else {
            return Ok(format!("mock-token-{}", Uuid::new_v4()));
        };
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user_id,
            exp: now + 3600,
            iat: now,
            session_id: Some(Uuid::new_v4()),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| IdentityError::Rejected {
            status: 500,
            message: e.to_string(),
        })
    }

    /// Registers an account directly, bypassing signup. Returns its id.
    pub fn add_user(&self, email: &str, password: &str, email_verified: bool) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.lock().accounts.insert(
            email.to_ascii_lowercase(),
            MockAccount {
                id,
                password: password.to_string(),
                email_verified,
            },
        );
        id
    }

    pub fn verify_email(&self, email: &str) {
        if let Some(account) = self.inner.lock().accounts.get_mut(&email.to_ascii_lowercase()) {
            account.email_verified = true;
        }
    }

    /// Binds an externally minted access token (e.g. a test JWT) to a user.
    pub fn register_session(&self, access_token: &str, user_id: Uuid) {
        self.inner
            .lock()
            .sessions
            .insert(access_token.to_string(), user_id);
    }

    pub fn signed_out_tokens(&self) -> Vec<String> {
        self.inner.lock().signed_out.clone()
    }

    pub fn verification_emails(&self) -> Vec<String> {
        self.inner.lock().verification_emails.clone()
    }

    fn unreachable() -> IdentityError {
        IdentityError::Rejected {
            status: 503,
            message: "Mock Identity Error: Simulation requested".to_string(),
        }
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, IdentityError> {
        if self.should_fail {
            return Err(Self::unreachable());
        }
        if !email.contains('@') {
            return Err(IdentityError::InvalidEmail);
        }
        let key = email.to_ascii_lowercase();
        let mut inner = self.inner.lock();
        if inner.accounts.contains_key(&key) {
            return Err(IdentityError::EmailAlreadyInUse);
        }
        let id = Uuid::new_v4();
        inner.accounts.insert(
            key,
            MockAccount {
                id,
                password: password.to_string(),
                email_verified: false,
            },
        );
        Ok(SignUpOutcome {
            user: IdentityUser {
                id,
                email: email.to_string(),
                email_verified: false,
            },
            verification_sent: false,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<SignedInSession, IdentityError> {
        if self.should_fail {
            return Err(Self::unreachable());
        }
        let mut inner = self.inner.lock();
        let account = inner
            .accounts
            .get(&email.to_ascii_lowercase())
            .filter(|a| a.password == password)
            .cloned()
            .ok_or(IdentityError::InvalidCredentials)?;

        let access_token = self.mint_access_token(account.id)?;
        inner.sessions.insert(access_token.clone(), account.id);
        Ok(SignedInSession {
            access_token,
            refresh_token: None,
            expires_in: Some(3600),
            user: IdentityUser {
                id: account.id,
                email: email.to_string(),
                email_verified: account.email_verified,
            },
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), IdentityError> {
        if self.should_fail {
            return Err(Self::unreachable());
        }
        let mut inner = self.inner.lock();
        inner.sessions.remove(access_token);
        inner.signed_out.push(access_token.to_string());
        Ok(())
    }

    async fn reload_user(&self, access_token: &str) -> Result<IdentityUser, IdentityError> {
        if self.should_fail {
            return Err(Self::unreachable());
        }
        let inner = self.inner.lock();
        let user_id = inner
            .sessions
            .get(access_token)
            .copied()
            .ok_or(IdentityError::SessionExpired)?;
        inner
            .accounts
            .iter()
            .find(|(_, account)| account.id == user_id)
            .map(|(email, account)| IdentityUser {
                id: account.id,
                email: email.clone(),
                email_verified: account.email_verified,
            })
            .ok_or(IdentityError::SessionExpired)
    }

    async fn send_verification_email(&self, email: &str) -> Result<(), IdentityError> {
        if self.should_fail {
            return Err(Self::unreachable());
        }
        self.inner
            .lock()
            .verification_emails
            .push(email.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_gotrue_error_codes() {
        let body = |code: &str, msg: &str| GoTrueErrorBody {
            error_code: Some(code.to_string()),
            msg: Some(msg.to_string()),
            ..GoTrueErrorBody::default()
        };

        assert!(matches!(
            classify_error(422, body("user_already_exists", "User already registered")),
            IdentityError::EmailAlreadyInUse
        ));
        assert!(matches!(
            classify_error(422, body("weak_password", "Password should be at least 6 characters")),
            IdentityError::WeakPassword
        ));
        assert!(matches!(
            classify_error(400, body("email_not_confirmed", "Email not confirmed")),
            IdentityError::EmailNotVerified
        ));
        assert!(matches!(
            classify_error(400, body("invalid_credentials", "Invalid login credentials")),
            IdentityError::InvalidCredentials
        ));
    }

    #[test]
    fn classify_handles_legacy_invalid_grant() {
        let legacy = GoTrueErrorBody {
            error: Some("invalid_grant".to_string()),
            error_description: Some("Email not confirmed".to_string()),
            ..GoTrueErrorBody::default()
        };
        assert!(matches!(classify_error(400, legacy), IdentityError::EmailNotVerified));
    }

    #[test]
    fn classify_falls_back_to_rejected_with_message() {
        let err = classify_error(
            500,
            GoTrueErrorBody {
                msg: Some("upstream exploded".to_string()),
                ..GoTrueErrorBody::default()
            },
        );
        assert_eq!(err.to_string(), "upstream exploded");
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn signup_of_confirmed_address_is_already_in_use() {
        let body: SignUpBody = serde_json::from_value(serde_json::json!({
            "id": "0b5d3c1e-6f0a-4c33-9d67-2f4a0e8b7c11",
            "aud": "authenticated",
            "role": "authenticated",
            "email": "ada@campus.edu",
            "phone": "",
            "confirmation_sent_at": "2025-03-02T10:15:00.000000Z",
            "app_metadata": { "provider": "email", "providers": ["email"] },
            "user_metadata": {},
            "identities": [],
            "created_at": "2025-03-02T10:15:00.000000Z",
            "updated_at": "2025-03-02T10:15:00.000000Z",
            "is_anonymous": false
        }))
        .unwrap();

        assert!(matches!(signup_outcome(body), Err(IdentityError::EmailAlreadyInUse)));
    }

    #[test]
    fn signup_of_new_address_reports_sent_verification() {
        let body: SignUpBody = serde_json::from_value(serde_json::json!({
            "id": "0b5d3c1e-6f0a-4c33-9d67-2f4a0e8b7c11",
            "email": "ada@campus.edu",
            "confirmation_sent_at": "2025-03-02T10:15:00.000000Z",
            "identities": [{
                "identity_id": "5e2f9a70-1c3b-4d8e-a6f4-0c9b8d7e6f51",
                "provider": "email"
            }]
        }))
        .unwrap();

        let outcome = signup_outcome(body).unwrap();
        assert!(outcome.verification_sent);
        assert!(!outcome.user.email_verified);
        assert_eq!(outcome.user.email, "ada@campus.edu");
    }

    #[tokio::test]
    async fn mock_with_secret_issues_decodable_tokens() {
        let idp = MockIdentityProvider::with_jwt_secret("mock-secret");
        let id = idp.add_user("a@campus.edu", "secret1", true);
        let session = idp.sign_in("a@campus.edu", "secret1").await.unwrap();

        let active = crate::auth::decode_session(&session.access_token, "mock-secret").unwrap();
        assert_eq!(active.user_id, id);
        assert_eq!(idp.reload_user(&session.access_token).await.unwrap().id, id);
    }

    #[tokio::test]
    async fn mock_reload_reflects_verification() {
        let idp = MockIdentityProvider::new();
        idp.add_user("a@campus.edu", "secret1", false);
        let session = idp.sign_in("a@campus.edu", "secret1").await.unwrap();
        assert!(!idp.reload_user(&session.access_token).await.unwrap().email_verified);

        idp.verify_email("a@campus.edu");
        assert!(idp.reload_user(&session.access_token).await.unwrap().email_verified);
    }
}
