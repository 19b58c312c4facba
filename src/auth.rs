use axum::{
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, header, request::Parts},
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use uuid::Uuid;

use crate::{
    config::{AppConfig, Env},
    models::Role,
    repository::RepositoryState,
    session::{ActiveSession, SessionToken},
};

/// Claims
///
/// The payload of the identity provider's access token. Validated locally
/// against the shared JWT secret on every authenticated request.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the user id, also the primary key of `profiles`.
    pub sub: Uuid,
    /// Expiration time, seconds since the epoch.
    pub exp: usize,
    /// Issued at, seconds since the epoch.
    pub iat: usize,
    /// Supabase puts the sign-in session id here; older tokens omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
}

impl Claims {
    fn into_session(self, access_token: &str) -> ActiveSession {
        let token = match self.session_id {
            Some(id) => SessionToken::new(id.to_string()),
            None => SessionToken::derived(self.sub, self.iat),
        };
        ActiveSession {
            token,
            user_id: self.sub,
            access_token: access_token.to_string(),
            expires_at: DateTime::<Utc>::from_timestamp(self.exp as i64, 0),
        }
    }
}

/// Extracts the raw bearer token, if the header is present and well formed.
fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Decodes and validates an access token into the session it belongs to.
pub fn decode_session(token: &str, jwt_secret: &str) -> Result<ActiveSession, jsonwebtoken::errors::Error> {
    let decoding_key = DecodingKey::from_secret(jwt_secret.as_bytes());
    let mut validation = Validation::default();
    validation.validate_exp = true;
    // Supabase sets aud = "authenticated"; only signature and expiry are checked.
    validation.validate_aud = false;

    let data = decode::<Claims>(token, &decoding_key, &validation)?;
    Ok(data.claims.into_session(token))
}

/// AuthUser Extractor Result
///
/// The resolved identity of an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user id, shared by the identity provider and `profiles`.
    pub id: Uuid,
    /// Role from the profile, used for every RBAC check.
    pub role: Role,
    /// The provider session behind the request. None for the local `x-user-id` bypass.
    pub session: Option<ActiveSession>,
}

/// AuthUser Extractor Implementation
///
/// 1. Local bypass: in `Env::Local` an `x-user-id` header naming an existing profile is accepted.
/// 2. Bearer token: decoded and validated (signature, expiry).
/// 3. Profile lookup: the role comes from the store, so a deleted profile loses access immediately.
///
/// Rejection: `401 Unauthorized` on any failure.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        if config.env == Env::Local {
            let bypass_id = parts
                .headers
                .get("x-user-id")
                .and_then(|value| value.to_str().ok())
                .and_then(|id| Uuid::parse_str(id).ok());
            if let Some(user_id) = bypass_id {
                if let Ok(Some(profile)) = repo.get_profile(user_id).await {
                    return Ok(AuthUser {
                        id: profile.id,
                        role: profile.role,
                        session: None,
                    });
                }
            }
        }
        // Production, or the bypass did not resolve: standard bearer flow.

        let token = bearer_token(parts).ok_or(StatusCode::UNAUTHORIZED)?;
        let session = decode_session(token, &config.jwt_secret).map_err(|e| {
            tracing::debug!("rejected access token: {:?}", e.kind());
            StatusCode::UNAUTHORIZED
        })?;

        let profile = match repo.get_profile(session.user_id).await {
            Ok(Some(profile)) => profile,
            Ok(None) => return Err(StatusCode::UNAUTHORIZED),
            Err(e) => {
                tracing::error!("profile lookup during auth failed: {}", e);
                return Err(StatusCode::UNAUTHORIZED);
            }
        };

        Ok(AuthUser {
            id: profile.id,
            role: profile.role,
            session: Some(session),
        })
    }
}

/// MaybeSession
///
/// The session behind a request, if any, without touching the profile store.
/// A missing, malformed or expired token reads as "no user", which is exactly
/// what the session router needs to decide on.
#[derive(Debug, Clone)]
pub struct MaybeSession(pub Option<ActiveSession>);

impl<S> FromRequestParts<S> for MaybeSession
where
    S: Send + Sync,
    AppConfig: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = AppConfig::from_ref(state);
        let session = bearer_token(parts).and_then(|token| decode_session(token, &config.jwt_secret).ok());
        Ok(MaybeSession(session))
    }
}
