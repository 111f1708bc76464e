use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use std::convert::Infallible;

use crate::{models::User, repository::RepositoryState, session::SessionState};

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session";

/// Principal
///
/// The resolved identity of a request. `Anonymous` is a distinct value rather than a
/// missing one, so every handler has to decide explicitly what a visitor may do.
#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    Anonymous,
    User(User),
}

impl Principal {
    pub fn user(&self) -> Option<&User> {
        match self {
            Principal::User(user) => Some(user),
            Principal::Anonymous => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }
}

/// SessionToken
///
/// The raw session token presented by the client, if any. Used by logout, which must
/// revoke exactly the session it was called with.
#[derive(Debug, Clone)]
pub struct SessionToken(pub Option<String>);

/// Reads a single cookie value from the `Cookie` header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Token lookup order: the session cookie first, then an `Authorization: Bearer` header.
fn presented_token(headers: &HeaderMap) -> Option<String> {
    cookie_value(headers, SESSION_COOKIE).or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string)
    })
}

impl<S> FromRequestParts<S> for SessionToken
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(SessionToken(presented_token(&parts.headers)))
    }
}

/// Principal Extractor Implementation
///
/// 1. Token lookup (cookie or bearer header).
/// 2. Session resolution: signature, expiry and revocation checks.
/// 3. DB lookup, so a session for a since-removed account resolves to nobody.
///
/// Never rejects: any failure along the way yields `Principal::Anonymous`.
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    SessionState: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(token) = presented_token(&parts.headers) else {
            return Ok(Principal::Anonymous);
        };

        let sessions = SessionState::from_ref(state);
        let Some(user_id) = sessions.resolve(&token) else {
            return Ok(Principal::Anonymous);
        };

        let repo = RepositoryState::from_ref(state);
        match repo.find_user_by_id(user_id).await {
            Ok(Some(user)) => Ok(Principal::User(user)),
            Ok(None) => Ok(Principal::Anonymous),
            Err(e) => {
                tracing::error!(error = %e, user_id, "failed to load session user");
                Ok(Principal::Anonymous)
            }
        }
    }
}
