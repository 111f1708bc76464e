use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::User;

/// Claims
///
/// The payload signed into every session token. The token alone is not enough to be
/// authenticated: `sid` must also still be live in the session store.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the id of the user the session is bound to.
    pub sub: i32,
    /// Session id, the key into the live-session store.
    pub sid: Uuid,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to sign session token: {0}")]
    Signing(String),
}

struct LiveSession {
    user_id: i32,
    expires_at: i64,
}

/// SessionService
///
/// Issues, resolves and revokes session tokens. Tokens are HS256-signed so they cannot be
/// forged, and every issued session id is tracked in an explicit store so that logout
/// takes effect immediately.
pub struct SessionService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    live: RwLock<HashMap<Uuid, LiveSession>>,
}

impl SessionService {
    pub fn new(secret: &str, ttl_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::minutes(ttl_minutes),
            live: RwLock::new(HashMap::new()),
        }
    }

    /// Establishes a session for `user` and returns its opaque token.
    pub fn login(&self, user: &User) -> Result<String, SessionError> {
        let now = Utc::now();
        let expires = now + self.ttl;
        let claims = Claims {
            sub: user.id,
            sid: Uuid::new_v4(),
            iat: now.timestamp() as usize,
            exp: expires.timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| SessionError::Signing(e.to_string()))?;

        let mut live = self.live.write();
        live.retain(|_, s| s.expires_at > now.timestamp());
        live.insert(
            claims.sid,
            LiveSession {
                user_id: user.id,
                expires_at: expires.timestamp(),
            },
        );
        tracing::debug!(user_id = user.id, session_id = %claims.sid, "session established");
        Ok(token)
    }

    /// Revokes the session behind `token`. Unknown or invalid tokens are ignored.
    pub fn logout(&self, token: &str) {
        if let Some(claims) = self.decode(token) {
            if self.live.write().remove(&claims.sid).is_some() {
                tracing::debug!(user_id = claims.sub, session_id = %claims.sid, "session revoked");
            }
        }
    }

    /// Resolves a token to the user id it is bound to.
    ///
    /// Returns `None` for forged, expired, revoked or unknown tokens.
    pub fn resolve(&self, token: &str) -> Option<i32> {
        let claims = self.decode(token)?;
        let live = self.live.read();
        let session = live.get(&claims.sid)?;
        (session.user_id == claims.sub && session.expires_at > Utc::now().timestamp())
            .then_some(session.user_id)
    }

    /// Number of sessions currently held in the store.
    pub fn active_sessions(&self) -> usize {
        self.live.read().len()
    }

    fn decode(&self, token: &str) -> Option<Claims> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        match decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!(error = %e, "rejected session token");
                None
            }
        }
    }
}

/// SessionState
///
/// The concrete type used to share the session store across the application state.
pub type SessionState = Arc<SessionService>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn user(id: i32) -> User {
        User {
            id,
            name: format!("user {id}"),
            email: format!("user{id}@example.com"),
            password_hash: String::new(),
            role: Role::Member,
        }
    }

    #[test]
    fn login_token_resolves_to_the_user() {
        let sessions = SessionService::new("test-secret", 60);
        let token = sessions.login(&user(7)).unwrap();
        assert_eq!(sessions.resolve(&token), Some(7));
    }

    #[test]
    fn logout_invalidates_the_token() {
        let sessions = SessionService::new("test-secret", 60);
        let token = sessions.login(&user(3)).unwrap();
        sessions.logout(&token);
        assert_eq!(sessions.resolve(&token), None);
        assert_eq!(sessions.active_sessions(), 0);
        // A second logout is a no-op.
        sessions.logout(&token);
    }

    #[test]
    fn logout_only_revokes_its_own_session() {
        let sessions = SessionService::new("test-secret", 60);
        let phone = sessions.login(&user(3)).unwrap();
        let laptop = sessions.login(&user(3)).unwrap();
        sessions.logout(&phone);
        assert_eq!(sessions.resolve(&phone), None);
        assert_eq!(sessions.resolve(&laptop), Some(3));
    }

    #[test]
    fn tokens_from_another_secret_do_not_resolve() {
        let ours = SessionService::new("secret-a", 60);
        let theirs = SessionService::new("secret-b", 60);
        let token = theirs.login(&user(1)).unwrap();
        assert_eq!(ours.resolve(&token), None);
    }

    #[test]
    fn garbage_and_expired_tokens_do_not_resolve() {
        let sessions = SessionService::new("test-secret", -5);
        let token = sessions.login(&user(1)).unwrap();
        assert_eq!(sessions.resolve(&token), None);
        assert_eq!(sessions.resolve("not.a.token"), None);
        assert_eq!(sessions.resolve(""), None);
    }
}
