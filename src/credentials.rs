use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use rand_core::OsRng;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// CredentialService
///
/// Salted, slow, one-way password hashing (Argon2id). The cost parameters are fixed for
/// the lifetime of the service; every call to `hash` draws a fresh random salt.
/// Plaintext passwords are never stored or logged.
pub struct CredentialService {
    argon2: Argon2<'static>,
}

impl CredentialService {
    /// Builds the service with an explicit memory cost (KiB) and iteration count.
    pub fn with_cost(memory_kib: u32, iterations: u32) -> Result<Self, CredentialError> {
        let params = Params::new(memory_kib, iterations, Params::DEFAULT_P_COST, None)
            .map_err(|e| CredentialError::Hashing(e.to_string()))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Returns the PHC string (algorithm, parameters, salt and digest).
    pub fn hash(&self, plaintext: &str) -> Result<String, CredentialError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| CredentialError::Hashing(e.to_string()))
    }

    /// Checks a plaintext against a stored credential.
    ///
    /// A malformed credential yields `false`, so callers cannot tell a corrupt record from
    /// a wrong password.
    pub fn verify(&self, plaintext: &str, credential: &str) -> bool {
        let parsed = match PasswordHash::new(credential) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "stored credential is not a valid PHC string");
                return false;
            }
        };
        self.argon2
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }
}

/// CredentialState
///
/// The concrete type used to share the credential service across the application state.
pub type CredentialState = Arc<CredentialService>;
