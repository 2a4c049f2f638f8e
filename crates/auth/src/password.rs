//! Password hashing and verification using Argon2.
//!
//! Work factor is fixed; the plaintext lives only as long as the request that
//! set it and is wiped on drop.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use thiserror::Error;
use zeroize::Zeroizing;

/// Inclusive byte-length bounds for a plaintext password.
pub const MIN_PASSWORD_BYTES: usize = 8;
pub const MAX_PASSWORD_BYTES: usize = 72;

const MEMORY_COST_KIB: u32 = 19 * 1024;
const TIME_COST: u32 = 2;
const PARALLELISM: u32 = 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PasswordError {
    #[error("failed to hash password: {0}")]
    Hash(String),

    #[error("malformed password hash: {0}")]
    MalformedHash(String),

    #[error("password verification failed: {0}")]
    Verify(String),
}

fn hasher() -> Result<Argon2<'static>, PasswordError> {
    let params = Params::new(MEMORY_COST_KIB, TIME_COST, PARALLELISM, None)
        .map_err(|e| PasswordError::Hash(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password using Argon2id.
///
/// Returns the PHC-formatted hash string that includes the salt and parameters.
pub fn hash_password(plaintext: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    hasher()?
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Verify a password against a stored hash.
///
/// A wrong password is `Ok(false)`; only a corrupted hash (or a failure inside
/// the hash function) is an error.
pub fn verify_password(plaintext: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        tracing::warn!(error = %e, "stored password hash could not be parsed");
        PasswordError::MalformedHash(e.to_string())
    })?;

    match hasher()?.verify_password(plaintext.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::Verify(e.to_string())),
    }
}

/// A password as the domain sees it: the persisted hash plus, for the duration
/// of one request, the plaintext it was derived from.
///
/// There is no way to set the hash on its own except when loading a row that
/// was already persisted ([`Password::from_hash`]).
#[derive(Clone, Default)]
pub struct Password {
    plaintext: Option<Zeroizing<String>>,
    hash: Option<String>,
}

impl Password {
    /// Hash `plaintext` and keep both forms.
    pub fn set(&mut self, plaintext: &str) -> Result<(), PasswordError> {
        let hash = hash_password(plaintext)?;
        self.plaintext = Some(Zeroizing::new(plaintext.to_owned()));
        self.hash = Some(hash);
        Ok(())
    }

    /// Rehydrate from a stored hash (no plaintext).
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self {
            plaintext: None,
            hash: Some(hash.into()),
        }
    }

    pub fn plaintext(&self) -> Option<&str> {
        self.plaintext.as_deref().map(String::as_str)
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    /// Drop the transient plaintext once validation no longer needs it.
    pub fn forget_plaintext(&mut self) {
        self.plaintext = None;
    }

    /// Check a candidate plaintext against the stored hash.
    pub fn matches(&self, plaintext: &str) -> Result<bool, PasswordError> {
        match &self.hash {
            Some(hash) => verify_password(plaintext, hash),
            None => Err(PasswordError::MalformedHash("no hash set".to_string())),
        }
    }
}

impl core::fmt::Debug for Password {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Password")
            .field("plaintext", &self.plaintext.as_ref().map(|_| "<redacted>"))
            .field("hash", &self.hash.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
