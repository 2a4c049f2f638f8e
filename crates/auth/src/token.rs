//! Scoped bearer tokens.
//!
//! A token is 16 bytes from the OS CSPRNG, base-32 encoded without padding
//! (26 characters). Only the SHA-256 digest of that plaintext is ever stored or
//! compared; the plaintext is handed to the caller once and then forgotten.

use chrono::{DateTime, Duration, Utc};
use data_encoding::BASE32_NOPAD;
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use greenlight_core::{AccountId, Validator};

/// Length of every token plaintext.
pub const TOKEN_PLAINTEXT_LEN: usize = 26;

const TOKEN_ENTROPY_BYTES: usize = 16;

/// What a token may be used for. Lookups are always scope-qualified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Activation,
    Authentication,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Activation => "activation",
            Scope::Authentication => "authentication",
        }
    }
}

impl core::fmt::Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("random source unavailable: {0}")]
    Entropy(String),
}

/// SHA-256 digest of a token plaintext.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenHash([u8; 32]);

impl TokenHash {
    pub fn of(plaintext: &str) -> Self {
        Self(Sha256::digest(plaintext.as_bytes()).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl core::fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "TokenHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// A freshly minted token.
///
/// Serializes to `{"token": ..., "expiry": ...}` for the one response that is
/// allowed to carry the plaintext.
#[derive(Clone, Serialize)]
pub struct Token {
    #[serde(rename = "token")]
    pub plaintext: String,
    #[serde(skip)]
    pub hash: TokenHash,
    #[serde(skip)]
    pub account_id: AccountId,
    pub expiry: DateTime<Utc>,
    #[serde(skip)]
    pub scope: Scope,
}

impl Token {
    /// Mint a token for `account_id` that expires `ttl` after `now`.
    pub fn generate(
        account_id: AccountId,
        ttl: Duration,
        scope: Scope,
        now: DateTime<Utc>,
    ) -> Result<Self, TokenError> {
        let mut random = [0u8; TOKEN_ENTROPY_BYTES];
        OsRng
            .try_fill_bytes(&mut random)
            .map_err(|e| TokenError::Entropy(e.to_string()))?;

        let plaintext = BASE32_NOPAD.encode(&random);
        let hash = TokenHash::of(&plaintext);

        Ok(Self {
            plaintext,
            hash,
            account_id,
            expiry: now + ttl,
            scope,
        })
    }
}

impl core::fmt::Debug for Token {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Token")
            .field("plaintext", &"<redacted>")
            .field("hash", &self.hash)
            .field("account_id", &self.account_id)
            .field("expiry", &self.expiry)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Shape check for a presented token plaintext.
pub fn validate_token_plaintext(v: &mut Validator, plaintext: &str) {
    v.check(!plaintext.is_empty(), "token", "must be provided");
    v.check_with("token", "must be 26 bytes long", || {
        plaintext.len() == TOKEN_PLAINTEXT_LEN
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use proptest::prelude::*;

    const BASE32_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

    fn mint(scope: Scope) -> Token {
        Token::generate(AccountId::new(7), Duration::hours(1), scope, Utc::now()).unwrap()
    }

    #[test]
    fn plaintext_is_26_base32_characters() {
        let token = mint(Scope::Activation);

        assert_eq!(token.plaintext.len(), TOKEN_PLAINTEXT_LEN);
        assert!(token.plaintext.chars().all(|c| BASE32_ALPHABET.contains(c)));
    }

    #[test]
    fn hash_is_digest_of_plaintext() {
        let token = mint(Scope::Authentication);
        assert_eq!(token.hash, TokenHash::of(&token.plaintext));
        assert_ne!(token.hash, TokenHash::of("something else entirely.."));
    }

    #[test]
    fn expiry_is_now_plus_ttl() {
        let now = Utc::now();
        let token =
            Token::generate(AccountId::new(1), Duration::days(3), Scope::Activation, now).unwrap();

        assert_eq!(token.expiry, now + Duration::days(3));
        assert_eq!(token.scope, Scope::Activation);
    }

    #[test]
    fn ten_thousand_plaintexts_do_not_collide() {
        let mut seen = HashSet::with_capacity(10_000);
        for _ in 0..10_000 {
            assert!(seen.insert(mint(Scope::Activation).plaintext));
        }
    }

    #[test]
    fn serialized_form_carries_only_token_and_expiry() {
        let token = mint(Scope::Authentication);
        let json = serde_json::to_value(&token).unwrap();
        let obj = json.as_object().unwrap();

        assert_eq!(obj.len(), 2);
        assert_eq!(obj["token"], token.plaintext.as_str());
        assert!(obj.contains_key("expiry"));
    }

    #[test]
    fn debug_output_redacts_plaintext() {
        let token = mint(Scope::Activation);
        assert!(!format!("{token:?}").contains(&token.plaintext));
    }

    #[test]
    fn plaintext_shape_validation() {
        let mut v = Validator::new();
        validate_token_plaintext(&mut v, "");
        assert_eq!(v.errors()["token"], "must be provided");

        let mut v = Validator::new();
        validate_token_plaintext(&mut v, "TOOSHORT");
        assert_eq!(v.errors()["token"], "must be 26 bytes long");

        let mut v = Validator::new();
        validate_token_plaintext(&mut v, &mint(Scope::Activation).plaintext);
        assert!(v.is_valid());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn every_mint_has_the_fixed_shape(id in 1i64..1_000_000, minutes in 1i64..10_000) {
            let token = Token::generate(
                AccountId::new(id),
                Duration::minutes(minutes),
                Scope::Authentication,
                Utc::now(),
            ).unwrap();
            prop_assert_eq!(token.plaintext.len(), TOKEN_PLAINTEXT_LEN);
            prop_assert!(token.plaintext.chars().all(|c| BASE32_ALPHABET.contains(c)));
            prop_assert_eq!(token.account_id, AccountId::new(id));
        }
    }
}
