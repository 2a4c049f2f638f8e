//! Account entity and the field rules applied before it is persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;

use greenlight_core::validator::{EMAIL_RX, matches};
use greenlight_core::{AccountId, DomainError, DomainResult, Entity, Validator};

use crate::Password;
use crate::password::{MAX_PASSWORD_BYTES, MIN_PASSWORD_BYTES};

pub const MAX_NAME_BYTES: usize = 500;

/// Identity record.
///
/// Serializes to the public shape `{id, created_at, name, email, activated}`;
/// the credential and the row version never leave the process.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub password: Password,
    pub activated: bool,
    #[serde(skip)]
    pub version: i32,
}

impl Account {
    /// Assemble an account from a persisted row.
    pub fn from_row(
        id: AccountId,
        created_at: DateTime<Utc>,
        fields: NewAccount,
        version: i32,
    ) -> Self {
        Self {
            id,
            created_at,
            name: fields.name,
            email: fields.email,
            password: fields.password,
            activated: fields.activated,
            version,
        }
    }
}

impl Entity for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> i32 {
        self.version
    }
}

/// Fields of an account that does not have a row yet.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password: Password,
    pub activated: bool,
}

pub fn validate_email(v: &mut Validator, email: &str) {
    v.check(!email.is_empty(), "email", "must be provided");
    v.check_with("email", "must be a valid email address", || {
        matches(email, &EMAIL_RX)
    });
}

pub fn validate_password_plaintext(v: &mut Validator, password: &str) {
    v.check(!password.is_empty(), "password", "must be provided");
    v.check_with("password", "must be at least 8 bytes long", || {
        password.len() >= MIN_PASSWORD_BYTES
    });
    v.check_with("password", "must not be more than 72 bytes long", || {
        password.len() <= MAX_PASSWORD_BYTES
    });
}

/// The confirmation is compared, never hashed or stored.
pub fn validate_passwords_match(v: &mut Validator, password: &str, confirmation: &str) {
    v.check(password == confirmation, "password", "passwords do not match");
}

/// Rules for a candidate account.
///
/// Field failures are written into `v`. A candidate whose password carries no
/// hash is an invariant violation and returns [`DomainError::Unrecoverable`]
/// regardless of what else failed.
pub fn validate_new_account(
    v: &mut Validator,
    account: &NewAccount,
    confirmation: &str,
) -> DomainResult<()> {
    v.check(!account.name.is_empty(), "name", "must be provided");
    v.check_with("name", "must not be more than 500 bytes long", || {
        account.name.len() <= MAX_NAME_BYTES
    });

    validate_email(v, &account.email);

    if let Some(plaintext) = account.password.plaintext() {
        validate_password_plaintext(v, plaintext);
        validate_passwords_match(v, plaintext, confirmation);
    }

    if account.password.hash().is_none() {
        return Err(DomainError::unrecoverable("missing password hash for account"));
    }

    Ok(())
}

/// Presence and shape checks for a credentials submission.
pub fn validate_login(v: &mut Validator, email: &str, password: &str) {
    validate_email(v, email);
    v.check(!password.is_empty(), "password", "must be provided");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, email: &str, password: &str) -> NewAccount {
        let mut pw = Password::default();
        pw.set(password).unwrap();
        NewAccount {
            name: name.into(),
            email: email.into(),
            password: pw,
            activated: false,
        }
    }

    #[test]
    fn valid_candidate_passes() {
        let mut v = Validator::new();
        let account = candidate("Ann", "ann@x.com", "longenough1");

        validate_new_account(&mut v, &account, "longenough1").unwrap();
        assert!(v.is_valid());
    }

    #[test]
    fn each_field_reports_its_first_failure() {
        let mut v = Validator::new();
        let account = candidate("", "not-an-email", "short");

        validate_new_account(&mut v, &account, "different").unwrap();

        assert_eq!(v.errors()["name"], "must be provided");
        assert_eq!(v.errors()["email"], "must be a valid email address");
        assert_eq!(v.errors()["password"], "must be at least 8 bytes long");
    }

    #[test]
    fn name_longer_than_500_bytes_is_rejected() {
        let mut v = Validator::new();
        let account = candidate(&"a".repeat(501), "ann@x.com", "longenough1");

        validate_new_account(&mut v, &account, "longenough1").unwrap();
        assert_eq!(v.errors()["name"], "must not be more than 500 bytes long");
    }

    #[test]
    fn password_bounds_are_inclusive() {
        for (len, ok) in [(7, false), (8, true), (72, true), (73, false)] {
            let mut v = Validator::new();
            validate_password_plaintext(&mut v, &"x".repeat(len));
            assert_eq!(v.is_valid(), ok, "length {len}");
        }
    }

    #[test]
    fn mismatched_confirmation_is_reported_under_password() {
        let mut v = Validator::new();
        let account = candidate("Ann", "ann@x.com", "longenough1");

        validate_new_account(&mut v, &account, "longenough2").unwrap();
        assert_eq!(v.errors()["password"], "passwords do not match");
    }

    #[test]
    fn empty_confirmation_never_matches() {
        let mut v = Validator::new();
        let account = candidate("Ann", "ann@x.com", "longenough1");

        validate_new_account(&mut v, &account, "").unwrap();
        assert_eq!(v.errors()["password"], "passwords do not match");
    }

    #[test]
    fn missing_hash_is_unrecoverable() {
        let mut v = Validator::new();
        let account = NewAccount {
            name: "Ann".into(),
            email: "ann@x.com".into(),
            password: Password::default(),
            activated: false,
        };

        let err = validate_new_account(&mut v, &account, "").unwrap_err();
        assert!(err.is_unrecoverable());
    }

    #[test]
    fn login_requires_both_fields() {
        let mut v = Validator::new();
        validate_login(&mut v, "", "");

        assert_eq!(v.errors()["email"], "must be provided");
        assert_eq!(v.errors()["password"], "must be provided");
    }

    #[test]
    fn public_shape_hides_credential_and_version() {
        let account = Account::from_row(
            AccountId::new(9),
            Utc::now(),
            candidate("Ann", "ann@x.com", "longenough1"),
            4,
        );

        let json = serde_json::to_value(&account).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();

        assert_eq!(keys.len(), 5);
        for key in ["id", "created_at", "name", "email", "activated"] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert_eq!(json["id"], 9);
    }
}
