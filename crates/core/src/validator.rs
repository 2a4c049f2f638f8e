//! Field-level validation accumulator.
//!
//! Every validation rule in the workspace writes into a [`Validator`]. The first
//! failure recorded for a field wins; later failures for the same field are
//! dropped, and [`Validator::check_with`] skips evaluating them at all.

use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{DomainError, DomainResult};

/// Field name → single human-readable message.
pub type FieldErrors = BTreeMap<String, String>;

/// Email shape accepted at registration and login.
pub static EMAIL_RX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("email pattern is a valid regex")
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validator {
    errors: FieldErrors,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff no errors were recorded.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_error(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    /// Record `message` for `field` unless the field already failed.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(field.into()).or_insert_with(|| message.into());
    }

    /// Record `message` for `field` if `ok` is false.
    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.add_error(field, message);
        }
    }

    /// Like [`Validator::check`], but the condition is only evaluated when the
    /// field has no error yet.
    pub fn check_with(&mut self, field: &str, message: &str, ok: impl FnOnce() -> bool) {
        if !self.has_error(field) && !ok() {
            self.add_error(field, message);
        }
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    /// `Ok(())` when valid, otherwise [`DomainError::ValidationFailed`].
    pub fn into_result(self) -> DomainResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(DomainError::ValidationFailed(self.errors))
        }
    }
}

/// True if `value` matches the whole-string pattern `rx`.
pub fn matches(value: &str, rx: &Regex) -> bool {
    rx.is_match(value)
}

/// True if `value` is one of `permitted`.
pub fn permitted_value<T: PartialEq + ?Sized>(value: &T, permitted: &[&T]) -> bool {
    permitted.iter().any(|p| *p == value)
}

/// True if no element of `values` appears twice.
pub fn unique<T: Eq + Hash>(values: &[T]) -> bool {
    let mut seen = HashSet::with_capacity(values.len());
    values.iter().all(|v| seen.insert(v))
}
