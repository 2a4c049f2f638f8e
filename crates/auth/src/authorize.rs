use thiserror::Error;

use crate::{Account, Permission, Permissions};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("authentication required")]
    AuthenticationRequired,

    #[error("account is not activated")]
    InactiveAccount,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Gate for routes that need a registered *and* activated account.
pub fn require_activated(account: &Account) -> Result<(), AuthzError> {
    if account.activated {
        Ok(())
    } else {
        Err(AuthzError::InactiveAccount)
    }
}

/// Set-membership check against a freshly fetched permission set.
///
/// - No IO
/// - No caching; callers fetch `granted` per request
pub fn authorize(granted: &Permissions, required: &Permission) -> Result<(), AuthzError> {
    if granted.include(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}
