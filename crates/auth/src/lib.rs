//! `greenlight-auth`: credentials, tokens and permissions.
//!
//! This crate is intentionally decoupled from HTTP and storage: it hashes and
//! verifies secrets, mints token material, and answers permission questions.
//! Persisting any of it is the infra layer's job.

pub mod account;
pub mod authorize;
pub mod password;
pub mod permissions;
pub mod token;

pub use account::{Account, NewAccount};
pub use authorize::{AuthzError, authorize, require_activated};
pub use password::{Password, PasswordError};
pub use permissions::{Permission, Permissions};
pub use token::{Scope, Token, TokenError, TokenHash};
