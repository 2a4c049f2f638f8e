//! `greenlight-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the field-level validator, the error taxonomy shared by every layer, and
//! strongly-typed identifiers.

pub mod entity;
pub mod error;
pub mod id;
pub mod validator;
pub mod version;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::AccountId;
pub use validator::{FieldErrors, Validator};
pub use version::ExpectedVersion;
