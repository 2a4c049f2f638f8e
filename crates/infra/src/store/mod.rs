//! Row-store boundary.
//!
//! The services talk to persistence only through the traits in this module. Two implementations exist: [`InMemoryStore`] for tests and
//! local development, and [`PostgresStore`] for everything else.
//!
//! ## Not-found signalling
//!
//! Every lookup reports a miss as [`StoreError::NotFound`], distinct from any
//! backend failure. Token lookups use the same variant for an unknown hash, a
//! wrong scope and an expired row.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use greenlight_auth::{Account, NewAccount, Permission, Permissions, Scope, Token, TokenHash};
use greenlight_core::{AccountId, DomainError};
use greenlight_movies::{Movie, MovieId, MovieQuery, NewMovie};

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("duplicate email")]
    DuplicateEmail,

    #[error("edit conflict")]
    EditConflict,

    #[error("store call timed out in {0}")]
    Timeout(&'static str),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => DomainError::RecordNotFound,
            StoreError::DuplicateEmail => DomainError::DuplicateEmail,
            StoreError::EditConflict => DomainError::EditConflict,
            other => DomainError::unrecoverable(other.to_string()),
        }
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new row; assigns id, creation time and version 1.
    async fn insert(&self, account: &NewAccount) -> Result<Account, StoreError>;

    /// Insert a new row together with its initial grants, all or nothing.
    async fn insert_with_permissions(
        &self,
        account: &NewAccount,
        grants: &[Permission],
    ) -> Result<Account, StoreError>;

    async fn get_by_id(&self, id: AccountId) -> Result<Account, StoreError>;

    /// Case-insensitive on `email`.
    async fn get_by_email(&self, email: &str) -> Result<Account, StoreError>;

    /// Owner of a token with this digest and scope whose expiry is after `now`.
    async fn get_for_token(
        &self,
        hash: &TokenHash,
        scope: Scope,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError>;

    /// Write every mutable field if the row is still at `account.version`.
    ///
    /// Returns the new version. A row at any other version is
    /// [`StoreError::EditConflict`].
    async fn update(&self, account: &Account) -> Result<i32, StoreError>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Append-only; duplicate digests are accepted.
    async fn insert(&self, token: &Token) -> Result<(), StoreError>;

    async fn delete_all_for_account(
        &self,
        scope: Scope,
        account_id: AccountId,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn all_for_account(&self, account_id: AccountId) -> Result<Permissions, StoreError>;

    /// Grant `codes`. Codes the permission table does not know are skipped and
    /// re-granting an existing code is a no-op.
    async fn add_for_account(
        &self,
        account_id: AccountId,
        codes: &[Permission],
    ) -> Result<(), StoreError>;
}

/// One page of a movie listing plus the number of rows that matched overall.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoviePage {
    pub movies: Vec<Movie>,
    pub total_records: i64,
}

#[async_trait]
pub trait MovieStore: Send + Sync {
    /// Insert a new row; assigns id, creation time and version 1.
    async fn insert(&self, movie: &NewMovie) -> Result<Movie, StoreError>;

    async fn get(&self, id: MovieId) -> Result<Movie, StoreError>;

    /// Write every field if the row is still at `movie.version`; returns the
    /// new version. A missing row is also [`StoreError::EditConflict`], since
    /// it was deleted after the caller read it.
    async fn update(&self, movie: &Movie) -> Result<i32, StoreError>;

    async fn delete(&self, id: MovieId) -> Result<(), StoreError>;

    /// Rows matching the title words and genres, sorted by the filter's
    /// column with `id` ascending as the tie-break.
    async fn list(&self, query: &MovieQuery) -> Result<MoviePage, StoreError>;
}

/// The store handles, shared across requests.
#[derive(Clone)]
pub struct Stores {
    pub accounts: Arc<dyn AccountStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub movies: Arc<dyn MovieStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            accounts: store.clone(),
            tokens: store.clone(),
            permissions: store.clone(),
            movies: store,
        }
    }

    pub fn postgres(store: PostgresStore) -> Self {
        let store = Arc::new(store);
        Self {
            accounts: store.clone(),
            tokens: store.clone(),
            permissions: store.clone(),
            movies: store,
        }
    }
}

impl core::fmt::Debug for Stores {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
