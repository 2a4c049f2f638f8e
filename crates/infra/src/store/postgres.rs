//! Postgres-backed row store.
//!
//! ## Error Mapping
//!
//! | SQLx error | PostgreSQL code | `StoreError` |
//! |---|---|---|
//! | Database, unique violation on `accounts_email_lower_key` | `23505` | `DuplicateEmail` |
//! | Database, any other | any | `Backend` |
//! | `RowNotFound` | n/a | `NotFound` |
//! | anything else | n/a | `Backend` |
//!
//! Every call is bounded by [`QUERY_TIMEOUT`]; an elapsed deadline is
//! `StoreError::Timeout` and the in-flight query is dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use greenlight_auth::permissions::KNOWN_PERMISSIONS;
use greenlight_auth::{Account, NewAccount, Password, Permission, Permissions, Scope, Token, TokenHash};
use greenlight_core::AccountId;
use greenlight_movies::{Movie, MovieId, MovieQuery, NewMovie, Runtime};

use super::{AccountStore, MoviePage, MovieStore, PermissionStore, StoreError, TokenStore};

/// Upper bound on any single store call.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(3);

const EMAIL_UNIQUE_INDEX: &str = "accounts_email_lower_key";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id BIGSERIAL PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        name TEXT NOT NULL,
        email TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        activated BOOLEAN NOT NULL DEFAULT FALSE,
        version INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS accounts_email_lower_key ON accounts (lower(email))
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tokens (
        hash BYTEA NOT NULL,
        account_id BIGINT NOT NULL REFERENCES accounts ON DELETE CASCADE,
        expiry TIMESTAMPTZ NOT NULL,
        scope TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS tokens_hash_scope_idx ON tokens (hash, scope)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS permissions (
        id BIGSERIAL PRIMARY KEY,
        code TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS accounts_permissions (
        account_id BIGINT NOT NULL REFERENCES accounts ON DELETE CASCADE,
        permission_id BIGINT NOT NULL REFERENCES permissions ON DELETE CASCADE,
        PRIMARY KEY (account_id, permission_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS movies (
        id BIGSERIAL PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        title TEXT NOT NULL,
        year INTEGER NOT NULL,
        runtime INTEGER NOT NULL,
        genres TEXT[] NOT NULL,
        version INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS movies_title_idx ON movies USING GIN (to_tsvector('simple', title))
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS movies_genres_idx ON movies USING GIN (genres)
    "#,
];

const MOVIE_COLUMNS: &str = "id, created_at, title, year, runtime, genres, version";

/// Postgres implementation of every store trait.
///
/// Cheap to clone; the pool is shared.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `url` with at most `max_connections` connections.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = with_timeout("connect", async {
            PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(QUERY_TIMEOUT)
                .connect(url)
                .await
                .map_err(|e| map_sqlx_error("connect", e))
        })
        .await?;

        Ok(Self::new(pool))
    }

    /// Create missing tables and seed the known permission codes.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            with_timeout("ensure_schema", async {
                sqlx::query(statement)
                    .execute(&*self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("ensure_schema", e))
            })
            .await?;
        }

        let codes: Vec<String> = KNOWN_PERMISSIONS
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();

        with_timeout("seed_permissions", async {
            sqlx::query(
                r#"
                INSERT INTO permissions (code)
                SELECT unnest($1::text[])
                ON CONFLICT (code) DO NOTHING
                "#,
            )
            .bind(&codes)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("seed_permissions", e))
        })
        .await?;

        Ok(())
    }
}

async fn with_timeout<T, F>(operation: &'static str, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, "store call exceeded deadline");
            Err(StoreError::Timeout(operation))
        }
    }
}

fn required_hash(account_password: &Password) -> Result<&str, StoreError> {
    account_password
        .hash()
        .ok_or_else(|| StoreError::Backend("refusing to store an account without a password hash".into()))
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let read = |e: sqlx::Error| StoreError::Backend(format!("failed to read account row: {e}"));

    let id: i64 = row.try_get("id").map_err(read)?;
    let password_hash: String = row.try_get("password_hash").map_err(read)?;

    Ok(Account::from_row(
        AccountId::new(id),
        row.try_get("created_at").map_err(read)?,
        NewAccount {
            name: row.try_get("name").map_err(read)?,
            email: row.try_get("email").map_err(read)?,
            password: Password::from_hash(password_hash),
            activated: row.try_get("activated").map_err(read)?,
        },
        row.try_get("version").map_err(read)?,
    ))
}

async fn insert_account_row(
    tx: &mut Transaction<'_, Postgres>,
    account: &NewAccount,
) -> Result<Account, StoreError> {
    let row = sqlx::query(
        r#"
        INSERT INTO accounts (name, email, password_hash, activated)
        VALUES ($1, $2, $3, $4)
        RETURNING id, created_at, name, email, password_hash, activated, version
        "#,
    )
    .bind(&account.name)
    .bind(&account.email)
    .bind(required_hash(&account.password)?)
    .bind(account.activated)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_account", e))?;

    account_from_row(&row)
}

async fn grant_codes<'e, E>(executor: E, account_id: AccountId, codes: &[Permission]) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let codes: Vec<String> = codes.iter().map(|p| p.as_str().to_string()).collect();

    sqlx::query(
        r#"
        INSERT INTO accounts_permissions (account_id, permission_id)
        SELECT $1, permissions.id FROM permissions WHERE permissions.code = ANY($2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(account_id.get())
    .bind(&codes)
    .execute(executor)
    .await
    .map_err(|e| map_sqlx_error("grant_permissions", e))?;

    Ok(())
}

#[async_trait]
impl AccountStore for PostgresStore {
    #[instrument(skip(self, account), err)]
    async fn insert(&self, account: &NewAccount) -> Result<Account, StoreError> {
        self.insert_with_permissions(account, &[]).await
    }

    #[instrument(skip(self, account, grants), fields(grant_count = grants.len()), err)]
    async fn insert_with_permissions(
        &self,
        account: &NewAccount,
        grants: &[Permission],
    ) -> Result<Account, StoreError> {
        with_timeout("insert_account", async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| map_sqlx_error("begin_transaction", e))?;

            let created = insert_account_row(&mut tx, account).await?;
            if !grants.is_empty() {
                grant_codes(&mut *tx, created.id, grants).await?;
            }

            tx.commit()
                .await
                .map_err(|e| map_sqlx_error("commit_transaction", e))?;
            Ok(created)
        })
        .await
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn get_by_id(&self, id: AccountId) -> Result<Account, StoreError> {
        with_timeout("get_account_by_id", async {
            let row = sqlx::query(
                r#"
                SELECT id, created_at, name, email, password_hash, activated, version
                FROM accounts
                WHERE id = $1
                "#,
            )
            .bind(id.get())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_account_by_id", e))?;

            account_from_row(&row)
        })
        .await
    }

    #[instrument(skip(self, email), err)]
    async fn get_by_email(&self, email: &str) -> Result<Account, StoreError> {
        with_timeout("get_account_by_email", async {
            let row = sqlx::query(
                r#"
                SELECT id, created_at, name, email, password_hash, activated, version
                FROM accounts
                WHERE lower(email) = lower($1)
                "#,
            )
            .bind(email)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_account_by_email", e))?;

            account_from_row(&row)
        })
        .await
    }

    #[instrument(skip(self, hash), fields(scope = %scope), err)]
    async fn get_for_token(
        &self,
        hash: &TokenHash,
        scope: Scope,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        with_timeout("get_account_for_token", async {
            let row = sqlx::query(
                r#"
                SELECT accounts.id, accounts.created_at, accounts.name, accounts.email,
                       accounts.password_hash, accounts.activated, accounts.version
                FROM accounts
                INNER JOIN tokens ON accounts.id = tokens.account_id
                WHERE tokens.hash = $1
                  AND tokens.scope = $2
                  AND tokens.expiry > $3
                ORDER BY tokens.expiry DESC
                LIMIT 1
                "#,
            )
            .bind(&hash.as_bytes()[..])
            .bind(scope.as_str())
            .bind(now)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_account_for_token", e))?;

            account_from_row(&row)
        })
        .await
    }

    #[instrument(skip(self, account), fields(account_id = %account.id, version = account.version), err)]
    async fn update(&self, account: &Account) -> Result<i32, StoreError> {
        with_timeout("update_account", async {
            let row = sqlx::query(
                r#"
                UPDATE accounts
                SET name = $1, email = $2, password_hash = $3, activated = $4, version = version + 1
                WHERE id = $5 AND version = $6
                RETURNING version
                "#,
            )
            .bind(&account.name)
            .bind(&account.email)
            .bind(required_hash(&account.password)?)
            .bind(account.activated)
            .bind(account.id.get())
            .bind(account.version)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_account", e))?;

            let row = row.ok_or(StoreError::EditConflict)?;
            row.try_get("version")
                .map_err(|e| StoreError::Backend(format!("failed to read version: {e}")))
        })
        .await
    }
}

#[async_trait]
impl TokenStore for PostgresStore {
    #[instrument(skip(self, token), fields(account_id = %token.account_id, scope = %token.scope), err)]
    async fn insert(&self, token: &Token) -> Result<(), StoreError> {
        with_timeout("insert_token", async {
            sqlx::query(
                r#"
                INSERT INTO tokens (hash, account_id, expiry, scope)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&token.hash.as_bytes()[..])
            .bind(token.account_id.get())
            .bind(token.expiry)
            .bind(token.scope.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_token", e))?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self), fields(account_id = %account_id, scope = %scope), err)]
    async fn delete_all_for_account(
        &self,
        scope: Scope,
        account_id: AccountId,
    ) -> Result<(), StoreError> {
        with_timeout("delete_tokens", async {
            sqlx::query("DELETE FROM tokens WHERE scope = $1 AND account_id = $2")
                .bind(scope.as_str())
                .bind(account_id.get())
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("delete_tokens", e))?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl PermissionStore for PostgresStore {
    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn all_for_account(&self, account_id: AccountId) -> Result<Permissions, StoreError> {
        with_timeout("list_permissions", async {
            let rows = sqlx::query(
                r#"
                SELECT permissions.code
                FROM permissions
                INNER JOIN accounts_permissions ON accounts_permissions.permission_id = permissions.id
                WHERE accounts_permissions.account_id = $1
                "#,
            )
            .bind(account_id.get())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_permissions", e))?;

            rows.iter()
                .map(|row| {
                    row.try_get::<String, _>("code")
                        .map(Permission::new)
                        .map_err(|e| StoreError::Backend(format!("failed to read permission code: {e}")))
                })
                .collect()
        })
        .await
    }

    #[instrument(skip(self, codes), fields(account_id = %account_id), err)]
    async fn add_for_account(
        &self,
        account_id: AccountId,
        codes: &[Permission],
    ) -> Result<(), StoreError> {
        with_timeout("grant_permissions", grant_codes(&*self.pool, account_id, codes)).await
    }
}

fn movie_from_row(row: &PgRow) -> Result<Movie, StoreError> {
    let read = |e: sqlx::Error| StoreError::Backend(format!("failed to read movie row: {e}"));

    let id: i64 = row.try_get("id").map_err(read)?;
    let runtime: i32 = row.try_get("runtime").map_err(read)?;

    Ok(Movie::from_row(
        MovieId::new(id),
        row.try_get("created_at").map_err(read)?,
        NewMovie {
            title: row.try_get("title").map_err(read)?,
            year: row.try_get("year").map_err(read)?,
            runtime: Runtime(runtime),
            genres: row.try_get("genres").map_err(read)?,
        },
        row.try_get("version").map_err(read)?,
    ))
}

#[async_trait]
impl MovieStore for PostgresStore {
    #[instrument(skip(self, movie), fields(title = %movie.title), err)]
    async fn insert(&self, movie: &NewMovie) -> Result<Movie, StoreError> {
        with_timeout("insert_movie", async {
            let sql = format!(
                "INSERT INTO movies (title, year, runtime, genres) VALUES ($1, $2, $3, $4) RETURNING {MOVIE_COLUMNS}"
            );
            let row = sqlx::query(&sql)
                .bind(&movie.title)
                .bind(movie.year)
                .bind(movie.runtime.minutes())
                .bind(&movie.genres)
                .fetch_one(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("insert_movie", e))?;

            movie_from_row(&row)
        })
        .await
    }

    #[instrument(skip(self), fields(movie_id = %id), err)]
    async fn get(&self, id: MovieId) -> Result<Movie, StoreError> {
        with_timeout("get_movie", async {
            let sql = format!("SELECT {MOVIE_COLUMNS} FROM movies WHERE id = $1");
            let row = sqlx::query(&sql)
                .bind(id.get())
                .fetch_one(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("get_movie", e))?;

            movie_from_row(&row)
        })
        .await
    }

    #[instrument(skip(self, movie), fields(movie_id = %movie.id, version = movie.version), err)]
    async fn update(&self, movie: &Movie) -> Result<i32, StoreError> {
        with_timeout("update_movie", async {
            let row = sqlx::query(
                r#"
                UPDATE movies
                SET title = $1, year = $2, runtime = $3, genres = $4, version = version + 1
                WHERE id = $5 AND version = $6
                RETURNING version
                "#,
            )
            .bind(&movie.title)
            .bind(movie.year)
            .bind(movie.runtime.minutes())
            .bind(&movie.genres)
            .bind(movie.id.get())
            .bind(movie.version)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_movie", e))?;

            let row = row.ok_or(StoreError::EditConflict)?;
            row.try_get("version")
                .map_err(|e| StoreError::Backend(format!("failed to read version: {e}")))
        })
        .await
    }

    #[instrument(skip(self), fields(movie_id = %id), err)]
    async fn delete(&self, id: MovieId) -> Result<(), StoreError> {
        with_timeout("delete_movie", async {
            let result = sqlx::query("DELETE FROM movies WHERE id = $1")
                .bind(id.get())
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("delete_movie", e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, query), fields(sort = %query.filters.sort, page = query.filters.page), err)]
    async fn list(&self, query: &MovieQuery) -> Result<MoviePage, StoreError> {
        let filters = &query.filters;
        // sort_column only ever yields a safelisted identifier
        let sql = format!(
            r#"
            SELECT count(*) OVER() AS total_records, {MOVIE_COLUMNS}
            FROM movies
            WHERE (to_tsvector('simple', title) @@ plainto_tsquery('simple', $1) OR $1 = '')
              AND (genres @> $2 OR $2 = '{{}}')
            ORDER BY {} {}, id ASC
            LIMIT $3 OFFSET $4
            "#,
            filters.sort_column(),
            filters.sort_direction().as_sql(),
        );

        with_timeout("list_movies", async {
            let rows = sqlx::query(&sql)
                .bind(&query.title)
                .bind(&query.genres)
                .bind(filters.limit())
                .bind(filters.offset())
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("list_movies", e))?;

            let mut page = MoviePage::default();
            for row in &rows {
                page.total_records = row
                    .try_get("total_records")
                    .map_err(|e| StoreError::Backend(format!("failed to read total: {e}")))?;
                page.movies.push(movie_from_row(row)?);
            }
            Ok(page)
        })
        .await
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db_err) => {
            let is_unique = db_err.code().as_deref() == Some("23505");
            if is_unique && db_err.constraint() == Some(EMAIL_UNIQUE_INDEX) {
                StoreError::DuplicateEmail
            } else {
                StoreError::Backend(format!("database error in {operation}: {}", db_err.message()))
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => StoreError::Backend(format!("connection pool timed out in {operation}")),
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}
