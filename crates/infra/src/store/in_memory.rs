use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use greenlight_auth::permissions::KNOWN_PERMISSIONS;
use greenlight_auth::{Account, NewAccount, Password, Permission, Permissions, Scope, Token, TokenHash};
use greenlight_core::{AccountId, Entity, ExpectedVersion};
use greenlight_movies::{Movie, MovieId, MovieQuery, NewMovie, SortDirection};

use super::{AccountStore, MoviePage, MovieStore, PermissionStore, StoreError, TokenStore};

/// Persisted account shape: the hash only, never a plaintext.
#[derive(Debug, Clone)]
struct AccountRow {
    id: i64,
    created_at: DateTime<Utc>,
    name: String,
    email: String,
    password_hash: String,
    activated: bool,
    version: i32,
}

impl AccountRow {
    fn to_account(&self) -> Account {
        Account::from_row(
            AccountId::new(self.id),
            self.created_at,
            NewAccount {
                name: self.name.clone(),
                email: self.email.clone(),
                password: Password::from_hash(self.password_hash.clone()),
                activated: self.activated,
            },
            self.version,
        )
    }
}

#[derive(Debug, Clone)]
struct TokenRow {
    hash: TokenHash,
    account_id: i64,
    expiry: DateTime<Utc>,
    scope: Scope,
}

#[derive(Debug)]
struct State {
    next_id: i64,
    accounts: BTreeMap<i64, AccountRow>,
    tokens: Vec<TokenRow>,
    known_codes: BTreeSet<Permission>,
    grants: BTreeMap<i64, BTreeSet<Permission>>,
    next_movie_id: i64,
    movies: BTreeMap<i64, Movie>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            next_id: 1,
            accounts: BTreeMap::new(),
            tokens: Vec::new(),
            known_codes: KNOWN_PERMISSIONS.into_iter().collect(),
            grants: BTreeMap::new(),
            next_movie_id: 1,
            movies: BTreeMap::new(),
        }
    }
}

impl State {
    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.accounts
            .values()
            .any(|row| Some(row.id) != except && row.email.eq_ignore_ascii_case(email))
    }

    fn insert_account(&mut self, account: &NewAccount) -> Result<AccountRow, StoreError> {
        let password_hash = account
            .password
            .hash()
            .ok_or_else(|| StoreError::Backend("refusing to store an account without a password hash".into()))?
            .to_string();

        if self.email_taken(&account.email, None) {
            return Err(StoreError::DuplicateEmail);
        }

        let row = AccountRow {
            id: self.next_id,
            created_at: Utc::now(),
            name: account.name.clone(),
            email: account.email.clone(),
            password_hash,
            activated: account.activated,
            version: 1,
        };
        self.next_id += 1;
        self.accounts.insert(row.id, row.clone());
        Ok(row)
    }

    fn grant(&mut self, account_id: i64, codes: &[Permission]) {
        let known: Vec<Permission> = codes
            .iter()
            .filter(|code| self.known_codes.contains(*code))
            .cloned()
            .collect();
        self.grants.entry(account_id).or_default().extend(known);
    }
}

/// In-memory row store implementing every store trait.
///
/// Intended for tests/dev. One lock guards every table, so each call is atomic
/// with respect to the others.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    /// Number of stored tokens for `account_id` in `scope`, expired ones included.
    pub fn token_count(&self, account_id: AccountId, scope: Scope) -> usize {
        self.read()
            .map(|state| {
                state
                    .tokens
                    .iter()
                    .filter(|t| t.account_id == account_id.get() && t.scope == scope)
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn insert(&self, account: &NewAccount) -> Result<Account, StoreError> {
        let mut state = self.write()?;
        state.insert_account(account).map(|row| row.to_account())
    }

    async fn insert_with_permissions(
        &self,
        account: &NewAccount,
        grants: &[Permission],
    ) -> Result<Account, StoreError> {
        let mut state = self.write()?;
        let row = state.insert_account(account)?;
        state.grant(row.id, grants);
        Ok(row.to_account())
    }

    async fn get_by_id(&self, id: AccountId) -> Result<Account, StoreError> {
        let state = self.read()?;
        state
            .accounts
            .get(&id.get())
            .map(AccountRow::to_account)
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_email(&self, email: &str) -> Result<Account, StoreError> {
        let state = self.read()?;
        state
            .accounts
            .values()
            .find(|row| row.email.eq_ignore_ascii_case(email))
            .map(AccountRow::to_account)
            .ok_or(StoreError::NotFound)
    }

    async fn get_for_token(
        &self,
        hash: &TokenHash,
        scope: Scope,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let state = self.read()?;

        // Latest insert wins when digests collide.
        let owner = state
            .tokens
            .iter()
            .rev()
            .find(|t| t.hash == *hash && t.scope == scope && t.expiry > now)
            .map(|t| t.account_id)
            .ok_or(StoreError::NotFound)?;

        state
            .accounts
            .get(&owner)
            .map(AccountRow::to_account)
            .ok_or(StoreError::NotFound)
    }

    async fn update(&self, account: &Account) -> Result<i32, StoreError> {
        let password_hash = account
            .password
            .hash()
            .ok_or_else(|| StoreError::Backend("refusing to store an account without a password hash".into()))?
            .to_string();

        let mut state = self.write()?;
        let id = account.id.get();

        let current = state
            .accounts
            .get(&id)
            .map(|row| row.version)
            .ok_or(StoreError::EditConflict)?;
        ExpectedVersion::Exact(account.version())
            .check(current)
            .map_err(|_| StoreError::EditConflict)?;
        if state.email_taken(&account.email, Some(id)) {
            return Err(StoreError::DuplicateEmail);
        }

        let row = state.accounts.get_mut(&id).ok_or(StoreError::EditConflict)?;
        row.name = account.name.clone();
        row.email = account.email.clone();
        row.password_hash = password_hash;
        row.activated = account.activated;
        row.version += 1;
        Ok(row.version)
    }
}

#[async_trait]
impl TokenStore for InMemoryStore {
    async fn insert(&self, token: &Token) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if !state.accounts.contains_key(&token.account_id.get()) {
            return Err(StoreError::Backend(format!(
                "token references unknown account {}",
                token.account_id
            )));
        }
        state.tokens.push(TokenRow {
            hash: token.hash,
            account_id: token.account_id.get(),
            expiry: token.expiry,
            scope: token.scope,
        });
        Ok(())
    }

    async fn delete_all_for_account(
        &self,
        scope: Scope,
        account_id: AccountId,
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state
            .tokens
            .retain(|t| !(t.scope == scope && t.account_id == account_id.get()));
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for InMemoryStore {
    async fn all_for_account(&self, account_id: AccountId) -> Result<Permissions, StoreError> {
        let state = self.read()?;
        Ok(state
            .grants
            .get(&account_id.get())
            .map(|codes| codes.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_for_account(
        &self,
        account_id: AccountId,
        codes: &[Permission],
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if !state.accounts.contains_key(&account_id.get()) {
            return Err(StoreError::Backend(format!(
                "permission grant references unknown account {account_id}"
            )));
        }
        state.grant(account_id.get(), codes);
        Ok(())
    }
}

#[async_trait]
impl MovieStore for InMemoryStore {
    async fn insert(&self, movie: &NewMovie) -> Result<Movie, StoreError> {
        let mut state = self.write()?;
        let id = state.next_movie_id;
        state.next_movie_id += 1;

        let row = Movie::from_row(MovieId::new(id), Utc::now(), movie.clone(), 1);
        state.movies.insert(id, row.clone());
        Ok(row)
    }

    async fn get(&self, id: MovieId) -> Result<Movie, StoreError> {
        let state = self.read()?;
        state.movies.get(&id.get()).cloned().ok_or(StoreError::NotFound)
    }

    async fn update(&self, movie: &Movie) -> Result<i32, StoreError> {
        let mut state = self.write()?;
        let row = state
            .movies
            .get_mut(&movie.id.get())
            .ok_or(StoreError::EditConflict)?;
        ExpectedVersion::Exact(movie.version())
            .check(row.version)
            .map_err(|_| StoreError::EditConflict)?;

        *row = Movie {
            version: row.version + 1,
            created_at: row.created_at,
            ..movie.clone()
        };
        Ok(row.version)
    }

    async fn delete(&self, id: MovieId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state
            .movies
            .remove(&id.get())
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self, query: &MovieQuery) -> Result<MoviePage, StoreError> {
        let state = self.read()?;
        let mut matched: Vec<&Movie> = state
            .movies
            .values()
            .filter(|m| query.matches_title(&m.title) && query.matches_genres(&m.genres))
            .collect();

        let filters = &query.filters;
        let column = filters.sort_column();
        let direction = filters.sort_direction();
        matched.sort_by(|a, b| {
            let primary = compare_column(a, b, column);
            let primary = match direction {
                SortDirection::Asc => primary,
                SortDirection::Desc => primary.reverse(),
            };
            primary.then(a.id.cmp(&b.id))
        });

        let total_records = matched.len() as i64;
        let movies = matched
            .into_iter()
            .skip(usize::try_from(filters.offset()).unwrap_or(usize::MAX))
            .take(usize::try_from(filters.limit()).unwrap_or(0))
            .cloned()
            .collect();

        Ok(MoviePage {
            movies,
            total_records,
        })
    }
}

fn compare_column(a: &Movie, b: &Movie, column: &str) -> Ordering {
    match column {
        "title" => a.title.cmp(&b.title),
        "year" => a.year.cmp(&b.year),
        "runtime" => a.runtime.cmp(&b.runtime),
        _ => a.id.cmp(&b.id),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use greenlight_auth::permissions::{MOVIES_READ, MOVIES_WRITE};

    use super::*;

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            name: "Ann".into(),
            email: email.into(),
            password: Password::from_hash("$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA"),
            activated: false,
        }
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_version_one() {
        let store = InMemoryStore::new();

        let a = AccountStore::insert(&store, &new_account("a@x.com")).await.unwrap();
        let b = AccountStore::insert(&store, &new_account("b@x.com")).await.unwrap();

        assert_eq!(a.id, AccountId::new(1));
        assert_eq!(b.id, AccountId::new(2));
        assert_eq!(a.version, 1);
        assert!(a.password.plaintext().is_none());
    }

    #[tokio::test]
    async fn email_uniqueness_ignores_case() {
        let store = InMemoryStore::new();
        AccountStore::insert(&store, &new_account("ann@x.com")).await.unwrap();

        let err = AccountStore::insert(&store, &new_account("ANN@X.com")).await.unwrap_err();
        assert_eq!(err, StoreError::DuplicateEmail);

        let found = store.get_by_email("Ann@X.COM").await.unwrap();
        assert_eq!(found.email, "ann@x.com");
    }

    #[tokio::test]
    async fn stale_version_is_an_edit_conflict() {
        let store = InMemoryStore::new();
        let account = AccountStore::insert(&store, &new_account("ann@x.com")).await.unwrap();

        let mut first = account.clone();
        first.activated = true;
        let mut second = account;
        second.name = "Annie".into();

        assert_eq!(AccountStore::update(&store, &first).await.unwrap(), 2);
        assert_eq!(
            AccountStore::update(&store, &second).await.unwrap_err(),
            StoreError::EditConflict
        );

        let stored = store.get_by_id(first.id).await.unwrap();
        assert!(stored.activated);
        assert_eq!(stored.name, "Ann");
    }

    #[tokio::test]
    async fn token_lookup_honours_scope_and_expiry() {
        let store = InMemoryStore::new();
        let account = AccountStore::insert(&store, &new_account("ann@x.com")).await.unwrap();
        let now = Utc::now();

        let live = Token::generate(account.id, Duration::hours(1), Scope::Activation, now).unwrap();
        let stale = Token::generate(account.id, Duration::seconds(-1), Scope::Activation, now).unwrap();
        TokenStore::insert(&store, &live).await.unwrap();
        TokenStore::insert(&store, &stale).await.unwrap();

        assert!(store.get_for_token(&live.hash, Scope::Activation, now).await.is_ok());
        assert_eq!(
            store.get_for_token(&live.hash, Scope::Authentication, now).await.unwrap_err(),
            StoreError::NotFound
        );
        assert_eq!(
            store.get_for_token(&stale.hash, Scope::Activation, now).await.unwrap_err(),
            StoreError::NotFound
        );
    }

    #[tokio::test]
    async fn bulk_delete_is_scoped() {
        let store = InMemoryStore::new();
        let account = AccountStore::insert(&store, &new_account("ann@x.com")).await.unwrap();
        let now = Utc::now();

        for scope in [Scope::Activation, Scope::Activation, Scope::Authentication] {
            let token = Token::generate(account.id, Duration::hours(1), scope, now).unwrap();
            TokenStore::insert(&store, &token).await.unwrap();
        }

        store.delete_all_for_account(Scope::Activation, account.id).await.unwrap();

        assert_eq!(store.token_count(account.id, Scope::Activation), 0);
        assert_eq!(store.token_count(account.id, Scope::Authentication), 1);
    }

    #[tokio::test]
    async fn grants_skip_unknown_codes_and_collapse_duplicates() {
        let store = InMemoryStore::new();
        let account = store
            .insert_with_permissions(&new_account("ann@x.com"), &[MOVIES_READ])
            .await
            .unwrap();

        store
            .add_for_account(account.id, &[MOVIES_READ, Permission::new("movies:delete"), MOVIES_WRITE])
            .await
            .unwrap();

        let perms = store.all_for_account(account.id).await.unwrap();
        assert_eq!(perms.len(), 2);
        assert!(perms.include("movies:write"));
        assert!(!perms.include("movies:delete"));
    }

    #[tokio::test]
    async fn failed_insert_grants_nothing() {
        let store = InMemoryStore::new();
        let first = store
            .insert_with_permissions(&new_account("ann@x.com"), &[MOVIES_READ])
            .await
            .unwrap();

        let err = store
            .insert_with_permissions(&new_account("ANN@x.com"), &[MOVIES_WRITE])
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateEmail);

        let perms = store.all_for_account(first.id).await.unwrap();
        assert!(perms.include("movies:read"));
        assert!(!perms.include("movies:write"));
        assert!(store.all_for_account(AccountId::new(2)).await.unwrap().is_empty());
    }

    fn movie(title: &str, year: i32, genres: &[&str]) -> NewMovie {
        NewMovie {
            title: title.into(),
            year,
            runtime: greenlight_movies::Runtime(100),
            genres: genres.iter().map(|g| g.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn movie_update_bumps_version_and_rejects_stale_writes() {
        let store = InMemoryStore::new();
        let stored = MovieStore::insert(&store, &movie("Casablanca", 1942, &["drama"])).await.unwrap();
        assert_eq!(stored.version, 1);

        let mut edited = stored.clone();
        edited.year = 1943;
        assert_eq!(MovieStore::update(&store, &edited).await.unwrap(), 2);
        assert_eq!(
            MovieStore::update(&store, &edited).await.unwrap_err(),
            StoreError::EditConflict
        );

        let reread = store.get(stored.id).await.unwrap();
        assert_eq!(reread.year, 1943);
        assert_eq!(reread.created_at, stored.created_at);
    }

    #[tokio::test]
    async fn movie_delete_misses_are_not_found() {
        let store = InMemoryStore::new();
        let stored = MovieStore::insert(&store, &movie("Heat", 1995, &["crime"])).await.unwrap();

        store.delete(stored.id).await.unwrap();
        assert_eq!(store.delete(stored.id).await.unwrap_err(), StoreError::NotFound);
        assert_eq!(store.get(stored.id).await.unwrap_err(), StoreError::NotFound);
    }

    #[tokio::test]
    async fn movie_list_filters_sorts_and_pages() {
        let store = InMemoryStore::new();
        for (title, year, genres) in [
            ("The Breakfast Club", 1985, &["comedy", "drama"][..]),
            ("Black Panther", 2018, &["action", "adventure"][..]),
            ("Moana", 2016, &["animation", "adventure"][..]),
            ("Deadpool", 2016, &["action", "comedy"][..]),
        ] {
            MovieStore::insert(&store, &movie(title, year, genres)).await.unwrap();
        }

        let newest_first = MovieQuery {
            filters: greenlight_movies::Filters {
                page: 1,
                page_size: 2,
                sort: "-year".into(),
            },
            ..MovieQuery::default()
        };
        let page = store.list(&newest_first).await.unwrap();
        assert_eq!(page.total_records, 4);
        let titles: Vec<&str> = page.movies.iter().map(|m| m.title.as_str()).collect();
        // 2016 ties break on id
        assert_eq!(titles, ["Black Panther", "Moana"]);

        let adventure = MovieQuery {
            genres: vec!["adventure".into()],
            ..MovieQuery::default()
        };
        assert_eq!(store.list(&adventure).await.unwrap().total_records, 2);

        let club = MovieQuery {
            title: "club".into(),
            ..MovieQuery::default()
        };
        let page = store.list(&club).await.unwrap();
        assert_eq!(page.movies.len(), 1);
        assert_eq!(page.movies[0].title, "The Breakfast Club");
    }
}
