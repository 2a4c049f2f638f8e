//! Account lifecycle.
//!
//! ```text
//! Anonymous --register--> Registered (activated = false) --activate--> Activated
//! LoggedOut <--login / logout--> LoggedIn      (session-bound, orthogonal)
//! ```
//!
//! Every transition follows the same shape: validate, run the domain
//! operation against the stores, schedule side effects, return.

use std::sync::Arc;

use chrono::Duration;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use greenlight_auth::account::{validate_login, validate_new_account};
use greenlight_auth::permissions::MOVIES_READ;
use greenlight_auth::token::validate_token_plaintext;
use greenlight_auth::{Account, NewAccount, Password, Permission, Permissions, Scope, Token};
use greenlight_core::{AccountId, DomainError, DomainResult, Validator};

use crate::background::BackgroundRunner;
use crate::mailer::{Mailer, USER_WELCOME};
use crate::permissions::PermissionService;
use crate::session::{AUTHENTICATED_ACCOUNT_KEY, Session};
use crate::store::{AccountStore, StoreError, Stores};
use crate::tokens::TokenService;

/// Domain constants of the lifecycle.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub activation_ttl: Duration,
    pub authentication_ttl: Duration,
    pub default_permissions: Vec<Permission>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            activation_ttl: Duration::days(3),
            authentication_ttl: Duration::hours(24),
            default_permissions: vec![MOVIES_READ],
        }
    }
}

/// Registration input. `password_confirmation` is compared, never stored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub account: Account,
    pub token: Token,
}

#[derive(Clone)]
pub struct AccountService {
    accounts: Arc<dyn AccountStore>,
    tokens: TokenService,
    permissions: PermissionService,
    mailer: Arc<dyn Mailer>,
    runner: BackgroundRunner,
    config: LifecycleConfig,
}

impl AccountService {
    pub fn new(
        stores: &Stores,
        mailer: Arc<dyn Mailer>,
        runner: BackgroundRunner,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            accounts: Arc::clone(&stores.accounts),
            tokens: TokenService::new(Arc::clone(&stores.tokens), Arc::clone(&stores.accounts)),
            permissions: PermissionService::new(Arc::clone(&stores.permissions)),
            mailer,
            runner,
            config,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn permissions(&self) -> &PermissionService {
        &self.permissions
    }

    /// Create an unactivated account with the default grants and mail it an
    /// activation token.
    pub async fn register(&self, input: Registration) -> DomainResult<Account> {
        let password = hash_off_thread(input.password).await?;

        let mut candidate = NewAccount {
            name: input.name,
            email: input.email,
            password,
            activated: false,
        };

        let mut v = Validator::new();
        validate_new_account(&mut v, &candidate, &input.password_confirmation)?;
        v.into_result()?;
        candidate.password.forget_plaintext();

        let account = self
            .accounts
            .insert_with_permissions(&candidate, &self.config.default_permissions)
            .await?;

        let token = self
            .tokens
            .issue(account.id, self.config.activation_ttl, Scope::Activation)
            .await?;

        let mailer = Arc::clone(&self.mailer);
        let recipient = account.email.clone();
        let data = json!({
            "activationToken": token.plaintext,
            "userID": account.id,
        });
        self.runner.run("welcome_email", async move {
            mailer.send(&recipient, USER_WELCOME, &data).await?;
            Ok(())
        });

        info!(account_id = %account.id, "account registered");
        Ok(account)
    }

    /// Redeem an activation token.
    ///
    /// A second redemption of the same token fails with `RecordNotFound`; a
    /// concurrent update of the account surfaces as `EditConflict`.
    pub async fn activate(&self, token_plaintext: &str) -> DomainResult<Account> {
        let mut v = Validator::new();
        validate_token_plaintext(&mut v, token_plaintext);
        v.into_result()?;

        let mut account = self.tokens.resolve(token_plaintext, Scope::Activation).await?;

        account.activated = true;
        account.version = self.accounts.update(&account).await?;

        self.tokens.revoke_all(Scope::Activation, account.id).await?;

        info!(account_id = %account.id, "account activated");
        Ok(account)
    }

    /// Check an email/password pair.
    ///
    /// Never reveals whether the email exists: both a miss and a wrong
    /// password are `InvalidCredentials`.
    pub async fn authenticate(&self, credentials: &Credentials) -> DomainResult<Account> {
        let mut v = Validator::new();
        validate_login(&mut v, &credentials.email, &credentials.password);
        v.into_result()?;

        let account = match self.accounts.get_by_email(&credentials.email).await {
            Ok(account) => account,
            Err(StoreError::NotFound) => return Err(DomainError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };

        if verify_off_thread(account.password.clone(), credentials.password.clone()).await? {
            Ok(account)
        } else {
            warn!(account_id = %account.id, "password mismatch");
            Err(DomainError::InvalidCredentials)
        }
    }

    /// Authenticate, rotate the session identifier, bind the account to the
    /// session and hand out an authentication token.
    ///
    /// Failed credentials leave the session untouched.
    pub async fn login(&self, credentials: &Credentials, session: &Session) -> DomainResult<LoginOutcome> {
        let account = self.authenticate(credentials).await?;

        session.renew()?;
        session.put(AUTHENTICATED_ACCOUNT_KEY, account.id.get());

        let token = self
            .tokens
            .issue(account.id, self.config.authentication_ttl, Scope::Authentication)
            .await?;

        info!(account_id = %account.id, "account logged in");
        Ok(LoginOutcome { account, token })
    }

    /// Stateless variant of login: a fresh authentication token, no session.
    pub async fn issue_authentication_token(&self, credentials: &Credentials) -> DomainResult<Token> {
        let account = self.authenticate(credentials).await?;
        self.tokens
            .issue(account.id, self.config.authentication_ttl, Scope::Authentication)
            .await
    }

    pub async fn logout(&self, session: &Session) -> DomainResult<()> {
        let account_id = session.get_i64(AUTHENTICATED_ACCOUNT_KEY);

        session.renew()?;
        session.remove(AUTHENTICATED_ACCOUNT_KEY);

        if let Some(id) = account_id {
            info!(account_id = id, "account logged out");
        }
        Ok(())
    }

    /// Owner of a bearer token presented on a protected request.
    pub async fn authenticate_bearer(&self, plaintext: &str) -> DomainResult<Account> {
        let mut v = Validator::new();
        validate_token_plaintext(&mut v, plaintext);
        v.into_result()?;

        self.tokens.resolve(plaintext, Scope::Authentication).await
    }

    /// Account bound to a session, fetched fresh.
    pub async fn account_for_session(&self, id: AccountId) -> DomainResult<Account> {
        Ok(self.accounts.get_by_id(id).await?)
    }

    pub async fn permissions_for(&self, id: AccountId) -> DomainResult<Permissions> {
        self.permissions.list_for(id).await
    }
}

// Argon2 runs on the blocking pool, never on a runtime worker.

async fn hash_off_thread(plaintext: String) -> DomainResult<Password> {
    tokio::task::spawn_blocking(move || {
        let mut password = Password::default();
        password.set(&plaintext).map(|()| password)
    })
    .await
    .map_err(|e| DomainError::unrecoverable(format!("password hashing task failed: {e}")))?
    .map_err(|e| DomainError::unrecoverable(e.to_string()))
}

async fn verify_off_thread(password: Password, candidate: String) -> DomainResult<bool> {
    tokio::task::spawn_blocking(move || password.matches(&candidate))
        .await
        .map_err(|e| DomainError::unrecoverable(format!("password verification task failed: {e}")))?
        .map_err(|e| DomainError::unrecoverable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration as StdDuration, Instant};

    use greenlight_auth::permissions::MOVIES_WRITE;

    use super::*;
    use crate::background::ShutdownTracker;
    use crate::mailer::RecordingMailer;
    use crate::session::SessionManager;
    use crate::store::{InMemoryStore, TokenStore};

    struct Harness {
        service: AccountService,
        store: Arc<InMemoryStore>,
        mailer: Arc<RecordingMailer>,
        tracker: Arc<ShutdownTracker>,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let stores = Stores {
                accounts: store.clone(),
                tokens: store.clone(),
                permissions: store.clone(),
                movies: store.clone(),
            };
            let mailer = Arc::new(RecordingMailer::new("Greenlight <no-reply@test>"));
            let tracker = ShutdownTracker::new();
            let service = AccountService::new(
                &stores,
                mailer.clone(),
                BackgroundRunner::new(Arc::clone(&tracker)),
                LifecycleConfig::default(),
            );
            Self {
                service,
                store,
                mailer,
                tracker,
            }
        }

        async fn settle(&self) {
            tokio::time::timeout(StdDuration::from_secs(5), self.tracker.wait())
                .await
                .unwrap();
        }

        async fn activation_token_for(&self, email: &str) -> String {
            self.settle().await;
            let bags = self.mailer.data_for(email);
            bags.last().unwrap()["activationToken"].as_str().unwrap().to_string()
        }
    }

    fn ann() -> Registration {
        Registration {
            name: "Ann".into(),
            email: "ann@x.com".into(),
            password: "longenough1".into(),
            password_confirmation: "longenough1".into(),
        }
    }

    fn ann_credentials(password: &str) -> Credentials {
        Credentials {
            email: "ann@x.com".into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn register_creates_inactive_account_with_defaults() {
        let h = Harness::new();
        let account = h.service.register(ann()).await.unwrap();
        h.settle().await;

        assert!(!account.activated);
        assert!(account.password.plaintext().is_none());
        assert_eq!(h.store.token_count(account.id, Scope::Activation), 1);
        assert_eq!(h.mailer.messages().len(), 1);
        assert_eq!(h.mailer.data_for("ann@x.com")[0]["userID"], account.id.get());

        let perms = h.service.permissions_for(account.id).await.unwrap();
        assert!(perms.include("movies:read"));
        assert_eq!(perms.len(), 1);
    }

    #[tokio::test]
    async fn register_reports_field_errors() {
        let h = Harness::new();
        let err = h
            .service
            .register(Registration {
                name: String::new(),
                email: "nope".into(),
                password: "longenough1".into(),
                password_confirmation: "longenough2".into(),
            })
            .await
            .unwrap_err();

        let DomainError::ValidationFailed(errors) = err else {
            panic!("expected ValidationFailed, got {err:?}");
        };
        assert_eq!(errors["name"], "must be provided");
        assert_eq!(errors["email"], "must be a valid email address");
        assert_eq!(errors["password"], "passwords do not match");
    }

    #[tokio::test]
    async fn empty_confirmation_blocks_registration() {
        let h = Harness::new();
        let mut input = ann();
        input.password_confirmation = String::new();

        let DomainError::ValidationFailed(errors) = h.service.register(input).await.unwrap_err() else {
            panic!("expected ValidationFailed");
        };
        assert_eq!(errors["password"], "passwords do not match");

        h.settle().await;
        assert!(h.mailer.messages().is_empty());
        assert_eq!(
            h.service.authenticate(&ann_credentials("longenough1")).await.unwrap_err(),
            DomainError::InvalidCredentials
        );
    }

    #[tokio::test]
    async fn password_work_does_not_block_other_tasks() {
        let (hashed, other_task_ran_at) = tokio::join!(
            async {
                let password = hash_off_thread("longenough1".into()).await;
                (password, Instant::now())
            },
            async {
                tokio::task::yield_now().await;
                Instant::now()
            },
        );

        let (password, hashed_at) = hashed;
        assert!(other_task_ran_at < hashed_at);

        let password = password.unwrap();
        assert!(verify_off_thread(password.clone(), "longenough1".into()).await.unwrap());
        assert!(!verify_off_thread(password, "longenough2".into()).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_email_leaves_the_first_account_untouched() {
        let h = Harness::new();
        let first = h.service.register(ann()).await.unwrap();

        let mut shouting = ann();
        shouting.email = "ANN@X.COM".into();
        assert_eq!(h.service.register(shouting).await.unwrap_err(), DomainError::DuplicateEmail);
        h.settle().await;

        assert_eq!(h.store.token_count(first.id, Scope::Activation), 1);
        assert!(h.service.permissions_for(first.id).await.unwrap().include("movies:read"));
        assert_eq!(h.mailer.messages().len(), 1);
    }

    #[tokio::test]
    async fn activation_is_single_use() {
        let h = Harness::new();
        let account = h.service.register(ann()).await.unwrap();
        let token = h.activation_token_for("ann@x.com").await;

        let activated = h.service.activate(&token).await.unwrap();
        assert!(activated.activated);
        assert_eq!(activated.version, account.version + 1);
        assert_eq!(h.store.token_count(account.id, Scope::Activation), 0);

        assert_eq!(h.service.activate(&token).await.unwrap_err(), DomainError::RecordNotFound);
    }

    #[tokio::test]
    async fn activation_checks_token_shape_first() {
        let h = Harness::new();

        let DomainError::ValidationFailed(errors) = h.service.activate("short").await.unwrap_err() else {
            panic!("expected ValidationFailed");
        };
        assert_eq!(errors["token"], "must be 26 bytes long");
    }

    #[tokio::test]
    async fn concurrent_updates_from_one_version_conflict() {
        let h = Harness::new();
        let account = h.service.register(ann()).await.unwrap();

        let mut a = account.clone();
        a.activated = true;
        let mut b = account;
        b.name = "Annie".into();

        let (ra, rb) = tokio::join!(h.store.update(&a), h.store.update(&b));
        let outcomes = [ra, rb];

        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes.contains(&Err(StoreError::EditConflict)));
    }

    #[tokio::test]
    async fn login_binds_account_and_rotates_session() {
        let h = Harness::new();
        let account = h.service.register(ann()).await.unwrap();
        let sessions = SessionManager::new(Duration::hours(12));

        let session = sessions.load(None).unwrap();
        session.put("theme", "dark");
        let planted = sessions.commit(&session).unwrap().unwrap();

        let session = sessions.load(Some(&planted)).unwrap();
        let outcome = h.service.login(&ann_credentials("longenough1"), &session).await.unwrap();

        assert_eq!(outcome.account.id, account.id);
        assert_eq!(outcome.token.scope, Scope::Authentication);
        assert_eq!(session.get_i64(AUTHENTICATED_ACCOUNT_KEY), Some(account.id.get()));
        assert_ne!(session.id().as_deref(), Some(planted.as_str()));

        let owner = h.service.authenticate_bearer(&outcome.token.plaintext).await.unwrap();
        assert_eq!(owner.id, account.id);
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials_without_session_mutation() {
        let h = Harness::new();
        h.service.register(ann()).await.unwrap();
        let sessions = SessionManager::new(Duration::hours(12));
        let session = sessions.load(None).unwrap();

        let err = h.service.login(&ann_credentials("wrongpassword"), &session).await.unwrap_err();

        assert_eq!(err, DomainError::InvalidCredentials);
        assert!(!session.is_modified());
        assert_eq!(session.id(), None);
    }

    #[tokio::test]
    async fn unknown_email_is_invalid_credentials() {
        let h = Harness::new();
        let err = h
            .service
            .issue_authentication_token(&Credentials {
                email: "ghost@x.com".into(),
                password: "longenough1".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::InvalidCredentials);
    }

    #[tokio::test]
    async fn logout_clears_binding_and_rotates() {
        let h = Harness::new();
        h.service.register(ann()).await.unwrap();
        let sessions = SessionManager::new(Duration::hours(12));
        let session = sessions.load(None).unwrap();
        h.service.login(&ann_credentials("longenough1"), &session).await.unwrap();
        let logged_in_id = session.id();

        h.service.logout(&session).await.unwrap();

        assert!(!session.exists(AUTHENTICATED_ACCOUNT_KEY));
        assert_ne!(session.id(), logged_in_id);
    }

    #[tokio::test]
    async fn activation_token_is_not_a_bearer_token() {
        let h = Harness::new();
        h.service.register(ann()).await.unwrap();
        let token = h.activation_token_for("ann@x.com").await;

        assert_eq!(
            h.service.authenticate_bearer(&token).await.unwrap_err(),
            DomainError::RecordNotFound
        );
    }

    #[tokio::test]
    async fn expired_bearer_token_is_rejected() {
        let h = Harness::new();
        let account = h.service.register(ann()).await.unwrap();
        let stale = Token::generate(
            account.id,
            Duration::seconds(-1),
            Scope::Authentication,
            chrono::Utc::now(),
        )
        .unwrap();
        TokenStore::insert(&*h.store, &stale).await.unwrap();

        assert_eq!(
            h.service.authenticate_bearer(&stale.plaintext).await.unwrap_err(),
            DomainError::RecordNotFound
        );
    }

    #[tokio::test]
    async fn permission_changes_apply_on_the_next_check() {
        let h = Harness::new();
        let account = h.service.register(ann()).await.unwrap();

        assert!(!h.service.permissions().has_permission(account.id, &MOVIES_WRITE).await.unwrap());
        h.service.permissions().grant(account.id, &[MOVIES_WRITE]).await.unwrap();
        assert!(h.service.permissions().has_permission(account.id, &MOVIES_WRITE).await.unwrap());
    }
}
