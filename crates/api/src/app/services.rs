//! Service wiring: stores, mailer, movie catalogue, session manager and the
//! shutdown tracker.

use std::sync::Arc;

use anyhow::Context;

use greenlight_infra::{
    AccountService, BackgroundRunner, LifecycleConfig, LogMailer, Mailer, MovieService,
    PostgresStore, SessionManager, ShutdownTracker, Stores,
};

use crate::config::{Config, Environment};

/// Everything a handler or middleware needs, shared behind one `Arc`.
pub struct AppServices {
    pub accounts: AccountService,
    pub movies: MovieService,
    pub sessions: Arc<SessionManager>,
    pub tracker: Arc<ShutdownTracker>,
    pub environment: Environment,
    pub version: &'static str,
}

impl AppServices {
    pub fn new(stores: &Stores, mailer: Arc<dyn Mailer>, config: &Config) -> Self {
        let tracker = ShutdownTracker::new();
        let accounts = AccountService::new(
            stores,
            mailer,
            BackgroundRunner::new(Arc::clone(&tracker)),
            LifecycleConfig::default(),
        );

        Self {
            accounts,
            movies: MovieService::new(Arc::clone(&stores.movies)),
            sessions: Arc::new(SessionManager::new(config.session_lifetime)),
            tracker,
            environment: config.environment,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// In-memory stores; used when no database is configured and by tests.
    pub fn in_memory(mailer: Arc<dyn Mailer>, config: &Config) -> Self {
        Self::new(&Stores::in_memory(), mailer, config)
    }
}

impl core::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppServices")
            .field("environment", &self.environment)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Build services from process configuration.
///
/// Postgres when `DATABASE_URL` is set (schema ensured on start), in-memory
/// otherwise. Message bodies are only written to the log in development since
/// they carry activation tokens.
pub async fn build_services(config: &Config) -> anyhow::Result<AppServices> {
    let mailer: Arc<dyn Mailer> = Arc::new(LogMailer::new(
        config.mail_sender.clone(),
        config.environment == Environment::Development,
    ));

    let stores = match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url, config.database_max_connections)
                .await
                .context("failed to connect to postgres")?;
            store
                .ensure_schema()
                .await
                .context("failed to apply schema")?;
            tracing::info!("database connection pool established");
            Stores::postgres(store)
        }
        None => Stores::in_memory(),
    };

    Ok(AppServices::new(&stores, mailer, config))
}
