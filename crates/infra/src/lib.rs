//! Infrastructure layer: row stores, the token, permission and movie
//! services, the account lifecycle, sessions, mail and deferred side effects.

pub mod accounts;
pub mod background;
pub mod mailer;
pub mod movies;
pub mod permissions;
pub mod session;
pub mod store;
pub mod tokens;

pub use accounts::{AccountService, Credentials, LifecycleConfig, LoginOutcome, Registration};
pub use background::{BackgroundRunner, ShutdownTracker};
pub use mailer::{LogMailer, Mailer, MailerError, RecordingMailer};
pub use movies::MovieService;
pub use permissions::PermissionService;
pub use session::{Session, SessionError, SessionManager};
pub use store::{
    AccountStore, InMemoryStore, MoviePage, MovieStore, PermissionStore, PostgresStore, StoreError,
    Stores, TokenStore,
};
pub use tokens::TokenService;
