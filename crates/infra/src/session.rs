//! Server-side sessions.
//!
//! A [`SessionManager`] owns the session records. Each request gets a
//! [`Session`] handle loaded from the client's identifier; the HTTP layer
//! commits it back after the handler ran.
//!
//! Identifiers are 32 random bytes, base-32 encoded. [`Session::renew`] swaps
//! the identifier and drops the old record, so an identifier planted before
//! login is worthless afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use data_encoding::BASE32_NOPAD;
use rand::{RngCore, rngs::OsRng};
use serde_json::Value;
use thiserror::Error;

use greenlight_core::DomainError;

/// Session key under which the logged-in account id is stored.
pub const AUTHENTICATED_ACCOUNT_KEY: &str = "authenticatedUserID";

/// Session key carrying a one-shot notice for the next page render.
pub const FLASH_KEY: &str = "flash";

const SESSION_ID_BYTES: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("random source unavailable: {0}")]
    Entropy(String),

    #[error("session store lock poisoned")]
    Poisoned,
}

impl From<SessionError> for DomainError {
    fn from(err: SessionError) -> Self {
        DomainError::unrecoverable(err.to_string())
    }
}

#[derive(Debug, Clone)]
struct Record {
    values: HashMap<String, Value>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    id: Option<String>,
    retired_id: Option<String>,
    values: HashMap<String, Value>,
    modified: bool,
}

/// Request-scoped view of one session. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct Session {
    state: Arc<Mutex<State>>,
}

impl Session {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> Option<String> {
        self.lock().id.clone()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.lock().values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().values.get(key).cloned()
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.lock().values.get(key).and_then(Value::as_i64)
    }

    pub fn put(&self, key: &str, value: impl Into<Value>) {
        let mut state = self.lock();
        state.values.insert(key.to_string(), value.into());
        state.modified = true;
    }

    pub fn remove(&self, key: &str) {
        let mut state = self.lock();
        if state.values.remove(key).is_some() {
            state.modified = true;
        }
    }

    /// Read and remove `key` in one step.
    pub fn pop(&self, key: &str) -> Option<Value> {
        let mut state = self.lock();
        let value = state.values.remove(key);
        if value.is_some() {
            state.modified = true;
        }
        value
    }

    pub fn pop_string(&self, key: &str) -> Option<String> {
        match self.pop(key)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Issue a new identifier, keeping the data.
    pub fn renew(&self) -> Result<(), SessionError> {
        let fresh = new_session_id()?;
        let mut state = self.lock();
        if let Some(old) = state.id.replace(fresh) {
            state.retired_id.get_or_insert(old);
        }
        state.modified = true;
        Ok(())
    }

    pub fn is_modified(&self) -> bool {
        self.lock().modified
    }
}

fn new_session_id() -> Result<String, SessionError> {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| SessionError::Entropy(e.to_string()))?;
    Ok(BASE32_NOPAD.encode(&bytes))
}

/// In-memory session store with a fixed lifetime per record.
#[derive(Debug)]
pub struct SessionManager {
    records: RwLock<HashMap<String, Record>>,
    lifetime: Duration,
}

impl SessionManager {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Load the session named by `id`, or a fresh empty one.
    ///
    /// Unknown and expired identifiers are treated alike.
    pub fn load(&self, id: Option<&str>) -> Result<Session, SessionError> {
        let now = Utc::now();
        let records = self.records.read().map_err(|_| SessionError::Poisoned)?;

        let state = match id.and_then(|id| records.get(id).map(|r| (id, r))) {
            Some((id, record)) if record.expires_at > now => State {
                id: Some(id.to_string()),
                retired_id: None,
                values: record.values.clone(),
                modified: false,
            },
            _ => State::default(),
        };

        Ok(Session {
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Persist `session` if it changed.
    ///
    /// Returns the identifier the client must now hold, or `None` when nothing
    /// needs to be sent back.
    pub fn commit(&self, session: &Session) -> Result<Option<String>, SessionError> {
        let mut state = session.lock();
        if !state.modified {
            return Ok(None);
        }

        let mut records = self.records.write().map_err(|_| SessionError::Poisoned)?;
        if let Some(retired) = state.retired_id.take() {
            records.remove(&retired);
        }

        let id = match state.id.clone() {
            Some(id) => id,
            None => {
                let id = new_session_id()?;
                state.id = Some(id.clone());
                id
            }
        };

        let now = Utc::now();
        records.retain(|_, r| r.expires_at > now);
        records.insert(
            id.clone(),
            Record {
                values: state.values.clone(),
                expires_at: now + self.lifetime,
            },
        );
        state.modified = false;

        Ok(Some(id))
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
