//! Process configuration, read from the environment.
//!
//! Every setting has a default so the server starts with nothing configured;
//! defaults that matter in production are announced with a warning.

use std::net::SocketAddr;

use chrono::Duration;
use thiserror::Error;

pub const DEFAULT_ADDR: &str = "0.0.0.0:4000";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 25;
pub const DEFAULT_MAIL_SENDER: &str = "Greenlight <no-reply@greenlight.local>";
pub const DEFAULT_SESSION_LIFETIME_SECS: i64 = 12 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl core::fmt::Display for Environment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(ConfigError::invalid(
                "GREENLIGHT_ENV",
                other,
                "expected development|staging|production",
            )),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub environment: Environment,
    /// `None` runs on the in-memory stores.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub mail_sender: String,
    pub session_lifetime: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let addr_raw = get("GREENLIGHT_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = addr_raw
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::invalid("GREENLIGHT_ADDR", &addr_raw, e.to_string()))?;

        let environment = match get("GREENLIGHT_ENV") {
            Some(raw) => raw.parse()?,
            None => Environment::Development,
        };

        let database_url = get("DATABASE_URL");
        if database_url.is_none() {
            tracing::warn!("DATABASE_URL not set; accounts will live in memory only");
        }

        let database_max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    ConfigError::invalid("DATABASE_MAX_CONNECTIONS", &raw, "expected a positive integer")
                })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let mail_sender = get("GREENLIGHT_MAIL_SENDER").unwrap_or_else(|| {
            if environment == Environment::Production {
                tracing::warn!("GREENLIGHT_MAIL_SENDER not set; using placeholder sender");
            }
            DEFAULT_MAIL_SENDER.to_string()
        });

        let session_lifetime = match get("GREENLIGHT_SESSION_LIFETIME_SECS") {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|n| *n > 0)
                .map(Duration::seconds)
                .ok_or_else(|| {
                    ConfigError::invalid(
                        "GREENLIGHT_SESSION_LIFETIME_SECS",
                        &raw,
                        "expected a positive number of seconds",
                    )
                })?,
            None => Duration::seconds(DEFAULT_SESSION_LIFETIME_SECS),
        };

        Ok(Self {
            addr,
            environment,
            database_url,
            database_max_connections,
            mail_sender,
            session_lifetime,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let cfg = config(&[]).unwrap();

        assert_eq!(cfg.addr, DEFAULT_ADDR.parse().unwrap());
        assert_eq!(cfg.environment, Environment::Development);
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.database_max_connections, 25);
        assert_eq!(cfg.mail_sender, DEFAULT_MAIL_SENDER);
        assert_eq!(cfg.session_lifetime, Duration::hours(12));
    }

    #[test]
    fn explicit_values_override_defaults() {
        let cfg = config(&[
            ("GREENLIGHT_ADDR", "127.0.0.1:8080"),
            ("GREENLIGHT_ENV", "production"),
            ("DATABASE_URL", "postgres://localhost/greenlight"),
            ("DATABASE_MAX_CONNECTIONS", "5"),
            ("GREENLIGHT_MAIL_SENDER", "ops@example.com"),
            ("GREENLIGHT_SESSION_LIFETIME_SECS", "60"),
        ])
        .unwrap();

        assert_eq!(cfg.addr.port(), 8080);
        assert_eq!(cfg.environment, Environment::Production);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/greenlight"));
        assert_eq!(cfg.database_max_connections, 5);
        assert_eq!(cfg.mail_sender, "ops@example.com");
        assert_eq!(cfg.session_lifetime, Duration::seconds(60));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let cfg = config(&[("DATABASE_URL", "  ")]).unwrap();
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(config(&[("GREENLIGHT_ADDR", "nowhere")]).is_err());
        assert!(config(&[("GREENLIGHT_ENV", "qa")]).is_err());
        assert!(config(&[("DATABASE_MAX_CONNECTIONS", "0")]).is_err());
        assert!(config(&[("GREENLIGHT_SESSION_LIFETIME_SECS", "-1")]).is_err());
    }
}
