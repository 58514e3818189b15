use std::time::Duration;

use crate::error::GateError;
use crate::session::SessionCheck;

/// Placeholder secrets that MUST NOT be used to sign sessions.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Gate settings, read from `TOLLGATE_*` environment variables.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub session_secret: String,
    pub environment: Environment,
    pub cookie_name: String,
    pub session_check: SessionCheck,
    pub sweep_interval: Duration,
}

impl GateConfig {
    pub fn from_env() -> Result<Self, GateError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, so tests never touch the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let session_secret = lookup("TOLLGATE_SESSION_SECRET").unwrap_or_default();
        if session_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&session_secret.as_str()) {
            return Err(GateError::Configuration(
                "TOLLGATE_SESSION_SECRET is unset or still a placeholder".into(),
            ));
        }
        if session_secret.len() < MIN_SECRET_LEN {
            return Err(GateError::Configuration(format!(
                "TOLLGATE_SESSION_SECRET must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }

        let environment = match lookup("TOLLGATE_ENV").as_deref() {
            None | Some("development") => Environment::Development,
            Some("production") => Environment::Production,
            Some(other) => {
                return Err(GateError::Configuration(format!(
                    "TOLLGATE_ENV must be development or production, got {}",
                    other
                )));
            }
        };

        let session_check = match lookup("TOLLGATE_SESSION_CHECK").as_deref() {
            None | Some("signature") => SessionCheck::SignatureOnly,
            Some("live") => SessionCheck::LiveRecord,
            Some(other) => {
                return Err(GateError::Configuration(format!(
                    "TOLLGATE_SESSION_CHECK must be signature or live, got {}",
                    other
                )));
            }
        };

        let sweep_secs: u64 = match lookup("TOLLGATE_SWEEP_INTERVAL_SECS") {
            Some(v) => v.parse().map_err(|_| {
                GateError::Configuration(format!("TOLLGATE_SWEEP_INTERVAL_SECS is not a number: {}", v))
            })?,
            None => 60,
        };
        if sweep_secs == 0 {
            return Err(GateError::Configuration(
                "TOLLGATE_SWEEP_INTERVAL_SECS must be positive".into(),
            ));
        }

        Ok(Self {
            session_secret,
            environment,
            cookie_name: lookup("TOLLGATE_COOKIE_NAME").unwrap_or_else(|| "session".into()),
            session_check,
            sweep_interval: Duration::from_secs(sweep_secs),
        })
    }
}
