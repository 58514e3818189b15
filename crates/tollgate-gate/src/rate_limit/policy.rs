use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use chrono::TimeDelta;

use crate::error::GateError;

/// Derives the counter key for a request.
pub type KeyFn = Arc<dyn Fn(&HeaderMap) -> String + Send + Sync>;

/// One rate-limit policy class. Built once at startup, shared behind `Arc`.
#[derive(Clone)]
pub struct RateLimitConfig {
    name: String,
    window: TimeDelta,
    max_requests: u32,
    message: String,
    skip_successful: bool,
    skip_failed: bool,
    key_fn: KeyFn,
}

impl fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("name", &self.name)
            .field("window", &self.window)
            .field("max_requests", &self.max_requests)
            .field("skip_successful", &self.skip_successful)
            .field("skip_failed", &self.skip_failed)
            .finish_non_exhaustive()
    }
}

impl RateLimitConfig {
    pub fn new(
        name: impl Into<String>,
        window: Duration,
        max_requests: u32,
        message: impl Into<String>,
    ) -> Result<Self, GateError> {
        let name = name.into();
        if max_requests == 0 {
            return Err(GateError::Configuration(format!(
                "rate limit policy {} must allow at least one request",
                name
            )));
        }
        let window = TimeDelta::from_std(window)
            .ok()
            .filter(|w| *w > TimeDelta::zero())
            .ok_or_else(|| {
                GateError::Configuration(format!("rate limit policy {} has an invalid window", name))
            })?;

        Ok(Self {
            name,
            window,
            max_requests,
            message: message.into(),
            skip_successful: false,
            skip_failed: false,
            key_fn: Arc::new(client_ip),
        })
    }

    pub fn skip_successful(mut self, skip: bool) -> Self {
        self.skip_successful = skip;
        self
    }

    pub fn skip_failed(mut self, skip: bool) -> Self {
        self.skip_failed = skip;
        self
    }

    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = key_fn;
        self
    }

    /// Login and other credential endpoints: 5 per 15 minutes, only failures count.
    pub fn auth() -> Self {
        Self::preset(
            "auth",
            TimeDelta::minutes(15),
            5,
            "Too many authentication attempts, please try again later.",
        )
        .skip_successful(true)
    }

    /// Fallback for every other API route: 100 per minute.
    pub fn general() -> Self {
        Self::preset("general", TimeDelta::minutes(1), 100, "Too many requests, please try again later.")
    }

    /// File uploads: 10 per minute, failed uploads are free.
    pub fn upload() -> Self {
        Self::preset("upload", TimeDelta::minutes(1), 10, "Too many uploads, please try again later.")
            .skip_failed(true)
    }

    /// Messaging: 30 per minute, everything counts.
    pub fn messaging() -> Self {
        Self::preset(
            "message",
            TimeDelta::minutes(1),
            30,
            "Too many messages, please slow down.",
        )
    }

    fn preset(name: &str, window: TimeDelta, max_requests: u32, message: &str) -> Self {
        Self {
            name: name.to_string(),
            window,
            max_requests,
            message: message.to_string(),
            skip_successful: false,
            skip_failed: false,
            key_fn: Arc::new(client_ip),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn accounting(&self) -> Accounting {
        Accounting::from_flags(self.skip_successful, self.skip_failed)
    }

    /// Counter key for a request, namespaced by policy so classes never share
    /// a counter.
    pub fn key_for(&self, headers: &HeaderMap) -> String {
        format!("{}:{}", self.name, (self.key_fn)(headers))
    }
}

/// Default key: first `X-Forwarded-For` entry, else `"unknown"`.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

/// How a policy accounts for a request, from its two skip flags.
///
/// "Skip" means the request never counts toward the limit on that outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accounting {
    /// Every request counts.
    Count,
    /// Counted up front, refunded when the handler succeeds.
    SkipOnSuccess,
    /// Not counted up front, charged when the handler succeeds.
    SkipOnFailure,
    /// Nothing counts; the limiter only reports.
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl From<StatusCode> for Outcome {
    fn from(status: StatusCode) -> Self {
        if status.as_u16() < 400 {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

/// Correction applied to a counter after the handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Keep,
    Increment,
    Decrement,
}

impl Accounting {
    pub fn from_flags(skip_successful: bool, skip_failed: bool) -> Self {
        match (skip_successful, skip_failed) {
            (false, false) => Accounting::Count,
            (true, false) => Accounting::SkipOnSuccess,
            (false, true) => Accounting::SkipOnFailure,
            (true, true) => Accounting::Never,
        }
    }

    /// Whether the request is charged before the handler runs.
    pub fn counts_upfront(&self) -> bool {
        matches!(self, Accounting::Count | Accounting::SkipOnSuccess)
    }

    pub fn settle(&self, outcome: Outcome) -> Adjustment {
        match (self, outcome) {
            (Accounting::SkipOnSuccess, Outcome::Success) => Adjustment::Decrement,
            (Accounting::SkipOnFailure, Outcome::Success) => Adjustment::Increment,
            _ => Adjustment::Keep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn presets_match_documented_classes() {
        let auth = RateLimitConfig::auth();
        assert_eq!(auth.window(), TimeDelta::minutes(15));
        assert_eq!(auth.max_requests(), 5);
        assert_eq!(auth.accounting(), Accounting::SkipOnSuccess);

        assert_eq!(RateLimitConfig::general().max_requests(), 100);
        assert_eq!(RateLimitConfig::general().accounting(), Accounting::Count);
        assert_eq!(RateLimitConfig::upload().max_requests(), 10);
        assert_eq!(RateLimitConfig::upload().accounting(), Accounting::SkipOnFailure);
        assert_eq!(RateLimitConfig::messaging().max_requests(), 30);
        assert_eq!(RateLimitConfig::messaging().accounting(), Accounting::Count);
    }

    #[test]
    fn rejects_zero_limit_and_zero_window() {
        assert!(RateLimitConfig::new("x", Duration::from_secs(60), 0, "m").is_err());
        assert!(RateLimitConfig::new("x", Duration::ZERO, 1, "m").is_err());
        assert!(RateLimitConfig::new("x", Duration::from_secs(60), 1, "m").is_ok());
    }

    #[test]
    fn client_ip_takes_first_forwarded_entry() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");

        headers.insert("x-forwarded-for", HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"));
        assert_eq!(client_ip(&headers), "203.0.113.7");

        headers.insert("x-forwarded-for", HeaderValue::from_static(""));
        assert_eq!(client_ip(&headers), "unknown");
    }

    #[test]
    fn keys_are_namespaced_by_policy() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.1"));
        assert_eq!(RateLimitConfig::auth().key_for(&headers), "auth:198.51.100.1");
        assert_ne!(
            RateLimitConfig::auth().key_for(&headers),
            RateLimitConfig::general().key_for(&headers)
        );
    }

    #[test]
    fn custom_key_fn() {
        let policy = RateLimitConfig::general()
            .with_key_fn(Arc::new(|h: &HeaderMap| {
                h.get("x-api-key").and_then(|v| v.to_str().ok()).unwrap_or("anon").to_string()
            }));
        assert_eq!(policy.key_for(&HeaderMap::new()), "general:anon");
    }

    #[test]
    fn settlement_table() {
        use Adjustment::*;
        use Outcome::*;

        let cases = [
            (Accounting::Count, true, Keep, Keep),
            (Accounting::SkipOnSuccess, true, Decrement, Keep),
            (Accounting::SkipOnFailure, false, Increment, Keep),
            (Accounting::Never, false, Keep, Keep),
        ];
        for (accounting, upfront, on_success, on_failure) in cases {
            assert_eq!(accounting.counts_upfront(), upfront, "{:?}", accounting);
            assert_eq!(accounting.settle(Success), on_success, "{:?}", accounting);
            assert_eq!(accounting.settle(Failure), on_failure, "{:?}", accounting);
        }
    }

    #[test]
    fn outcome_boundary_is_400() {
        assert_eq!(Outcome::from(StatusCode::FOUND), Outcome::Success);
        assert_eq!(Outcome::from(StatusCode::BAD_REQUEST), Outcome::Failure);
        assert_eq!(Outcome::from(StatusCode::INTERNAL_SERVER_ERROR), Outcome::Failure);
    }
}
