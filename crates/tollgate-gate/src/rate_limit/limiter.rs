use std::sync::Arc;

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use tracing::warn;

use tollgate_types::api::RateLimitedBody;

use crate::error::GateError;
use crate::rate_limit::policy::{Adjustment, Outcome, RateLimitConfig};
use crate::rate_limit::store::{CounterStore, MemoryCounterStore};

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Fixed-window rate limiter over a shared [`CounterStore`].
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

pub enum Decision {
    Allow(Ticket),
    Deny(Denial),
}

/// Handed out with an allowed request; settles the count once the outcome
/// is known and stamps the `X-RateLimit-*` headers.
#[derive(Debug, Clone)]
pub struct Ticket {
    key: String,
    policy: Arc<RateLimitConfig>,
    reset_time: DateTime<Utc>,
    remaining: u32,
}

/// A rejected request. Renders as the 429 response.
#[derive(Debug, Clone)]
pub struct Denial {
    pub limit: u32,
    pub reset_time: DateTime<Utc>,
    pub retry_after: u64,
    pub message: String,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCounterStore::new()))
    }

    pub fn store(&self) -> Arc<dyn CounterStore> {
        self.store.clone()
    }

    pub fn check(
        &self,
        headers: &HeaderMap,
        policy: &Arc<RateLimitConfig>,
    ) -> Result<Decision, GateError> {
        self.check_at(headers, policy, Utc::now())
    }

    pub fn check_at(
        &self,
        headers: &HeaderMap,
        policy: &Arc<RateLimitConfig>,
        now: DateTime<Utc>,
    ) -> Result<Decision, GateError> {
        let key = policy.key_for(headers);
        let accounting = policy.accounting();
        let limit = policy.max_requests();

        let admission = self.store.admit(
            &key,
            policy.window(),
            limit,
            accounting.counts_upfront(),
            now,
        )?;

        if !admission.allowed {
            let millis = (admission.reset_time - now).num_milliseconds().max(0) as u64;
            let retry_after = millis.div_ceil(1000).max(1);
            warn!(
                key = %key,
                policy = policy.name(),
                retry_after,
                "Rate limit exceeded"
            );
            return Ok(Decision::Deny(Denial {
                limit,
                reset_time: admission.reset_time,
                retry_after,
                message: policy.message().to_string(),
            }));
        }

        // Report remaining as if this request counts, whether or not it was
        // charged up front.
        let used = if accounting.counts_upfront() {
            admission.count
        } else {
            admission.count + 1
        };

        Ok(Decision::Allow(Ticket {
            key,
            policy: policy.clone(),
            reset_time: admission.reset_time,
            remaining: limit.saturating_sub(used),
        }))
    }

    /// Settle a ticket once the downstream handler has produced a status.
    pub fn reconcile(&self, ticket: &Ticket, outcome: Outcome) -> Result<(), GateError> {
        let adjustment = ticket.policy.accounting().settle(outcome);
        if adjustment == Adjustment::Keep {
            return Ok(());
        }
        self.store.adjust(&ticket.key, ticket.reset_time, adjustment)
    }
}

impl Ticket {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn reset_time(&self) -> DateTime<Utc> {
        self.reset_time
    }

    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        insert_limit_headers(
            headers,
            self.policy.max_requests(),
            self.remaining,
            self.reset_time,
        );
    }
}

impl IntoResponse for Denial {
    fn into_response(self) -> Response {
        let body = RateLimitedBody {
            error: self.message,
            retry_after: self.retry_after,
        };
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        let headers = response.headers_mut();
        insert_limit_headers(headers, self.limit, 0, self.reset_time);
        headers.insert(header::RETRY_AFTER, HeaderValue::from(self.retry_after));
        response
    }
}

fn insert_limit_headers(
    headers: &mut HeaderMap,
    limit: u32,
    remaining: u32,
    reset_time: DateTime<Utc>,
) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_time.timestamp_millis()));
}
