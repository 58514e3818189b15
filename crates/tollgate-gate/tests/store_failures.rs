mod common;

use std::sync::Arc;

use anyhow::anyhow;
use axum::body::Body;
use axum::http::{StatusCode, header};
use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use common::*;
use tollgate_db::{Database, SessionStore};
use tollgate_gate::GateError;
use tollgate_gate::rate_limit::{Adjustment, Admission, CounterRecord, CounterStore, RateLimiter};
use tollgate_gate::routes::RouteTable;
use tollgate_gate::session::{SessionCheck, SessionManager, SessionTokenCodec};
use tollgate_types::{Role, SessionClaims, SessionRecord};

/// Accepts writes, fails every read.
struct UnreadableSessions;

impl SessionStore for UnreadableSessions {
    fn load_session(&self, _token: &str) -> anyhow::Result<Option<SessionRecord>> {
        Err(anyhow!("database is locked"))
    }

    fn persist_session(&self, _record: &SessionRecord) -> anyhow::Result<()> {
        Ok(())
    }

    fn sessions_for_user(&self, _user_id: Uuid) -> anyhow::Result<Vec<SessionRecord>> {
        Err(anyhow!("database is locked"))
    }

    fn delete_sessions_for_user(&self, _user_id: Uuid) -> anyhow::Result<usize> {
        Err(anyhow!("database is locked"))
    }
}

struct PoisonedCounters;

impl CounterStore for PoisonedCounters {
    fn admit(
        &self,
        _key: &str,
        _window: TimeDelta,
        _limit: u32,
        _charge: bool,
        _now: DateTime<Utc>,
    ) -> Result<Admission, GateError> {
        Err(GateError::StoreUnavailable("counter lock poisoned".into()))
    }

    fn adjust(
        &self,
        _key: &str,
        _window_reset: DateTime<Utc>,
        _adjustment: Adjustment,
    ) -> Result<(), GateError> {
        Err(GateError::StoreUnavailable("counter lock poisoned".into()))
    }

    fn get(&self, _key: &str, _now: DateTime<Utc>) -> Result<Option<CounterRecord>, GateError> {
        Err(GateError::StoreUnavailable("counter lock poisoned".into()))
    }

    fn sweep(&self, _now: DateTime<Utc>) -> Result<usize, GateError> {
        Err(GateError::StoreUnavailable("counter lock poisoned".into()))
    }
}

fn claims() -> SessionClaims {
    SessionClaims {
        user_id: Uuid::new_v4(),
        email: "adjuster@example.com".into(),
        role: Role::Adjuster,
        first_name: "Grace".into(),
        last_name: "Hopper".into(),
    }
}

fn codec() -> SessionTokenCodec {
    SessionTokenCodec::new(SECRET.as_bytes())
}

#[tokio::test]
async fn session_store_failure_is_a_500_for_apis_and_a_redirect_for_pages() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let sessions = SessionManager::new(codec(), Arc::new(UnreadableSessions), SessionCheck::LiveRecord);
    let h = harness_with(db, sessions, RateLimiter::in_memory(), RouteTable::default());
    let issued = h.gate.sessions().create(claims()).await.unwrap();
    let cookie = format!("session={}", issued.token);

    let api = send(
        &h.app,
        get_req("/api/claims").header(header::COOKIE, &cookie).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let set_cookie = api.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(set_cookie.starts_with("session=;"));
    assert!(set_cookie.contains("Max-Age=0"));
    assert_security_headers(api.headers());
    let body = body_json(api).await;
    assert_eq!(body["error"], "Internal server error");
    assert!(body.get("userId").is_none());

    let page = send(
        &h.app,
        get_req("/dashboard/claims").header(header::COOKIE, &cookie).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(page.status(), StatusCode::FOUND);
    assert_eq!(
        page.headers()[header::LOCATION],
        "/auth/login?redirect=%2Fdashboard%2Fclaims"
    );
    assert!(page.headers()[header::SET_COOKIE].to_str().unwrap().contains("Max-Age=0"));
}

#[tokio::test]
async fn signature_only_check_never_reads_the_store() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let sessions =
        SessionManager::new(codec(), Arc::new(UnreadableSessions), SessionCheck::SignatureOnly);
    let h = harness_with(db, sessions, RateLimiter::in_memory(), RouteTable::default());
    let issued = h.gate.sessions().create(claims()).await.unwrap();

    let response = send(
        &h.app,
        get_req("/api/claims")
            .header(header::COOKIE, format!("session={}", issued.token))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn counter_store_failure_never_fails_open() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let sessions = SessionManager::new(codec(), db.clone(), SessionCheck::SignatureOnly);
    let h = harness_with(
        db,
        sessions,
        RateLimiter::new(Arc::new(PoisonedCounters)),
        RouteTable::default(),
    );
    let issued = h.gate.sessions().create(claims()).await.unwrap();

    // Both an unguarded route with a 200 handler and an authenticated one.
    for request in [
        get_req("/api/stub/ok").body(Body::empty()).unwrap(),
        get_req("/api/claims")
            .header(header::COOKIE, format!("session={}", issued.token))
            .body(Body::empty())
            .unwrap(),
    ] {
        let response = send(&h.app, request).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
        assert_security_headers(response.headers());
        let body = body_json(response).await;
        assert_eq!(body["error"], "Internal server error");
        assert!(body.get("userId").is_none());
    }

    // Outside /api the limiter is never consulted.
    let home = send(&h.app, get_req("/").body(Body::empty()).unwrap()).await;
    assert_eq!(home.status(), StatusCode::OK);
}
