#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
    middleware,
    response::Response,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use tollgate_db::Database;
use tollgate_gate::auth::{self, AuthState, AuthStateInner};
use tollgate_gate::headers::SecurityHeaderInjector;
use tollgate_gate::rate_limit::RateLimiter;
use tollgate_gate::routes::RouteTable;
use tollgate_gate::session::{SessionCheck, SessionCookie, SessionManager, SessionTokenCodec};
use tollgate_gate::tokens::OneTimeTokens;
use tollgate_gate::{Environment, Gatekeeper, gatekeep};
use tollgate_types::SessionClaims;

pub const SECRET: &str = "pipeline-test-secret-0123456789abcdef";

pub struct Harness {
    pub app: Router,
    pub gate: Gatekeeper,
    pub auth: AuthState,
    pub db: Arc<Database>,
}

pub fn harness(check: SessionCheck, routes: RouteTable) -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let sessions = SessionManager::new(SessionTokenCodec::new(SECRET.as_bytes()), db.clone(), check);
    harness_with(db, sessions, RateLimiter::in_memory(), routes)
}

/// Same routes as [`harness`], with the session manager and limiter supplied
/// by the caller.
pub fn harness_with(
    db: Arc<Database>,
    sessions: SessionManager,
    limiter: RateLimiter,
    routes: RouteTable,
) -> Harness {
    let cookie = SessionCookie::new("session", false).unwrap();

    let gate = Gatekeeper::from_parts(
        routes,
        limiter,
        sessions.clone(),
        SecurityHeaderInjector::new(Environment::Production),
        cookie.clone(),
    );

    let auth: AuthState = Arc::new(AuthStateInner {
        db: db.clone(),
        sessions,
        tokens: OneTimeTokens::new(db.clone()),
        cookie,
    });

    let auth_routes = Router::new()
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/sessions", get(auth::sessions))
        .route("/api/auth/forgot-password", post(auth::forgot_password))
        .route("/api/auth/reset-password", post(auth::reset_password))
        .route("/api/auth/verify-email", post(auth::verify_email))
        .with_state(auth.clone());

    let app = Router::new()
        .route("/", get(|| async { "home" }))
        .route("/api/claims", get(echo))
        .route("/api/stub/echo", get(echo))
        .route("/api/stub/ok", get(|| async { StatusCode::OK }))
        .route("/api/stub/fail", get(|| async { StatusCode::BAD_REQUEST }))
        .route("/dashboard/claims", get(|| async { "dashboard" }))
        .merge(auth_routes)
        .fallback(|req: axum::extract::Request| async move {
            (StatusCode::NOT_FOUND, Json(json!({ "uri": req.uri().to_string() })))
        })
        .layer(middleware::from_fn_with_state(gate.clone(), gatekeep));

    Harness { app, gate, auth, db }
}

/// Reflects what the gate handed downstream.
async fn echo(req: axum::extract::Request) -> Json<Value> {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };
    Json(json!({
        "userId": header("x-user-id"),
        "role": header("x-user-role"),
        "email": header("x-user-email"),
        "nonce": header("x-nonce"),
        "requestId": header("x-request-id"),
        "hasClaims": req.extensions().get::<SessionClaims>().is_some(),
    }))
}

pub async fn send(app: &Router, req: Request<Body>) -> Response {
    app.clone().oneshot(req).await.unwrap()
}

pub fn get_req(uri: &str) -> axum::http::request::Builder {
    Request::builder().method("GET").uri(uri)
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// `name=value` from the first `Set-Cookie` header.
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(String::from)
}

/// The nonce embedded in the response CSP.
pub fn csp_nonce(headers: &HeaderMap) -> String {
    let csp = headers[header::CONTENT_SECURITY_POLICY].to_str().unwrap();
    let start = csp.find("'nonce-").unwrap() + "'nonce-".len();
    let end = start + csp[start..].find('\'').unwrap();
    csp[start..end].to_string()
}

pub fn assert_security_headers(headers: &HeaderMap) {
    assert_eq!(headers["x-xss-protection"], "1; mode=block");
    assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
    assert_eq!(headers[header::REFERRER_POLICY], "strict-origin-when-cross-origin");
    assert!(headers.contains_key("permissions-policy"));
    assert!(headers.contains_key(header::STRICT_TRANSPORT_SECURITY));
    assert!(headers.contains_key(header::CONTENT_SECURITY_POLICY));
    assert!(headers.contains_key("x-request-id"));
}
