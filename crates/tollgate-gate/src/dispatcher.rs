use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, error, warn};

use tollgate_types::SessionClaims;

use crate::config::GateConfig;
use crate::error::GateError;
use crate::headers::{SecurityHeaderInjector, X_NONCE};
use crate::rate_limit::{Decision, Outcome, RateLimiter, Ticket};
use crate::routes::{RouteClass, RouteTable, canonical_path};
use crate::session::{SessionCookie, SessionManager};

pub const X_USER_ID: &str = "x-user-id";
pub const X_USER_ROLE: &str = "x-user-role";
pub const X_USER_EMAIL: &str = "x-user-email";

const LOGIN_PAGE: &str = "/auth/login";

/// The composed gate. Cheap to clone: everything lives behind one `Arc`.
#[derive(Clone)]
pub struct Gatekeeper {
    inner: Arc<GatekeeperInner>,
}

struct GatekeeperInner {
    routes: RouteTable,
    limiter: RateLimiter,
    sessions: SessionManager,
    headers: SecurityHeaderInjector,
    cookie: SessionCookie,
}

impl Gatekeeper {
    /// Default route tables and an in-memory counter store.
    pub fn new(config: &GateConfig, sessions: SessionManager) -> Result<Self, GateError> {
        let cookie = SessionCookie::new(
            config.cookie_name.clone(),
            !config.environment.is_development(),
        )?;

        Ok(Self::from_parts(
            RouteTable::default(),
            RateLimiter::in_memory(),
            sessions,
            SecurityHeaderInjector::new(config.environment),
            cookie,
        ))
    }

    pub fn from_parts(
        routes: RouteTable,
        limiter: RateLimiter,
        sessions: SessionManager,
        headers: SecurityHeaderInjector,
        cookie: SessionCookie,
    ) -> Self {
        Self {
            inner: Arc::new(GatekeeperInner {
                routes,
                limiter,
                sessions,
                headers,
                cookie,
            }),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    pub fn cookie(&self) -> &SessionCookie {
        &self.inner.cookie
    }

    /// Throttle, authenticate, authorize, then forward. Security headers are
    /// added by the caller on the way out.
    async fn dispatch(&self, mut req: Request, next: Next) -> Response {
        let path = req.uri().path().to_string();

        let ticket = match self.throttle(req.headers(), &path) {
            Ok(ticket) => ticket,
            Err(rejection) => return rejection,
        };

        let class = self.inner.routes.classify(&path);
        let mut response = match self.authorize(&mut req, class, &path).await {
            Ok(()) => next.run(req).await,
            Err(rejection) => rejection,
        };

        if let Some(ticket) = ticket {
            if let Err(e) = self.inner.limiter.reconcile(&ticket, Outcome::from(response.status())) {
                warn!(error = %e, key = ticket.key(), "Rate-limit reconcile failed");
            }
            ticket.apply_headers(response.headers_mut());
        }

        response
    }

    /// `Ok(None)` outside `/api`.
    fn throttle(&self, headers: &HeaderMap, path: &str) -> Result<Option<Ticket>, Response> {
        let Some(policy) = self.inner.routes.policy_for(path) else {
            return Ok(None);
        };

        match self.inner.limiter.check(headers, &policy) {
            Ok(Decision::Allow(ticket)) => Ok(Some(ticket)),
            Ok(Decision::Deny(denial)) => Err(GateError::RateLimitExceeded(denial).into_response()),
            Err(e) => Err(e.into_response()),
        }
    }

    async fn authorize(
        &self,
        req: &mut Request,
        class: RouteClass,
        path: &str,
    ) -> Result<(), Response> {
        if !class.is_protected() {
            return Ok(());
        }

        let Some(token) = self.inner.cookie.read(req.headers()) else {
            debug!(path, "No session cookie");
            return Err(self.reject(class, path, GateError::Unauthorized, false));
        };

        let claims = match self.inner.sessions.verify(&token).await {
            Ok(Some(claims)) => claims,
            Ok(None) => return Err(self.reject(class, path, GateError::InvalidSession, true)),
            Err(e) => return Err(self.reject(class, path, e, true)),
        };

        if class == RouteClass::ProtectedApi {
            inject_identity(req.headers_mut(), &claims);
        }
        req.extensions_mut().insert(claims);
        Ok(())
    }

    fn reject(&self, class: RouteClass, path: &str, error: GateError, clear_cookie: bool) -> Response {
        let mut response = if class == RouteClass::ProtectedPage {
            if error.status().is_server_error() {
                error!(error = %error, path, "Session verification failed");
            }
            redirect_to_login(path)
        } else {
            error.into_response()
        };

        if clear_cookie {
            response
                .headers_mut()
                .append(header::SET_COOKIE, self.inner.cookie.clear());
        }
        response
    }
}

/// The middleware entry point. Mount with
/// `axum::middleware::from_fn_with_state(gate, gatekeep)`.
pub async fn gatekeep(State(gate): State<Gatekeeper>, mut req: Request, next: Next) -> Response {
    strip_untrusted(req.headers_mut());

    let stamp = gate.inner.headers.stamp();
    gate.inner.headers.forward(req.headers_mut(), &stamp);
    req.extensions_mut().insert(stamp.clone());

    let mut response = match canonicalize_uri(&mut req) {
        Ok(()) => gate.dispatch(req, next).await,
        Err(e) => e.into_response(),
    };
    gate.inner.headers.apply(response.headers_mut(), &stamp);
    response
}

/// Identity headers are only ever set by the gate.
fn strip_untrusted(headers: &mut HeaderMap) {
    let spoofed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with("x-user-") || name.as_str() == X_NONCE)
        .cloned()
        .collect();

    for name in spoofed {
        debug!(header = %name, "Stripping client-supplied header");
        headers.remove(name);
    }
}

/// Downstream routes on the same path the gate classified.
fn canonicalize_uri(req: &mut Request) -> Result<(), GateError> {
    let canonical = match canonical_path(req.uri().path()) {
        Cow::Borrowed(_) => return Ok(()),
        Cow::Owned(path) => path,
    };
    debug!(raw = req.uri().path(), path = %canonical, "Canonicalized request path");

    let path_and_query = match req.uri().query() {
        Some(query) => format!("{}?{}", canonical, query),
        None => canonical,
    };
    let malformed = || GateError::BadRequest("Malformed request path".into());

    let mut parts = req.uri().clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse().map_err(|_| malformed())?);
    *req.uri_mut() = Uri::from_parts(parts).map_err(|_| malformed())?;
    Ok(())
}

fn inject_identity(headers: &mut HeaderMap, claims: &SessionClaims) {
    let values = [
        (X_USER_ID, claims.user_id.to_string()),
        (X_USER_ROLE, claims.role.as_str().to_string()),
        (X_USER_EMAIL, claims.email.clone()),
    ];

    for (name, value) in values {
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(name), value);
            }
            Err(_) => warn!(header = name, "Identity value is not a valid header, skipping"),
        }
    }
}

/// 302 to the login page, remembering where the user was headed.
fn redirect_to_login(path: &str) -> Response {
    let location = format!("{}?redirect={}", LOGIN_PAGE, urlencoding::encode(path));
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}
