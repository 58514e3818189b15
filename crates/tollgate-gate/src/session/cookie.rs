use axum::http::{HeaderMap, HeaderValue};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::error::GateError;

/// Reads and writes the session cookie.
///
/// Always `HttpOnly`, `SameSite=Lax`, `Path=/`. `Secure` everywhere except
/// development.
#[derive(Debug, Clone)]
pub struct SessionCookie {
    name: String,
    secure: bool,
    cleared: HeaderValue,
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, secure: bool) -> Result<Self, GateError> {
        let name = name.into();
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
            return Err(GateError::Configuration(format!("invalid cookie name: {:?}", name)));
        }

        let mut removal = Self::base(&name, String::new(), secure);
        removal.make_removal();
        let cleared = HeaderValue::from_str(&removal.to_string())
            .map_err(|e| GateError::Configuration(format!("cookie header: {}", e)))?;

        Ok(Self {
            name,
            secure,
            cleared,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The token from the request's `Cookie` header, if present and non-empty.
    pub fn read(&self, headers: &HeaderMap) -> Option<String> {
        CookieJar::from_headers(headers)
            .get(&self.name)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
    }

    /// `Set-Cookie` value carrying a fresh token for the full session lifetime.
    pub fn issue(&self, token: &str) -> Result<HeaderValue, GateError> {
        let mut cookie = Self::base(&self.name, token.to_string(), self.secure);
        cookie.set_max_age(time::Duration::days(7));
        HeaderValue::from_str(&cookie.to_string())
            .map_err(|e| GateError::Configuration(format!("cookie header: {}", e)))
    }

    /// `Set-Cookie` value that makes the browser drop the cookie.
    pub fn clear(&self) -> HeaderValue {
        self.cleared.clone()
    }

    fn base(name: &str, value: String, secure: bool) -> Cookie<'static> {
        Cookie::build((name.to_string(), value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(secure)
            .build()
    }
}
