use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use uuid::Uuid;

use tollgate_crypto::generate_nonce;

use crate::config::Environment;

pub const X_NONCE: &str = "x-nonce";
pub const X_REQUEST_ID: &str = "x-request-id";

const HSTS: &str = "max-age=31536000; includeSubDomains";

/// Per-request randomness: the CSP nonce and the request id.
///
/// Also inserted into request extensions so handlers can render
/// `<script nonce=...>` without re-reading headers.
#[derive(Debug, Clone)]
pub struct SecurityStamp {
    pub nonce: String,
    pub request_id: String,
}

/// Fixed hardening headers plus a nonce-bearing CSP.
#[derive(Debug, Clone, Copy)]
pub struct SecurityHeaderInjector {
    environment: Environment,
}

impl SecurityHeaderInjector {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    /// Fresh nonce and request id. Call once per request.
    pub fn stamp(&self) -> SecurityStamp {
        SecurityStamp {
            nonce: generate_nonce(),
            request_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn content_security_policy(&self, nonce: &str) -> String {
        let mut script_src = format!("script-src 'self' 'nonce-{}' 'strict-dynamic'", nonce);
        if self.environment.is_development() {
            // Dev tooling evaluates hot-reloaded modules.
            script_src.push_str(" 'unsafe-eval'");
        }

        let mut directives = vec![
            "default-src 'self'".to_string(),
            script_src,
            "style-src 'self' 'unsafe-inline'".to_string(),
            "img-src 'self' blob: data:".to_string(),
            "font-src 'self'".to_string(),
            "connect-src 'self'".to_string(),
            "object-src 'none'".to_string(),
            "base-uri 'self'".to_string(),
            "form-action 'self'".to_string(),
            "frame-ancestors 'none'".to_string(),
        ];
        if !self.environment.is_development() {
            directives.push("upgrade-insecure-requests".to_string());
        }

        directives.join("; ")
    }

    /// Set the full security header set on a response.
    pub fn apply(&self, headers: &mut HeaderMap, stamp: &SecurityStamp) {
        headers.insert(
            HeaderName::from_static("x-xss-protection"),
            HeaderValue::from_static("1; mode=block"),
        );
        headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
        headers.insert(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        );
        headers.insert(
            HeaderName::from_static("permissions-policy"),
            HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
        );

        if !self.environment.is_development() {
            headers.insert(header::STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS));
        }

        if let Ok(csp) = HeaderValue::from_str(&self.content_security_policy(&stamp.nonce)) {
            headers.insert(header::CONTENT_SECURITY_POLICY, csp);
        }
        if let Ok(request_id) = HeaderValue::from_str(&stamp.request_id) {
            headers.insert(HeaderName::from_static(X_REQUEST_ID), request_id);
        }
    }

    /// Hand the stamp downstream as `x-nonce` / `x-request-id` request headers.
    pub fn forward(&self, headers: &mut HeaderMap, stamp: &SecurityStamp) {
        if let Ok(nonce) = HeaderValue::from_str(&stamp.nonce) {
            headers.insert(HeaderName::from_static(X_NONCE), nonce);
        }
        if let Ok(request_id) = HeaderValue::from_str(&stamp.request_id) {
            headers.insert(HeaderName::from_static(X_REQUEST_ID), request_id);
        }
    }
}
