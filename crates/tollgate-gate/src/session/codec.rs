use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use tollgate_types::SessionClaims;

use crate::error::GateError;

/// Session lifetime.
pub fn session_ttl() -> TimeDelta {
    TimeDelta::days(7)
}

/// What actually gets signed: identity claims plus the registered claims.
#[derive(Debug, Serialize, Deserialize)]
struct TokenPayload {
    #[serde(flatten)]
    claims: SessionClaims,
    iat: i64,
    exp: i64,
    jti: String,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// HS256 session tokens.
///
/// `verify` never errors: bad signatures, wrong algorithms, malformed input and
/// expired tokens all come back as `None`.
#[derive(Clone)]
pub struct SessionTokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: TimeDelta,
}

impl SessionTokenCodec {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against our own clock in `verify_at`, with no leeway.
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl: session_ttl(),
        }
    }

    pub fn with_ttl(mut self, ttl: TimeDelta) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    pub fn issue(&self, claims: &SessionClaims) -> Result<IssuedToken, GateError> {
        self.issue_at(claims, Utc::now())
    }

    pub fn issue_at(&self, claims: &SessionClaims, now: DateTime<Utc>) -> Result<IssuedToken, GateError> {
        let expires_at = now + self.ttl;
        let jti = Uuid::new_v4().to_string();
        let payload = TokenPayload {
            claims: claims.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: jti.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &payload, &self.encoding)?;

        Ok(IssuedToken {
            token,
            jti,
            issued_at: now,
            expires_at,
        })
    }

    pub fn verify(&self, token: &str) -> Option<SessionClaims> {
        self.verify_at(token, Utc::now())
    }

    /// Signature and expiry in one step. A token is expired once `exp <= now`.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Option<SessionClaims> {
        let data = match decode::<TokenPayload>(token, &self.decoding, &self.validation) {
            Ok(data) => data,
            Err(e) => {
                debug!("Session token rejected: {}", e);
                return None;
            }
        };

        if data.claims.exp <= now.timestamp() {
            debug!(jti = %data.claims.jti, "Session token expired");
            return None;
        }

        Some(data.claims.claims)
    }
}
