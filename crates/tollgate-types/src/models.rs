use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dashboard roles. Serialized in SCREAMING_SNAKE_CASE to match the values
/// stored in the users table and forwarded in `x-user-role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Adjuster,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Adjuster => "ADJUSTER",
            Role::Viewer => "VIEWER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Role::Admin),
            "ADJUSTER" => Ok(Role::Adjuster),
            "VIEWER" => Ok(Role::Viewer),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Identity claims carried inside a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
}

/// Server-side record of an issued session token.
///
/// Only the SHA-256 of the token is kept; `public_data` is a denormalized copy
/// of the claims so sessions can be listed without decoding anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub handle: String,
    #[serde(skip_serializing)]
    pub hashed_session_token: String,
    pub expires_at: DateTime<Utc>,
    pub public_data: SessionClaims,
}

impl SessionRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenKind {
    ResetPassword,
    VerifyEmail,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::ResetPassword => "RESET_PASSWORD",
            TokenKind::VerifyEmail => "VERIFY_EMAIL",
        }
    }
}

impl FromStr for TokenKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RESET_PASSWORD" => Ok(TokenKind::ResetPassword),
            "VERIFY_EMAIL" => Ok(TokenKind::VerifyEmail),
            other => Err(format!("unknown token kind: {}", other)),
        }
    }
}

/// A one-time token (password reset or email verification). Deleted as soon
/// as it is consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneTimeToken {
    pub user_id: Uuid,
    pub kind: TokenKind,
    pub hashed_token: String,
    pub expires_at: DateTime<Utc>,
    pub sent_to: String,
}

impl OneTimeToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
