/// Database row types. These map directly to SQLite rows and are converted
/// into tollgate-types models at the edge of the crate.
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tollgate_types::{OneTimeToken, Role, SessionClaims, SessionRecord};

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub first_name: String,
    pub last_name: String,
    pub email_verified_at: Option<i64>,
    pub created_at: String,
}

impl UserRow {
    /// Claims a session for this user would carry.
    pub fn claims(&self) -> Result<SessionClaims> {
        Ok(SessionClaims {
            user_id: self.id.parse()?,
            email: self.email.clone(),
            role: self.role.parse::<Role>().map_err(|e| anyhow!(e))?,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        })
    }
}

pub struct SessionRow {
    pub id: String,
    pub user_id: String,
    pub handle: String,
    pub hashed_session_token: String,
    pub expires_at: i64,
    pub public_data: String,
}

impl TryFrom<SessionRow> for SessionRecord {
    type Error = anyhow::Error;

    fn try_from(row: SessionRow) -> Result<Self> {
        Ok(SessionRecord {
            id: row.id.parse()?,
            user_id: row.user_id.parse()?,
            handle: row.handle,
            hashed_session_token: row.hashed_session_token,
            expires_at: from_millis(row.expires_at)?,
            public_data: serde_json::from_str(&row.public_data)?,
        })
    }
}

pub struct TokenRow {
    pub hashed_token: String,
    pub kind: String,
    pub user_id: String,
    pub expires_at: i64,
    pub sent_to: String,
}

impl TryFrom<TokenRow> for OneTimeToken {
    type Error = anyhow::Error;

    fn try_from(row: TokenRow) -> Result<Self> {
        Ok(OneTimeToken {
            user_id: row.user_id.parse::<Uuid>()?,
            kind: row.kind.parse().map_err(|e: String| anyhow!(e))?,
            hashed_token: row.hashed_token,
            expires_at: from_millis(row.expires_at)?,
            sent_to: row.sent_to,
        })
    }
}

pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("Timestamp out of range: {}", ms))
}
