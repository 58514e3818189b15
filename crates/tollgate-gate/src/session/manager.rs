use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use tollgate_crypto::{generate_token, hash_token};
use tollgate_db::SessionStore;
use tollgate_types::{SessionClaims, SessionRecord};

use crate::error::GateError;
use crate::session::codec::SessionTokenCodec;

/// How much `verify` trusts a token on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    /// Signature and expiry only. Deleting a session record does not
    /// invalidate tokens already handed out.
    SignatureOnly,
    /// Additionally require an unexpired persisted record for the token.
    LiveRecord,
}

pub struct IssuedSession {
    pub token: String,
    pub record: SessionRecord,
}

/// Issues, verifies and revokes sessions: the codec for the token, the store
/// for the server-side record.
#[derive(Clone)]
pub struct SessionManager {
    codec: Arc<SessionTokenCodec>,
    store: Arc<dyn SessionStore>,
    check: SessionCheck,
}

impl SessionManager {
    pub fn new(codec: SessionTokenCodec, store: Arc<dyn SessionStore>, check: SessionCheck) -> Self {
        Self {
            codec: Arc::new(codec),
            store,
            check,
        }
    }

    pub fn codec(&self) -> &SessionTokenCodec {
        &self.codec
    }

    pub fn check(&self) -> SessionCheck {
        self.check
    }

    /// Sign a token for `claims` and persist its hashed record.
    pub async fn create(&self, claims: SessionClaims) -> Result<IssuedSession, GateError> {
        let issued = self.codec.issue(&claims)?;
        let record = SessionRecord {
            id: Uuid::new_v4(),
            user_id: claims.user_id,
            handle: generate_token(),
            hashed_session_token: hash_token(&issued.token),
            expires_at: issued.expires_at,
            public_data: claims,
        };

        let store = self.store.clone();
        let to_persist = record.clone();
        tokio::task::spawn_blocking(move || store.persist_session(&to_persist)).await??;

        info!(user_id = %record.user_id, session_id = %record.id, "Session created");
        Ok(IssuedSession {
            token: issued.token,
            record,
        })
    }

    /// `Ok(None)` for any invalid session. `Err` only when the store itself
    /// fails under [`SessionCheck::LiveRecord`].
    pub async fn verify(&self, token: &str) -> Result<Option<SessionClaims>, GateError> {
        let Some(claims) = self.codec.verify(token) else {
            return Ok(None);
        };

        if self.check == SessionCheck::SignatureOnly {
            return Ok(Some(claims));
        }

        let store = self.store.clone();
        let owned = token.to_string();
        let record = tokio::task::spawn_blocking(move || store.load_session(&owned)).await??;

        match record {
            Some(record) if !record.is_expired_at(Utc::now()) && record.user_id == claims.user_id => {
                Ok(Some(claims))
            }
            _ => {
                debug!(user_id = %claims.user_id, "Token valid but session record is gone");
                Ok(None)
            }
        }
    }

    /// Log a user out everywhere.
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<usize, GateError> {
        let store = self.store.clone();
        let deleted =
            tokio::task::spawn_blocking(move || store.delete_sessions_for_user(user_id)).await??;
        info!(user_id = %user_id, deleted, "Sessions revoked");
        Ok(deleted)
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<SessionRecord>, GateError> {
        let store = self.store.clone();
        let sessions =
            tokio::task::spawn_blocking(move || store.sessions_for_user(user_id)).await??;
        Ok(sessions)
    }
}
