//! The narrow persistence interface the gate consumes.
//!
//! Both traits are synchronous; async callers run them on the blocking pool.

use anyhow::Result;
use uuid::Uuid;

use tollgate_crypto::hash_token;
use tollgate_types::{OneTimeToken, SessionRecord, TokenKind};

use crate::Database;

/// Session persistence keyed by the hash of the issued token.
pub trait SessionStore: Send + Sync {
    /// Look up the record for a raw session token.
    fn load_session(&self, token: &str) -> Result<Option<SessionRecord>>;

    fn persist_session(&self, record: &SessionRecord) -> Result<()>;

    fn sessions_for_user(&self, user_id: Uuid) -> Result<Vec<SessionRecord>>;

    /// Delete every session of a user. There is no single-session revocation.
    fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<usize>;
}

/// Storage for one-time reset/verify tokens.
pub trait TokenStore: Send + Sync {
    fn persist_token(&self, token: &OneTimeToken) -> Result<()>;

    /// Remove and return the token if present. Expiry is the caller's check.
    fn take_token(&self, hashed_token: &str, kind: TokenKind) -> Result<Option<OneTimeToken>>;

    fn delete_tokens_for_user(&self, user_id: Uuid, kind: TokenKind) -> Result<usize>;
}

impl SessionStore for Database {
    fn load_session(&self, token: &str) -> Result<Option<SessionRecord>> {
        self.get_session_by_hashed_token(&hash_token(token))
    }

    fn persist_session(&self, record: &SessionRecord) -> Result<()> {
        self.insert_session(record)
    }

    fn sessions_for_user(&self, user_id: Uuid) -> Result<Vec<SessionRecord>> {
        self.get_sessions_for_user(user_id)
    }

    fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<usize> {
        Database::delete_sessions_for_user(self, user_id)
    }
}

impl TokenStore for Database {
    fn persist_token(&self, token: &OneTimeToken) -> Result<()> {
        self.insert_token(token)
    }

    fn take_token(&self, hashed_token: &str, kind: TokenKind) -> Result<Option<OneTimeToken>> {
        Database::take_token(self, hashed_token, kind)
    }

    fn delete_tokens_for_user(&self, user_id: Uuid, kind: TokenKind) -> Result<usize> {
        Database::delete_tokens_for_user(self, user_id, kind)
    }
}
