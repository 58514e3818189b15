use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;
use uuid::Uuid;

use tollgate_crypto::{generate_token, hash_token};
use tollgate_db::TokenStore;
use tollgate_types::{OneTimeToken, TokenKind};

use crate::error::GateError;

pub fn reset_password_ttl() -> TimeDelta {
    TimeDelta::hours(4)
}

pub fn verify_email_ttl() -> TimeDelta {
    TimeDelta::hours(24)
}

/// Single-use emailed tokens (password reset, email verification).
///
/// Only the SHA-256 of a token is stored. Issuing a token invalidates every
/// earlier token of the same kind for that user.
#[derive(Clone)]
pub struct OneTimeTokens {
    store: Arc<dyn TokenStore>,
}

impl OneTimeTokens {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    pub fn ttl_for(kind: TokenKind) -> TimeDelta {
        match kind {
            TokenKind::ResetPassword => reset_password_ttl(),
            TokenKind::VerifyEmail => verify_email_ttl(),
        }
    }

    pub async fn issue(&self, user_id: Uuid, kind: TokenKind, sent_to: &str) -> Result<String, GateError> {
        self.issue_at(user_id, kind, sent_to, Utc::now()).await
    }

    /// Returns the raw token. It is never stored and cannot be recovered.
    pub async fn issue_at(
        &self,
        user_id: Uuid,
        kind: TokenKind,
        sent_to: &str,
        now: DateTime<Utc>,
    ) -> Result<String, GateError> {
        let raw = generate_token();
        let token = OneTimeToken {
            user_id,
            kind,
            hashed_token: hash_token(&raw),
            expires_at: now + Self::ttl_for(kind),
            sent_to: sent_to.to_string(),
        };

        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            store.delete_tokens_for_user(user_id, kind)?;
            store.persist_token(&token)
        })
        .await??;

        debug!(user_id = %user_id, kind = kind.as_str(), "One-time token issued");
        Ok(raw)
    }

    pub async fn consume(&self, raw: &str, kind: TokenKind) -> Result<Option<Uuid>, GateError> {
        self.consume_at(raw, kind, Utc::now()).await
    }

    /// Take the token out of the store. Expired tokens are removed too, but
    /// yield `None`.
    pub async fn consume_at(
        &self,
        raw: &str,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, GateError> {
        let store = self.store.clone();
        let hashed = hash_token(raw);
        let taken = tokio::task::spawn_blocking(move || store.take_token(&hashed, kind)).await??;

        Ok(taken
            .filter(|token| !token.is_expired_at(now))
            .map(|token| token.user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_db::Database;
    use tollgate_types::Role;

    fn setup() -> (OneTimeTokens, Uuid) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user_id = Uuid::new_v4();
        db.create_user(&user_id.to_string(), "a@example.com", "hash", Role::Adjuster, "A", "B").unwrap();
        (OneTimeTokens::new(db), user_id)
    }

    #[tokio::test]
    async fn consumes_exactly_once() {
        let (tokens, user_id) = setup();
        let raw = tokens.issue(user_id, TokenKind::ResetPassword, "a@example.com").await.unwrap();

        assert_eq!(tokens.consume(&raw, TokenKind::ResetPassword).await.unwrap(), Some(user_id));
        assert_eq!(tokens.consume(&raw, TokenKind::ResetPassword).await.unwrap(), None);
    }

    #[tokio::test]
    async fn kinds_do_not_cross() {
        let (tokens, user_id) = setup();
        let raw = tokens.issue(user_id, TokenKind::VerifyEmail, "a@example.com").await.unwrap();
        assert_eq!(tokens.consume(&raw, TokenKind::ResetPassword).await.unwrap(), None);
        assert_eq!(tokens.consume(&raw, TokenKind::VerifyEmail).await.unwrap(), Some(user_id));
    }

    #[tokio::test]
    async fn reissue_invalidates_earlier_token() {
        let (tokens, user_id) = setup();
        let first = tokens.issue(user_id, TokenKind::ResetPassword, "a@example.com").await.unwrap();
        let second = tokens.issue(user_id, TokenKind::ResetPassword, "a@example.com").await.unwrap();

        assert_eq!(tokens.consume(&first, TokenKind::ResetPassword).await.unwrap(), None);
        assert_eq!(tokens.consume(&second, TokenKind::ResetPassword).await.unwrap(), Some(user_id));
    }

    #[tokio::test]
    async fn expired_tokens_are_rejected() {
        let (tokens, user_id) = setup();
        let issued_at = Utc::now() - TimeDelta::hours(5);
        let raw = tokens
            .issue_at(user_id, TokenKind::ResetPassword, "a@example.com", issued_at)
            .await
            .unwrap();
        assert_eq!(tokens.consume(&raw, TokenKind::ResetPassword).await.unwrap(), None);
    }

    #[test]
    fn ttls() {
        assert_eq!(OneTimeTokens::ttl_for(TokenKind::ResetPassword), TimeDelta::hours(4));
        assert_eq!(OneTimeTokens::ttl_for(TokenKind::VerifyEmail), TimeDelta::hours(24));
    }
}
