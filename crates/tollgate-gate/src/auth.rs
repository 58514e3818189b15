use std::sync::{Arc, OnceLock};

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tollgate_db::Database;
use tollgate_db::models::UserRow;
use tollgate_types::api::{
    ForgotPasswordRequest, LoginRequest, OkResponse, ResetPasswordRequest, SessionResponse,
    SessionSummary, SignupRequest, VerifyEmailRequest,
};
use tollgate_types::{Role, SessionClaims, TokenKind};

use crate::error::GateError;
use crate::session::{SessionCookie, SessionManager};
use crate::tokens::OneTimeTokens;

const MIN_PASSWORD_LEN: usize = 10;

/// Verified against when a login names no known account.
static DUMMY_HASH: OnceLock<String> = OnceLock::new();

pub type AuthState = Arc<AuthStateInner>;

pub struct AuthStateInner {
    pub db: Arc<Database>,
    pub sessions: SessionManager,
    pub tokens: OneTimeTokens,
    pub cookie: SessionCookie,
}

pub async fn signup(
    State(state): State<AuthState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, GateError> {
    let email = normalize_email(&req.email);
    if !email.contains('@') {
        return Err(GateError::BadRequest("A valid email address is required".into()));
    }
    validate_password(&req.password)?;
    let first_name = req.first_name.trim().to_string();
    let last_name = req.last_name.trim().to_string();
    if first_name.is_empty() || last_name.is_empty() {
        return Err(GateError::BadRequest("First and last name are required".into()));
    }

    let password_hash = hash_password(req.password).await?;
    let user_id = Uuid::new_v4();

    let db = state.db.clone();
    let lookup = email.clone();
    let user = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<UserRow>> {
        let created = db.create_user(
            &user_id.to_string(),
            &lookup,
            &password_hash,
            Role::Adjuster,
            &first_name,
            &last_name,
        )?;
        if !created {
            return Ok(None);
        }
        db.get_user_by_id(&user_id.to_string())
    })
    .await??
    .ok_or_else(|| GateError::Conflict("An account with this email already exists".into()))?;

    let claims = user.claims()?;
    let issued = state.sessions.create(claims.clone()).await?;

    let verify_token = state.tokens.issue(claims.user_id, TokenKind::VerifyEmail, &email).await?;
    // No mailer: the link is only logged.
    debug!(user_id = %claims.user_id, token = %verify_token, "Email verification token issued");
    info!(user_id = %claims.user_id, "User signed up");

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, state.cookie.issue(&issued.token)?)],
        Json(SessionResponse { user: claims }),
    ))
}

pub async fn login(
    State(state): State<AuthState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, GateError> {
    let email = normalize_email(&req.email);
    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_email(&email)).await??;

    // Unknown emails still pay for one argon2 verification.
    let verified = verify_password(req.password, user.as_ref().map(|u| u.password.clone())).await?;
    let user = match user {
        Some(user) if verified => user,
        Some(user) => {
            debug!(user_id = %user.id, "Wrong password");
            return Err(GateError::InvalidCredentials);
        }
        None => {
            debug!("Login for unknown email");
            return Err(GateError::InvalidCredentials);
        }
    };

    let claims = user.claims()?;
    let issued = state.sessions.create(claims.clone()).await?;

    Ok((
        [(header::SET_COOKIE, state.cookie.issue(&issued.token)?)],
        Json(SessionResponse { user: claims }),
    ))
}

/// Ends every session of the caller, not just this one.
pub async fn logout(
    State(state): State<AuthState>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<impl IntoResponse, GateError> {
    state.sessions.revoke_all(claims.user_id).await?;

    Ok((
        [(header::SET_COOKIE, state.cookie.clear())],
        Json(OkResponse { ok: true }),
    ))
}

pub async fn me(Extension(claims): Extension<SessionClaims>) -> Json<SessionResponse> {
    Json(SessionResponse { user: claims })
}

pub async fn sessions(
    State(state): State<AuthState>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<Json<Vec<SessionSummary>>, GateError> {
    let now = Utc::now();
    let summaries = state
        .sessions
        .list(claims.user_id)
        .await?
        .into_iter()
        .filter(|s| !s.is_expired_at(now))
        .map(|s| SessionSummary {
            id: s.id,
            handle: s.handle,
            expires_at: s.expires_at,
        })
        .collect();

    Ok(Json(summaries))
}

/// Always 200, whether or not the address is known.
pub async fn forgot_password(
    State(state): State<AuthState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<Json<OkResponse>, GateError> {
    let email = normalize_email(&req.email);
    let db = state.db.clone();
    let lookup = email.clone();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_email(&lookup)).await??;

    match user {
        Some(user) => {
            let user_id: Uuid = user
                .id
                .parse()
                .map_err(|e| GateError::StoreUnavailable(format!("corrupt user id: {}", e)))?;
            let token = state.tokens.issue(user_id, TokenKind::ResetPassword, &email).await?;
            // No mailer: the link is only logged.
            debug!(user_id = %user_id, token = %token, "Password reset token issued");
        }
        None => debug!("Password reset requested for unknown email"),
    }

    Ok(Json(OkResponse { ok: true }))
}

pub async fn reset_password(
    State(state): State<AuthState>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, GateError> {
    validate_password(&req.password)?;

    let user_id = state
        .tokens
        .consume(&req.token, TokenKind::ResetPassword)
        .await?
        .ok_or_else(|| {
            GateError::BadRequest("Reset password link is invalid or it has expired.".into())
        })?;

    let password_hash = hash_password(req.password).await?;
    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<UserRow>> {
        let id = user_id.to_string();
        if !db.update_password(&id, &password_hash)? {
            return Ok(None);
        }
        db.get_user_by_id(&id)
    })
    .await??
    .ok_or_else(|| GateError::BadRequest("Reset password link is invalid or it has expired.".into()))?;

    // Every old session goes, including any held by whoever knew the old password.
    state.sessions.revoke_all(user_id).await?;
    let claims = user.claims()?;
    let issued = state.sessions.create(claims.clone()).await?;
    info!(user_id = %user_id, "Password reset");

    Ok((
        [(header::SET_COOKIE, state.cookie.issue(&issued.token)?)],
        Json(SessionResponse { user: claims }),
    ))
}

pub async fn verify_email(
    State(state): State<AuthState>,
    Json(req): Json<VerifyEmailRequest>,
) -> Result<Json<OkResponse>, GateError> {
    let user_id = state
        .tokens
        .consume(&req.token, TokenKind::VerifyEmail)
        .await?
        .ok_or_else(|| GateError::BadRequest("Verification link is invalid or it has expired.".into()))?;

    let db = state.db.clone();
    let verified =
        tokio::task::spawn_blocking(move || db.mark_email_verified(&user_id.to_string(), Utc::now()))
            .await??;
    if !verified {
        warn!(user_id = %user_id, "Verification token for a deleted user");
        return Err(GateError::BadRequest(
            "Verification link is invalid or it has expired.".into(),
        ));
    }

    info!(user_id = %user_id, "Email verified");
    Ok(Json(OkResponse { ok: true }))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_password(password: &str) -> Result<(), GateError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(GateError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Argon2id with a fresh salt, off the async runtime.
async fn hash_password(password: String) -> Result<String, GateError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| GateError::PasswordHash(e.to_string()))
    })
    .await?
}

/// `stored` is `None` for an unknown account: the check runs against a dummy
/// hash and always fails.
async fn verify_password(password: String, stored: Option<String>) -> Result<bool, GateError> {
    tokio::task::spawn_blocking(move || {
        let known = stored.is_some();
        let stored = match stored {
            Some(hash) => hash,
            None => dummy_hash()?.to_string(),
        };
        let parsed = PasswordHash::new(&stored).map_err(|e| GateError::PasswordHash(e.to_string()))?;
        let matches = Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok();
        Ok(known && matches)
    })
    .await?
}

fn dummy_hash() -> Result<&'static str, GateError> {
    if let Some(hash) = DUMMY_HASH.get() {
        return Ok(hash.as_str());
    }
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(b"tollgate-no-such-account", &salt)
        .map_err(|e| GateError::PasswordHash(e.to_string()))?
        .to_string();
    Ok(DUMMY_HASH.get_or_init(|| hash).as_str())
}
