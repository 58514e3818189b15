mod cleanup;
mod upstream;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router, middleware,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use tollgate_db::Database;
use tollgate_gate::auth::{self, AuthState, AuthStateInner};
use tollgate_gate::rate_limit::run_sweep_loop;
use tollgate_gate::session::{SessionManager, SessionTokenCodec};
use tollgate_gate::tokens::OneTimeTokens;
use tollgate_gate::{GateConfig, Gatekeeper, gatekeep};

use crate::upstream::{Upstream, UpstreamState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tollgate=debug,tollgate_gate=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let config = match GateConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {}", e);
            eprintln!("       Set TOLLGATE_SESSION_SECRET (at least 32 random bytes) in your .env file and restart.");
            std::process::exit(1);
        }
    };

    let host = std::env::var("TOLLGATE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("TOLLGATE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let db_path: PathBuf = std::env::var("TOLLGATE_DB_PATH")
        .unwrap_or_else(|_| "tollgate.db".into())
        .into();
    let cleanup_secs: u64 = std::env::var("TOLLGATE_SESSION_CLEANUP_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(3600);
    let upstream_url = std::env::var("TOLLGATE_UPSTREAM_URL").ok().filter(|u| !u.is_empty());

    // Init database
    let db = Arc::new(Database::open(&db_path)?);

    // Shared state
    let codec = SessionTokenCodec::new(config.session_secret.as_bytes());
    let sessions = SessionManager::new(codec, db.clone(), config.session_check);
    let gate = Gatekeeper::new(&config, sessions.clone())?;

    let auth_state: AuthState = Arc::new(AuthStateInner {
        db: db.clone(),
        sessions,
        tokens: OneTimeTokens::new(db.clone()),
        cookie: gate.cookie().clone(),
    });

    let upstream: UpstreamState = match upstream_url {
        Some(url) => {
            info!("Forwarding to upstream {}", url);
            Some(Arc::new(Upstream::new(&url)?))
        }
        None => {
            warn!("TOLLGATE_UPSTREAM_URL not set, unmatched routes will 404");
            None
        }
    };

    // Background tasks
    tokio::spawn(run_sweep_loop(gate.limiter().store(), config.sweep_interval));
    tokio::spawn(cleanup::run_cleanup_loop(db.clone(), cleanup_secs));

    // Routes
    let auth_routes = Router::new()
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/sessions", get(auth::sessions))
        .route("/api/auth/forgot-password", post(auth::forgot_password))
        .route("/api/auth/reset-password", post(auth::reset_password))
        .route("/api/auth/verify-email", post(auth::verify_email))
        .with_state(auth_state);

    let app = Router::new()
        .route("/api/health", get(health))
        .merge(auth_routes)
        .fallback(upstream::forward)
        .with_state(upstream)
        .layer(middleware::from_fn_with_state(gate, gatekeep))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!(
        environment = ?config.environment,
        session_check = ?config.session_check,
        "Tollgate listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
