use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Timestamps the gate compares against (`expires_at`, `email_verified_at`)
/// are epoch milliseconds so expiry checks stay plain integer comparisons.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id                  TEXT PRIMARY KEY,
            email               TEXT NOT NULL UNIQUE,
            password            TEXT NOT NULL,
            role                TEXT NOT NULL DEFAULT 'ADJUSTER',
            first_name          TEXT NOT NULL,
            last_name           TEXT NOT NULL,
            email_verified_at   INTEGER,
            created_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id                      TEXT PRIMARY KEY,
            user_id                 TEXT NOT NULL,
            handle                  TEXT NOT NULL UNIQUE,
            hashed_session_token    TEXT NOT NULL UNIQUE,
            expires_at              INTEGER NOT NULL,
            public_data             TEXT NOT NULL,
            created_at              TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_user
            ON sessions(user_id);

        CREATE TABLE IF NOT EXISTS tokens (
            hashed_token    TEXT NOT NULL,
            kind            TEXT NOT NULL,
            user_id         TEXT NOT NULL,
            expires_at      INTEGER NOT NULL,
            sent_to         TEXT NOT NULL,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (hashed_token, kind)
        );

        CREATE INDEX IF NOT EXISTS idx_tokens_user
            ON tokens(user_id, kind);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
