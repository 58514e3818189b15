use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use tollgate_types::{OneTimeToken, Role, SessionRecord, TokenKind};

use crate::Database;
use crate::models::{SessionRow, TokenRow, UserRow, to_millis};

impl Database {
    // -- Users --

    /// Returns `false` when the email is already taken. Check and insert are
    /// one statement, so concurrent signups cannot both succeed.
    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        password_hash: &str,
        role: Role,
        first_name: &str,
        last_name: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, email, password, role, first_name, last_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(email) DO NOTHING",
                rusqlite::params![id, email, password_hash, role.as_str(), first_name, last_name],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn update_password(&self, id: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET password = ?1 WHERE id = ?2",
                (password_hash, id),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn mark_email_verified(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET email_verified_at = ?1 WHERE id = ?2",
                rusqlite::params![to_millis(at), id],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Sessions --

    pub fn insert_session(&self, record: &SessionRecord) -> Result<()> {
        let public_data = serde_json::to_string(&record.public_data)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, user_id, handle, hashed_session_token, expires_at, public_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    record.id.to_string(),
                    record.user_id.to_string(),
                    &record.handle,
                    &record.hashed_session_token,
                    to_millis(record.expires_at),
                    public_data,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_session_by_hashed_token(&self, hashed_token: &str) -> Result<Option<SessionRecord>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user_id, handle, hashed_session_token, expires_at, public_data
                 FROM sessions WHERE hashed_session_token = ?1",
                [hashed_token],
                map_session_row,
            )
            .optional()
        })?;

        row.map(SessionRecord::try_from).transpose()
    }

    pub fn get_sessions_for_user(&self, user_id: Uuid) -> Result<Vec<SessionRecord>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, handle, hashed_session_token, expires_at, public_data
                 FROM sessions WHERE user_id = ?1
                 ORDER BY expires_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], map_session_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter().map(SessionRecord::try_from).collect()
    }

    pub fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted =
                conn.execute("DELETE FROM sessions WHERE user_id = ?1", [user_id.to_string()])?;
            Ok(deleted)
        })
    }

    pub fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted =
                conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", [to_millis(now)])?;
            Ok(deleted)
        })
    }

    // -- One-time tokens --

    pub fn insert_token(&self, token: &OneTimeToken) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tokens (hashed_token, kind, user_id, expires_at, sent_to)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    &token.hashed_token,
                    token.kind.as_str(),
                    token.user_id.to_string(),
                    to_millis(token.expires_at),
                    &token.sent_to,
                ],
            )?;
            Ok(())
        })
    }

    /// Fetch and delete a token in one critical section, so two concurrent
    /// consumers can never both see it.
    pub fn take_token(&self, hashed_token: &str, kind: TokenKind) -> Result<Option<OneTimeToken>> {
        let row = self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT hashed_token, kind, user_id, expires_at, sent_to
                     FROM tokens WHERE hashed_token = ?1 AND kind = ?2",
                    (hashed_token, kind.as_str()),
                    |row| {
                        Ok(TokenRow {
                            hashed_token: row.get(0)?,
                            kind: row.get(1)?,
                            user_id: row.get(2)?,
                            expires_at: row.get(3)?,
                            sent_to: row.get(4)?,
                        })
                    },
                )
                .optional()?;

            if row.is_some() {
                conn.execute(
                    "DELETE FROM tokens WHERE hashed_token = ?1 AND kind = ?2",
                    (hashed_token, kind.as_str()),
                )?;
            }
            Ok(row)
        })?;

        row.map(OneTimeToken::try_from).transpose()
    }

    pub fn delete_tokens_for_user(&self, user_id: Uuid, kind: TokenKind) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM tokens WHERE user_id = ?1 AND kind = ?2",
                (user_id.to_string(), kind.as_str()),
            )?;
            Ok(deleted)
        })
    }

    pub fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted =
                conn.execute("DELETE FROM tokens WHERE expires_at <= ?1", [to_millis(now)])?;
            Ok(deleted)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, email, password, role, first_name, last_name, email_verified_at, created_at
         FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                password: row.get(2)?,
                role: row.get(3)?,
                first_name: row.get(4)?,
                last_name: row.get(5)?,
                email_verified_at: row.get(6)?,
                created_at: row.get(7)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        handle: row.get(2)?,
        hashed_session_token: row.get(3)?,
        expires_at: row.get(4)?,
        public_data: row.get(5)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
