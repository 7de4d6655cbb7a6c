//! SQLite-backed datastore.
//!
//! One file holds enrollment, tokens, attendance and the two kiosk-local
//! single-row tables (staged token, active login). All access goes through
//! [`tokio_rusqlite`] so the daemon never blocks the runtime on disk I/O.

use crate::error::StoreError;
use crate::ports::{Datastore, IdentityProvider};
use crate::types::{
    AttendanceRecord, AttendanceToken, BrowserFamily, DeviceClass, Identity, ReferenceRecord,
};
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use std::path::Path;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS students (
    email       TEXT PRIMARY KEY,
    student_id  TEXT NOT NULL,
    photo_url   TEXT NOT NULL,
    active      INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS attendance_tokens (
    token          TEXT PRIMARY KEY,
    class_session  TEXT NOT NULL,
    expires_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance_records (
    id             TEXT PRIMARY KEY,
    student_email  TEXT NOT NULL,
    class_session  TEXT NOT NULL,
    recorded_at    TEXT NOT NULL,
    location       TEXT NOT NULL,
    ip             TEXT NOT NULL,
    device         TEXT NOT NULL,
    browser        TEXT NOT NULL,
    user_agent     TEXT NOT NULL,
    token          TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS staged_token (
    slot       INTEGER PRIMARY KEY CHECK (slot = 0),
    token      TEXT NOT NULL,
    staged_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS active_login (
    slot          INTEGER PRIMARY KEY CHECK (slot = 0),
    student_id    TEXT NOT NULL,
    email         TEXT NOT NULL,
    signed_in_at  TEXT NOT NULL
);
";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).await?;
        let store = Self::prepare(conn).await?;
        tracing::info!(path = %path.display(), "attendance database ready");
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::prepare(conn).await
    }

    async fn prepare(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Enrollment seeding, used by provisioning tooling and tests.
    pub async fn upsert_student(
        &self,
        email: &str,
        student_id: &str,
        photo_url: &str,
        active: bool,
    ) -> Result<(), StoreError> {
        let (email, student_id, photo_url) =
            (email.to_string(), student_id.to_string(), photo_url.to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO students (email, student_id, photo_url, active)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(email) DO UPDATE SET
                         student_id = excluded.student_id,
                         photo_url  = excluded.photo_url,
                         active     = excluded.active",
                    rusqlite::params![email, student_id, photo_url, active as i64],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Token provisioning, used by classroom tooling and tests.
    pub async fn insert_token(
        &self,
        token: &str,
        class_session: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let (token, class_session) = (token.to_string(), class_session.to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO attendance_tokens (token, class_session, expires_at)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![token, class_session, expires_at.to_rfc3339()],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_active_login(&self, student_id: &str, email: &str) -> Result<(), StoreError> {
        let (student_id, email) = (student_id.to_string(), email.to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO active_login (slot, student_id, email, signed_in_at)
                     VALUES (0, ?1, ?2, ?3)
                     ON CONFLICT(slot) DO UPDATE SET
                         student_id   = excluded.student_id,
                         email        = excluded.email,
                         signed_in_at = excluded.signed_in_at",
                    rusqlite::params![student_id, email, Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn clear_active_login(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute("DELETE FROM active_login WHERE slot = 0", [])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

/// The signed-in student is whatever the login shell last wrote to the
/// kiosk-local slot.
impl IdentityProvider for SqliteStore {
    async fn current_user(&self) -> Result<Option<Identity>, StoreError> {
        let identity = self
            .conn
            .call(|conn| {
                let row = conn
                    .query_row(
                        "SELECT student_id, email FROM active_login WHERE slot = 0",
                        [],
                        |row| {
                            Ok(Identity {
                                student_id: row.get(0)?,
                                email: row.get(1)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(identity)
    }
}

impl Datastore for SqliteStore {
    async fn reference_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ReferenceRecord>, StoreError> {
        let email = email.to_string();
        let record = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT email, student_id, photo_url FROM students
                         WHERE email = ?1 AND active = 1",
                        rusqlite::params![email],
                        |row| {
                            Ok(ReferenceRecord {
                                email: row.get(0)?,
                                student_id: row.get(1)?,
                                photo_url: row.get(2)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(record)
    }

    async fn token_by_id(&self, token: &str) -> Result<Option<AttendanceToken>, StoreError> {
        let token = token.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT token, class_session, expires_at FROM attendance_tokens
                         WHERE token = ?1",
                        rusqlite::params![token],
                        |row| {
                            Ok(AttendanceToken {
                                token: row.get(0)?,
                                class_session: row.get(1)?,
                                expires_at: parse_timestamp(2, row.get(2)?)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(row)
    }

    async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        let record = record.clone();
        let result = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attendance_records
                         (id, student_email, class_session, recorded_at, location,
                          ip, device, browser, user_agent, token)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    rusqlite::params![
                        record.id,
                        record.student_email,
                        record.class_session,
                        record.recorded_at.to_rfc3339(),
                        record.location,
                        record.ip,
                        record.device.as_str(),
                        record.browser.as_str(),
                        record.user_agent,
                        record.token,
                    ],
                )?;
                Ok(())
            })
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::DuplicateToken),
            Err(err) => Err(StoreError::Database(err)),
        }
    }

    async fn recent_attendance(
        &self,
        email: &str,
        limit: u32,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let email = email.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, student_email, class_session, recorded_at, location,
                            ip, device, browser, user_agent, token
                     FROM attendance_records
                     WHERE student_email = ?1
                     ORDER BY recorded_at DESC
                     LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![email, limit], |row| {
                        Ok(AttendanceRecord {
                            id: row.get(0)?,
                            student_email: row.get(1)?,
                            class_session: row.get(2)?,
                            recorded_at: parse_timestamp(3, row.get(3)?)?,
                            location: row.get(4)?,
                            ip: row.get(5)?,
                            device: DeviceClass::from_db(&row.get::<_, String>(6)?),
                            browser: BrowserFamily::from_db(&row.get::<_, String>(7)?),
                            user_agent: row.get(8)?,
                            token: row.get(9)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    async fn stage_token(&self, token: &str) -> Result<(), StoreError> {
        let token = token.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO staged_token (slot, token, staged_at)
                     VALUES (0, ?1, ?2)
                     ON CONFLICT(slot) DO UPDATE SET
                         token     = excluded.token,
                         staged_at = excluded.staged_at",
                    rusqlite::params![token, Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn staged_token(&self) -> Result<Option<String>, StoreError> {
        let token = self
            .conn
            .call(|conn| {
                let row = conn
                    .query_row("SELECT token FROM staged_token WHERE slot = 0", [], |row| {
                        row.get(0)
                    })
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(token)
    }

    async fn clear_staged_token(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute("DELETE FROM staged_token WHERE slot = 0", [])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn parse_timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn is_unique_violation(err: &tokio_rusqlite::Error) -> bool {
    matches!(
        err,
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
