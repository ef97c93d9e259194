//! Database module
//!
//! Durable key -> blob persistence for user sessions.

mod schema;

pub use schema::*;

use crate::error::ErrorKind;
use crate::event::{User, UserId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("User not found: {0}")]
    UserNotFound(UserId),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl DbError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UserNotFound(_))
    }

    /// Busy/locked databases are worth retrying; anything else is not
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Sqlite(e) => match e.sqlite_error_code() {
                Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => ErrorKind::Transient,
                _ => ErrorKind::Fatal,
            },
            Self::Unavailable(_) => ErrorKind::Transient,
            Self::UserNotFound(_) => ErrorKind::BadInput,
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_migrations(&self) -> DbResult<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== User Operations ====================

    /// Insert or replace the stored session of a user
    pub fn upsert_user(&self, user: &User, contents: &str) -> DbResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO users (id, name, contents, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                contents = excluded.contents,
                updated_at = excluded.updated_at",
            params![to_sql_id(user.id), user.first_name, contents, now],
        )?;
        Ok(())
    }

    /// Get the stored session of a user
    pub fn get_user(&self, id: UserId) -> DbResult<StoredUser> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, name, contents, updated_at FROM users WHERE id = ?1")?;
        stmt.query_row(params![to_sql_id(id)], row_to_stored_user)
            .optional()?
            .ok_or(DbError::UserNotFound(id))
    }

    /// List every stored user, oldest update first
    pub fn list_users(&self) -> DbResult<Vec<StoredUser>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, name, contents, updated_at FROM users ORDER BY updated_at")?;
        let users = stmt
            .query_map([], row_to_stored_user)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn count_users(&self) -> DbResult<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

// SQLite integers are signed; ids round-trip through the same bit pattern.
#[allow(clippy::cast_possible_wrap)]
fn to_sql_id(id: UserId) -> i64 {
    id.0 as i64
}

#[allow(clippy::cast_sign_loss)]
fn from_sql_id(id: i64) -> UserId {
    UserId(id as u64)
}

fn row_to_stored_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredUser> {
    Ok(StoredUser {
        user: User {
            id: from_sql_id(row.get(0)?),
            first_name: row.get(1)?,
        },
        contents: row.get(2)?,
        updated_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
