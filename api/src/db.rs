use askboard_shared::UserSummary;
use chrono::{SecondsFormat, Utc};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{types::Type, Connection, Row};
use serde::Deserialize;
use std::{str::FromStr, time::Duration};

use crate::{error::ApiError, DbPool};

/// Opens a pool on a database file with foreign keys enforced.
pub fn open_pool(database_url: &str, size: u32) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_url).with_init(init_connection);
    r2d2::Pool::builder().max_size(size).build(manager)
}

fn init_connection(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

/// Runs `f` with a pooled connection on the blocking thread pool.
pub async fn with_conn<T, F>(pool: &DbPool, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&mut Connection) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut *conn)
    })
    .await?
}

/// Current time as stored in every timestamp column.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// `?page=&limit=` query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PageParams {
    pub const MAX_LIMIT: i64 = 50;

    /// Highest page whose offset still fits in an `i64`.
    pub const MAX_PAGE: i64 = i64::MAX / Self::MAX_LIMIT;

    /// Page (1-based) and limit after clamping.
    pub fn resolve(&self, default_limit: i64) -> (i64, i64) {
        let page = self.page.unwrap_or(1).clamp(1, Self::MAX_PAGE);
        let limit = self.limit.unwrap_or(default_limit).clamp(1, Self::MAX_LIMIT);
        (page, limit)
    }
}

pub fn offset(page: i64, limit: i64) -> i64 {
    (page - 1).saturating_mul(limit)
}

/// Reads a `UserSummary` from four consecutive columns starting at `idx`:
/// id, username, name, reputation.
pub fn user_summary(row: &Row<'_>, idx: usize) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: row.get(idx)?,
        username: row.get(idx + 1)?,
        name: row.get(idx + 2)?,
        reputation: row.get(idx + 3)?,
    })
}

/// Reads a TEXT column into one of the shared string enums.
pub fn enum_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn run_migrations(pool: &DbPool) -> Result<(), ApiError> {
    let conn = pool.get()?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            name                 TEXT NOT NULL,
            email                TEXT UNIQUE NOT NULL,
            username             TEXT UNIQUE NOT NULL,
            password_hash        TEXT NOT NULL,
            bio                  TEXT NOT NULL DEFAULT '',
            role                 TEXT NOT NULL DEFAULT 'user',
            reputation           INTEGER NOT NULL DEFAULT 0,
            is_active            INTEGER NOT NULL DEFAULT 1,
            is_banned            INTEGER NOT NULL DEFAULT 0,
            ban_reason           TEXT,
            questions_asked      INTEGER NOT NULL DEFAULT 0,
            answers_given        INTEGER NOT NULL DEFAULT 0,
            accepted_answers     INTEGER NOT NULL DEFAULT 0,
            total_votes_received INTEGER NOT NULL DEFAULT 0,
            created_at           TEXT NOT NULL,
            last_active          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS questions (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            author_id          INTEGER NOT NULL REFERENCES users(id),
            title              TEXT NOT NULL,
            description        TEXT NOT NULL,
            views              INTEGER NOT NULL DEFAULT 0,
            upvotes            INTEGER NOT NULL DEFAULT 0,
            downvotes          INTEGER NOT NULL DEFAULT 0,
            total_votes        INTEGER NOT NULL DEFAULT 0,
            answer_count       INTEGER NOT NULL DEFAULT 0,
            accepted_answer_id INTEGER REFERENCES answers(id) ON DELETE SET NULL,
            is_deleted         INTEGER NOT NULL DEFAULT 0,
            deleted_by         INTEGER REFERENCES users(id),
            deleted_at         TEXT,
            created_at         TEXT NOT NULL,
            updated_at         TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_questions_author ON questions(author_id);
        CREATE INDEX IF NOT EXISTS idx_questions_created ON questions(created_at);
        CREATE INDEX IF NOT EXISTS idx_questions_votes ON questions(total_votes);

        CREATE TABLE IF NOT EXISTS answers (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            question_id INTEGER NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
            author_id   INTEGER NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            upvotes     INTEGER NOT NULL DEFAULT 0,
            downvotes   INTEGER NOT NULL DEFAULT 0,
            total_votes INTEGER NOT NULL DEFAULT 0,
            is_accepted INTEGER NOT NULL DEFAULT 0,
            accepted_at TEXT,
            is_deleted  INTEGER NOT NULL DEFAULT 0,
            deleted_by  INTEGER REFERENCES users(id),
            deleted_at  TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_answers_question ON answers(question_id);
        CREATE INDEX IF NOT EXISTS idx_answers_author ON answers(author_id);

        CREATE TABLE IF NOT EXISTS tags (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            name           TEXT UNIQUE NOT NULL,
            question_count INTEGER NOT NULL DEFAULT 0,
            created_by     INTEGER NOT NULL REFERENCES users(id),
            created_at     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS question_tags (
            question_id INTEGER NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
            tag_id      INTEGER NOT NULL REFERENCES tags(id),
            PRIMARY KEY (question_id, tag_id)
        );
        CREATE INDEX IF NOT EXISTS idx_question_tags_tag ON question_tags(tag_id);

        CREATE TABLE IF NOT EXISTS votes (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            target_type TEXT NOT NULL,
            target_id   INTEGER NOT NULL,
            vote_type   TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(user_id, target_type, target_id)
        );
        CREATE INDEX IF NOT EXISTS idx_votes_target ON votes(target_type, target_id);

        CREATE TABLE IF NOT EXISTS notifications (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            recipient_id        INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            sender_id           INTEGER REFERENCES users(id) ON DELETE SET NULL,
            kind                TEXT NOT NULL,
            message             TEXT NOT NULL,
            related_question_id INTEGER REFERENCES questions(id) ON DELETE SET NULL,
            related_answer_id   INTEGER REFERENCES answers(id) ON DELETE SET NULL,
            is_read             INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL,
            read_at             TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_notifications_recipient
            ON notifications(recipient_id, is_read);

        CREATE TABLE IF NOT EXISTS reports (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            reporter_id INTEGER NOT NULL REFERENCES users(id),
            target_type TEXT NOT NULL,
            target_id   INTEGER NOT NULL,
            reason      TEXT NOT NULL,
            description TEXT NOT NULL,
            status      TEXT NOT NULL DEFAULT 'pending',
            reviewed_by INTEGER REFERENCES users(id),
            reviewed_at TEXT,
            resolution  TEXT,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_reports_status ON reports(status);
        ",
    )?;

    Ok(())
}

/// Single-connection in-memory pool with the schema applied.
#[cfg(test)]
pub fn test_pool() -> DbPool {
    let manager = SqliteConnectionManager::memory().with_init(init_connection);
    let pool = r2d2::Pool::builder()
        .max_size(1)
        .build(manager)
        .expect("in-memory pool");
    run_migrations(&pool).expect("migrations");
    pool
}

/// Database file under the temp dir, removed on drop. Lets tests run
/// several pooled connections against the same data.
#[cfg(test)]
pub struct TempDb {
    pub pool: DbPool,
    path: std::path::PathBuf,
}

#[cfg(test)]
impl TempDb {
    pub fn new(name: &str, size: u32) -> Self {
        let path = std::env::temp_dir().join(format!(
            "askboard-{name}-{}-{}.db",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let pool = open_pool(&path.to_string_lossy(), size).expect("file pool");
        run_migrations(&pool).expect("migrations");
        Self { pool, path }
    }
}

#[cfg(test)]
impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-journal", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}

/// Inserts a user directly, bypassing password hashing. Returns its id.
#[cfg(test)]
pub fn insert_user(conn: &Connection, username: &str, role: askboard_shared::Role) -> i64 {
    let ts = now();
    conn.execute(
        "INSERT INTO users (name, email, username, password_hash, role, created_at, last_active)
         VALUES (?1, ?2, ?1, 'x', ?3, ?4, ?4)",
        rusqlite::params![username, format!("{username}@example.com"), role.as_str(), ts],
    )
    .expect("insert user");
    conn.last_insert_rowid()
}
