use std::{str::FromStr, time::Duration};

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{types::Type, Connection, Row, Transaction, TransactionBehavior};

use crate::{error::AppError, DbPool};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        wallet      TEXT UNIQUE NOT NULL,
        username    TEXT NOT NULL,
        email       TEXT NOT NULL DEFAULT '',
        phone       TEXT NOT NULL DEFAULT '',
        avatar_url  TEXT NOT NULL DEFAULT '',
        role        TEXT NOT NULL DEFAULT 'Member',
        reputation  INTEGER NOT NULL DEFAULT 0,
        is_active   INTEGER NOT NULL DEFAULT 1,
        created_at  TEXT NOT NULL DEFAULT (datetime('now')),
        last_seen   TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS questions (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id      INTEGER NOT NULL REFERENCES users(id),
        title        TEXT NOT NULL,
        body         TEXT NOT NULL,
        votes        INTEGER NOT NULL DEFAULT 0,
        view_count   INTEGER NOT NULL DEFAULT 0,
        answer_count INTEGER NOT NULL DEFAULT 0,
        is_solved    INTEGER NOT NULL DEFAULT 0,
        created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
        updated_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
    );
    CREATE INDEX IF NOT EXISTS idx_questions_user ON questions(user_id);

    CREATE TABLE IF NOT EXISTS answers (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        question_id INTEGER NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
        user_id     INTEGER NOT NULL REFERENCES users(id),
        body        TEXT NOT NULL,
        votes       INTEGER NOT NULL DEFAULT 0,
        is_accepted INTEGER NOT NULL DEFAULT 0,
        created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
        updated_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
    );
    CREATE INDEX IF NOT EXISTS idx_answers_question ON answers(question_id);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_answers_one_accepted
        ON answers(question_id) WHERE is_accepted = 1;

    -- post_type discriminates the table post_id points into
    CREATE TABLE IF NOT EXISTS votes (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id     INTEGER NOT NULL REFERENCES users(id),
        post_id     INTEGER NOT NULL,
        post_type   TEXT NOT NULL CHECK (post_type IN ('question', 'answer')),
        type        INTEGER NOT NULL CHECK (type IN (1, -1)),
        created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
        UNIQUE(user_id, post_type, post_id)
    );
    CREATE INDEX IF NOT EXISTS idx_votes_post ON votes(post_type, post_id);

    CREATE TABLE IF NOT EXISTS tags (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        name        TEXT UNIQUE NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        usage_count INTEGER NOT NULL DEFAULT 0,
        created_at  TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS question_tags (
        question_id INTEGER NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
        tag_id      INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
        PRIMARY KEY (question_id, tag_id)
    );
    CREATE INDEX IF NOT EXISTS idx_question_tags_tag ON question_tags(tag_id);
";

fn configure(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "foreign_keys", "ON")
}

pub fn pool(database_url: &str) -> Result<DbPool, AppError> {
    let manager = SqliteConnectionManager::file(database_url).with_init(configure);
    Ok(r2d2::Pool::new(manager)?)
}

pub fn run_migrations(pool: &DbPool) -> Result<(), AppError> {
    let conn = pool.get()?;
    migrate(&conn)
}

pub fn migrate(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Runs `f` on a pooled connection on the blocking thread pool.
pub async fn run<F, T>(pool: &DbPool, f: F) -> Result<T, AppError>
where
    F: FnOnce(&mut Connection) -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut *conn)
    })
    .await?
}

/// Runs `f` inside a `BEGIN IMMEDIATE` transaction.
///
/// The write lock is taken up front, so concurrent writers queue on the
/// busy timeout instead of interleaving their read-modify-write cycles.
/// Any error rolls the whole unit back.
pub fn write_tx<F, T>(conn: &mut Connection, f: F) -> Result<T, AppError>
where
    F: FnOnce(&Transaction<'_>) -> Result<T, AppError>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}

/// Runs `f` inside a deferred transaction so multi-query reads (a count
/// plus a page) see one snapshot. Nothing is written, so it is never
/// committed.
pub fn read_tx<F, T>(conn: &mut Connection, f: F) -> Result<T, AppError>
where
    F: FnOnce(&Transaction<'_>) -> Result<T, AppError>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
    f(&tx)
}

/// Reads a text column through `FromStr`.
pub fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
pub mod testing {
    use super::*;

    pub fn memory() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        configure(&mut conn).unwrap();
        migrate(&conn).unwrap();
        conn
    }

    /// A single-connection pool so every checkout sees the same in-memory database.
    pub fn memory_pool() -> DbPool {
        let manager = SqliteConnectionManager::memory().with_init(configure);
        let pool = r2d2::Pool::builder().max_size(1).build(manager).unwrap();
        run_migrations(&pool).unwrap();
        pool
    }

    pub fn user(conn: &Connection, wallet: &str) -> i64 {
        conn.execute(
            "INSERT INTO users (wallet, username) VALUES (?1, ?1)",
            [wallet],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    pub fn question(conn: &Connection, user_id: i64, title: &str) -> i64 {
        conn.execute(
            "INSERT INTO questions (user_id, title, body) VALUES (?1, ?2, 'question body text')",
            rusqlite::params![user_id, title],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    pub fn answer(conn: &Connection, question_id: i64, user_id: i64, body: &str) -> i64 {
        conn.execute(
            "INSERT INTO answers (question_id, user_id, body) VALUES (?1, ?2, ?3)",
            rusqlite::params![question_id, user_id, body],
        )
        .unwrap();
        let id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE questions SET answer_count = answer_count + 1 WHERE id = ?1",
            [question_id],
        )
        .unwrap();
        id
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = memory();
        migrate(&conn).unwrap();
    }

    #[test]
    fn failed_unit_rolls_back() {
        let mut conn = memory();
        let uid = user(&conn, "w1");

        let res: Result<(), AppError> = write_tx(&mut conn, |tx| {
            tx.execute("UPDATE users SET reputation = 10 WHERE id = ?1", [uid])?;
            Err(AppError::validation("abort"))
        });
        assert!(res.is_err());

        let rep: i64 = conn
            .query_row("SELECT reputation FROM users WHERE id = ?1", [uid], |r| r.get(0))
            .unwrap();
        assert_eq!(rep, 0);
    }

    #[test]
    fn reads_hold_one_snapshot() {
        let path = std::env::temp_dir().join(format!("forum-read-{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut reader = Connection::open(&path).unwrap();
        migrate(&reader).unwrap();
        let writer = Connection::open(&path).unwrap();
        writer.busy_timeout(Duration::ZERO).unwrap();
        user(&writer, "w1");

        read_tx(&mut reader, |tx| {
            let before: i64 = tx.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
            assert!(writer
                .execute("INSERT INTO users (wallet, username) VALUES ('w2', 'w2')", [])
                .is_err());
            let after: i64 = tx.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
            assert_eq!(before, after);
            Ok(())
        })
        .unwrap();

        user(&writer, "w2");
        drop(reader);
        drop(writer);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn one_accepted_answer_per_question() {
        let conn = memory();
        let uid = user(&conn, "w1");
        let qid = question(&conn, uid, "title");
        let a1 = answer(&conn, qid, uid, "first answer");
        let a2 = answer(&conn, qid, uid, "second answer");

        conn.execute("UPDATE answers SET is_accepted = 1 WHERE id = ?1", [a1])
            .unwrap();
        assert!(conn
            .execute("UPDATE answers SET is_accepted = 1 WHERE id = ?1", [a2])
            .is_err());
    }
}
