//! Vote ledger: one row per (user, post). The authoritative record of who
//! voted on what; the `votes` columns on posts are derived from it.

use forum_shared::{PostRef, UserVote};
use rusqlite::{params, Connection, OptionalExtension};

use crate::{db::parse_column, error::AppError, pagination::Page};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn value(self) -> i64 {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
        }
    }
}

impl TryFrom<i64> for Direction {
    type Error = AppError;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Direction::Up),
            -1 => Ok(Direction::Down),
            _ => Err(AppError::validation(
                "type must be 1 (upvote) or -1 (downvote)",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerVote {
    pub id: i64,
    pub direction: Direction,
}

pub fn find(conn: &Connection, user_id: i64, post: PostRef) -> Result<Option<LedgerVote>, AppError> {
    let row = conn
        .query_row(
            "SELECT id, type FROM votes
             WHERE user_id = ?1 AND post_type = ?2 AND post_id = ?3",
            params![user_id, post.kind().as_str(), post.id()],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;

    match row {
        Some((id, value)) => Ok(Some(LedgerVote {
            id,
            direction: Direction::try_from(value)?,
        })),
        None => Ok(None),
    }
}

pub fn insert(
    conn: &Connection,
    user_id: i64,
    post: PostRef,
    direction: Direction,
) -> Result<i64, AppError> {
    conn.execute(
        "INSERT INTO votes (user_id, post_id, post_type, type) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, post.id(), post.kind().as_str(), direction.value()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Flips a vote. The re-cast counts as a fresh vote for ordering.
pub fn set_direction(conn: &Connection, vote_id: i64, direction: Direction) -> Result<(), AppError> {
    conn.execute(
        "UPDATE votes SET type = ?1, created_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
         WHERE id = ?2",
        params![direction.value(), vote_id],
    )?;
    Ok(())
}

pub fn remove(conn: &Connection, vote_id: i64) -> Result<(), AppError> {
    conn.execute("DELETE FROM votes WHERE id = ?1", [vote_id])?;
    Ok(())
}

/// Drops every ledger row pointing at `post`. Used when the post itself goes.
pub fn remove_for_post(conn: &Connection, post: PostRef) -> Result<usize, AppError> {
    Ok(conn.execute(
        "DELETE FROM votes WHERE post_type = ?1 AND post_id = ?2",
        params![post.kind().as_str(), post.id()],
    )?)
}

/// Votes cast by `user_id`, newest first, each with the post's current
/// title (questions) or body (answers).
pub fn list_for_user(
    conn: &Connection,
    user_id: i64,
    page: Page,
) -> Result<(Vec<UserVote>, i64), AppError> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM votes WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT v.id, v.user_id, v.post_id, v.post_type, v.type, v.created_at,
                CASE v.post_type
                    WHEN 'question' THEN q.title
                    WHEN 'answer' THEN a.body
                END
         FROM votes v
         LEFT JOIN questions q ON v.post_type = 'question' AND v.post_id = q.id
         LEFT JOIN answers a ON v.post_type = 'answer' AND v.post_id = a.id
         WHERE v.user_id = ?1
         ORDER BY v.created_at DESC, v.id DESC
         LIMIT ?2 OFFSET ?3",
    )?;

    let votes = stmt
        .query_map(params![user_id, page.limit, page.offset()], |row| {
            Ok(UserVote {
                id: row.get(0)?,
                user_id: row.get(1)?,
                post_id: row.get(2)?,
                post_type: parse_column(row, 3)?,
                r#type: row.get(4)?,
                created_at: row.get(5)?,
                post_content: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((votes, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::*;

    #[test]
    fn direction_rejects_other_values() {
        assert_eq!(Direction::try_from(1).unwrap(), Direction::Up);
        assert_eq!(Direction::try_from(-1).unwrap(), Direction::Down);
        assert!(Direction::try_from(0).is_err());
        assert!(Direction::try_from(2).is_err());
    }

    #[test]
    fn one_row_per_user_and_post() {
        let conn = memory();
        let uid = user(&conn, "w1");
        let post = PostRef::Answer(7);

        insert(&conn, uid, post, Direction::Up).unwrap();
        assert!(insert(&conn, uid, post, Direction::Down).is_err());
        // same id, other table: a separate ledger entry
        insert(&conn, uid, PostRef::Question(7), Direction::Down).unwrap();

        assert_eq!(find(&conn, uid, post).unwrap().unwrap().direction, Direction::Up);
        assert_eq!(
            find(&conn, uid, PostRef::Question(7)).unwrap().unwrap().direction,
            Direction::Down
        );
    }

    #[test]
    fn listing_snapshots_post_content() {
        let conn = memory();
        let uid = user(&conn, "w1");
        let qid = question(&conn, uid, "How do lifetimes work?");
        let aid = answer(&conn, qid, uid, "They describe borrows.");

        insert(&conn, uid, PostRef::Question(qid), Direction::Up).unwrap();
        insert(&conn, uid, PostRef::Answer(aid), Direction::Down).unwrap();
        insert(&conn, uid, PostRef::Answer(999), Direction::Up).unwrap();

        let (votes, total) = list_for_user(&conn, uid, Page { page: 1, limit: 10 }).unwrap();
        assert_eq!(total, 3);
        assert_eq!(votes.len(), 3);

        // newest first
        assert_eq!(votes[0].post_id, 999);
        assert_eq!(votes[0].post_content, None);
        assert_eq!(votes[1].post_content.as_deref(), Some("They describe borrows."));
        assert_eq!(votes[2].post_content.as_deref(), Some("How do lifetimes work?"));

        let (second, _) = list_for_user(&conn, uid, Page { page: 2, limit: 2 }).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].post_id, qid);
    }
}
