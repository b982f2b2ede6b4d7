use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use forum_shared::{
    Answer, AnswerBody, Author, Capability, Created, Message, Paginated, PostRef, UserAnswer,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use crate::{
    auth::{self, AuthUser},
    db,
    error::AppError,
    extract::{Json, Path, Query},
    ledger,
    pagination::{Page, PageParams},
    validate, AppState,
};

const ANSWER_COLUMNS: &str = "a.id, a.question_id, a.user_id, a.body, a.votes, a.is_accepted,
                              a.created_at, a.updated_at, u.username, u.avatar_url";

fn answer_from_row(row: &Row<'_>) -> rusqlite::Result<Answer> {
    Ok(Answer {
        id: row.get(0)?,
        question_id: row.get(1)?,
        user_id: row.get(2)?,
        body: row.get(3)?,
        votes: row.get(4)?,
        is_accepted: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        author: Author {
            username: row.get(8)?,
            avatar_url: row.get(9)?,
        },
    })
}

/// Answers of a question: accepted first, then best voted, then oldest.
pub fn for_question(
    conn: &Connection,
    question_id: i64,
    page: Option<Page>,
) -> Result<Vec<Answer>, AppError> {
    let (limit, offset) = page.map_or((-1, 0), |p| (p.limit, p.offset()));
    let mut stmt = conn.prepare(&format!(
        "SELECT {ANSWER_COLUMNS}
         FROM answers a LEFT JOIN users u ON a.user_id = u.id
         WHERE a.question_id = ?1
         ORDER BY a.is_accepted DESC, a.votes DESC, a.created_at ASC, a.id ASC
         LIMIT ?2 OFFSET ?3"
    ))?;
    let answers = stmt
        .query_map(params![question_id, limit, offset], answer_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(answers)
}

pub fn list_for_user(
    conn: &Connection,
    user_id: i64,
    page: Page,
) -> Result<Paginated<UserAnswer>, AppError> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM answers WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {ANSWER_COLUMNS}, q.title
         FROM answers a
         LEFT JOIN users u ON a.user_id = u.id
         LEFT JOIN questions q ON a.question_id = q.id
         WHERE a.user_id = ?1
         ORDER BY a.created_at DESC, a.id DESC
         LIMIT ?2 OFFSET ?3"
    ))?;
    let items = stmt
        .query_map(params![user_id, page.limit, page.offset()], |row| {
            Ok(UserAnswer {
                answer: answer_from_row(row)?,
                question_title: row.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Paginated {
        items,
        total,
        page: page.page,
        per_page: page.limit,
    })
}

struct AnswerOwner {
    user_id: i64,
    question_id: i64,
    is_accepted: bool,
}

fn owner_of(conn: &Connection, answer_id: i64) -> Result<AnswerOwner, AppError> {
    conn.query_row(
        "SELECT user_id, question_id, is_accepted FROM answers WHERE id = ?1",
        [answer_id],
        |row| {
            Ok(AnswerOwner {
                user_id: row.get(0)?,
                question_id: row.get(1)?,
                is_accepted: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or(AppError::NotFound("answer"))
}

/// Marks `answer_id` as the accepted answer of its question.
///
/// Only the question's author may accept. Clearing the previous accepted
/// answer, setting the new one and marking the question solved happen in one
/// transaction, so readers never see two accepted answers or an accepted
/// answer on an unsolved question.
pub fn accept(conn: &mut Connection, caller: i64, answer_id: i64) -> Result<i64, AppError> {
    db::write_tx(conn, |tx| {
        let question_id = owner_of(tx, answer_id)?.question_id;

        let author: i64 = tx
            .query_row(
                "SELECT user_id FROM questions WHERE id = ?1",
                [question_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(AppError::NotFound("question"))?;

        if author != caller {
            return Err(AppError::Forbidden(
                "only the question's author can accept answers",
            ));
        }

        tx.execute(
            "UPDATE answers SET is_accepted = 0 WHERE question_id = ?1 AND id <> ?2",
            params![question_id, answer_id],
        )?;
        tx.execute("UPDATE answers SET is_accepted = 1 WHERE id = ?1", [answer_id])?;
        tx.execute("UPDATE questions SET is_solved = 1 WHERE id = ?1", [question_id])?;

        Ok(question_id)
    })
}

/// Deletes an answer with its ledger rows. The question stays solved only
/// while it still has an accepted answer.
pub fn remove(conn: &mut Connection, caller: AuthUser, answer_id: i64) -> Result<(), AppError> {
    db::write_tx(conn, |tx| {
        let owner = owner_of(tx, answer_id)?;
        if owner.user_id != caller.user_id && !caller.role.can(Capability::ModerateContent) {
            return Err(AppError::Forbidden("not allowed to delete this answer"));
        }

        ledger::remove_for_post(tx, PostRef::Answer(answer_id))?;
        tx.execute("DELETE FROM answers WHERE id = ?1", [answer_id])?;
        tx.execute(
            "UPDATE questions
             SET answer_count = MAX(answer_count - 1, 0),
                 is_solved = CASE WHEN ?2 THEN 0 ELSE is_solved END
             WHERE id = ?1",
            params![owner.question_id, owner.is_accepted],
        )?;
        Ok(())
    })
}

// ── Handlers ──

/// POST /api/v1/questions/:question_id/answers
pub async fn create_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(question_id): Path<i64>,
    Json(payload): Json<AnswerBody>,
) -> Result<(StatusCode, Json<Created>), AppError> {
    let caller = auth::require_user(&headers, &state.jwt_secret)?;
    let body = validate::clean(&payload.body);
    validate::length("body", &body, 10, None)?;

    let id = db::run(&state.db, move |conn| {
        db::write_tx(conn, |tx| {
            let exists = tx
                .query_row("SELECT 1 FROM questions WHERE id = ?1", [question_id], |_| Ok(()))
                .optional()?;
            if exists.is_none() {
                return Err(AppError::NotFound("question"));
            }

            tx.execute(
                "INSERT INTO answers (question_id, user_id, body) VALUES (?1, ?2, ?3)",
                params![question_id, caller.user_id, body],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE questions SET answer_count = answer_count + 1 WHERE id = ?1",
                [question_id],
            )?;
            Ok(id)
        })
    })
    .await?;

    info!(answer_id = id, question_id, user_id = caller.user_id, "answer created");
    Ok((
        StatusCode::CREATED,
        Json(Created {
            id,
            message: "answer created".into(),
        }),
    ))
}

/// GET /api/v1/questions/:question_id/answers?page=1&limit=10
pub async fn list_answers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(question_id): Path<i64>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<Answer>>, AppError> {
    auth::require_user(&headers, &state.jwt_secret)?;
    let page = params.resolve(10)?;

    let answers = db::run(&state.db, move |conn| {
        for_question(conn, question_id, Some(page))
    })
    .await?;

    Ok(Json(answers))
}

/// PUT /api/v1/answers/:id
pub async fn update_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<AnswerBody>,
) -> Result<Json<Message>, AppError> {
    let caller = auth::require_user(&headers, &state.jwt_secret)?;
    let body = validate::clean(&payload.body);
    validate::length("body", &body, 10, None)?;

    db::run(&state.db, move |conn| {
        db::write_tx(conn, |tx| {
            if owner_of(tx, id)?.user_id != caller.user_id {
                return Err(AppError::Forbidden("only the author can edit this answer"));
            }
            tx.execute(
                "UPDATE answers
                 SET body = ?1, updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE id = ?2",
                params![body, id],
            )?;
            Ok(())
        })
    })
    .await?;

    Ok(Json(Message {
        message: "answer updated".into(),
    }))
}

/// DELETE /api/v1/answers/:id
pub async fn delete_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Message>, AppError> {
    let caller = auth::require_user(&headers, &state.jwt_secret)?;

    db::run(&state.db, move |conn| remove(conn, caller, id)).await?;

    info!(answer_id = id, user_id = caller.user_id, "answer deleted");
    Ok(Json(Message {
        message: "answer deleted".into(),
    }))
}

/// POST /api/v1/answers/:id/accept
pub async fn accept_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Message>, AppError> {
    let caller = auth::require_user(&headers, &state.jwt_secret)?;

    let question_id = db::run(&state.db, move |conn| accept(conn, caller.user_id, id)).await?;

    info!(answer_id = id, question_id, "answer accepted");
    Ok(Json(Message {
        message: "answer accepted".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::*;
    use crate::ledger::Direction;
    use forum_shared::Role;

    fn accepted(conn: &Connection, question_id: i64) -> Vec<i64> {
        let mut stmt = conn
            .prepare("SELECT id FROM answers WHERE question_id = ?1 AND is_accepted = 1")
            .unwrap();
        let ids = stmt
            .query_map([question_id], |r| r.get(0))
            .unwrap()
            .collect::<Result<Vec<i64>, _>>()
            .unwrap();
        ids
    }

    fn solved(conn: &Connection, question_id: i64) -> bool {
        conn.query_row("SELECT is_solved FROM questions WHERE id = ?1", [question_id], |r| {
            r.get(0)
        })
        .unwrap()
    }

    #[test]
    fn accepting_moves_the_mark() {
        let mut conn = memory();
        let asker = user(&conn, "asker");
        let helper = user(&conn, "helper");
        let qid = question(&conn, asker, "title here");
        let a1 = answer(&conn, qid, helper, "first answer");
        let a2 = answer(&conn, qid, helper, "second answer");

        accept(&mut conn, asker, a1).unwrap();
        assert_eq!(accepted(&conn, qid), vec![a1]);
        assert!(solved(&conn, qid));

        accept(&mut conn, asker, a2).unwrap();
        assert_eq!(accepted(&conn, qid), vec![a2]);

        // re-accepting is a no-op
        accept(&mut conn, asker, a2).unwrap();
        assert_eq!(accepted(&conn, qid), vec![a2]);
        assert!(solved(&conn, qid));
    }

    #[test]
    fn only_the_asker_may_accept() {
        let mut conn = memory();
        let asker = user(&conn, "asker");
        let helper = user(&conn, "helper");
        let qid = question(&conn, asker, "title here");
        let a1 = answer(&conn, qid, helper, "first answer");

        let err = accept(&mut conn, helper, a1).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert!(accepted(&conn, qid).is_empty());
        assert!(!solved(&conn, qid));

        assert!(matches!(
            accept(&mut conn, asker, 999),
            Err(AppError::NotFound("answer"))
        ));
    }

    #[test]
    fn deleting_the_accepted_answer_unsolves() {
        let mut conn = memory();
        let asker = user(&conn, "asker");
        let helper = user(&conn, "helper");
        let qid = question(&conn, asker, "title here");
        let a1 = answer(&conn, qid, helper, "first answer");
        ledger::insert(&conn, asker, PostRef::Answer(a1), Direction::Up).unwrap();
        accept(&mut conn, asker, a1).unwrap();

        let stranger = AuthUser { user_id: asker, role: Role::Member };
        assert!(matches!(
            remove(&mut conn, stranger, a1),
            Err(AppError::Forbidden(_))
        ));

        let author = AuthUser { user_id: helper, role: Role::Member };
        remove(&mut conn, author, a1).unwrap();

        assert!(!solved(&conn, qid));
        assert!(ledger::find(&conn, asker, PostRef::Answer(a1)).unwrap().is_none());
        let count: i64 = conn
            .query_row("SELECT answer_count FROM questions WHERE id = ?1", [qid], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn listing_orders_accepted_then_votes() {
        let mut conn = memory();
        let asker = user(&conn, "asker");
        let qid = question(&conn, asker, "title here");
        let a1 = answer(&conn, qid, asker, "first answer");
        let a2 = answer(&conn, qid, asker, "second answer");
        let a3 = answer(&conn, qid, asker, "third answer");
        conn.execute("UPDATE answers SET votes = 5 WHERE id = ?1", [a2]).unwrap();
        accept(&mut conn, asker, a3).unwrap();

        let ids: Vec<i64> = for_question(&conn, qid, None)
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![a3, a2, a1]);

        let page = for_question(&conn, qid, Some(Page { page: 2, limit: 2 })).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, a1);
    }
}
