use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use forum_shared::{
    Author, Capability, CreateQuestion, Created, Message, Paginated, PostRef, Question,
    QuestionDetail, UpdateQuestion,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    answers, auth, db,
    error::AppError,
    extract::{Json, Path, Query},
    ledger,
    pagination::{Page, PageParams},
    tags, validate, AppState,
};

const MAX_TAGS: usize = 5;
const SEARCH_LIMIT: i64 = 20;

pub const QUESTION_COLUMNS: &str = "q.id, q.user_id, q.title, q.body, q.votes, q.view_count,
                                    q.answer_count, q.is_solved, q.created_at, q.updated_at,
                                    u.username, u.avatar_url";

pub fn question_from_row(row: &Row<'_>) -> rusqlite::Result<Question> {
    Ok(Question {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
        votes: row.get(4)?,
        view_count: row.get(5)?,
        answer_count: row.get(6)?,
        is_solved: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        author: Author {
            username: row.get(10)?,
            avatar_url: row.get(11)?,
        },
    })
}

/// Which questions a listing covers.
#[derive(Debug, Clone, Copy)]
pub enum Listing {
    All,
    ByUser(i64),
    ByTag(i64),
}

impl Listing {
    fn from_where(self) -> &'static str {
        match self {
            Listing::All => "FROM questions q LEFT JOIN users u ON q.user_id = u.id",
            Listing::ByUser(_) => {
                "FROM questions q LEFT JOIN users u ON q.user_id = u.id WHERE q.user_id = ?"
            }
            Listing::ByTag(_) => {
                "FROM questions q
                 JOIN question_tags qt ON qt.question_id = q.id
                 LEFT JOIN users u ON q.user_id = u.id
                 WHERE qt.tag_id = ?"
            }
        }
    }

    fn arg(self) -> Option<i64> {
        match self {
            Listing::All => None,
            Listing::ByUser(id) | Listing::ByTag(id) => Some(id),
        }
    }
}

/// Newest-first page of questions.
pub fn list(conn: &Connection, listing: Listing, page: Page) -> Result<Paginated<Question>, AppError> {
    let from_where = listing.from_where();
    let arg = listing.arg();

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) {from_where}"),
        params_from_iter(arg.iter()),
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {QUESTION_COLUMNS} {from_where}
         ORDER BY q.created_at DESC, q.id DESC
         LIMIT ? OFFSET ?"
    ))?;
    let args: Vec<i64> = arg
        .into_iter()
        .chain([page.limit, page.offset()])
        .collect();
    let items = stmt
        .query_map(params_from_iter(args), question_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Paginated {
        items,
        total,
        page: page.page,
        per_page: page.limit,
    })
}

pub fn find(conn: &Connection, id: i64) -> Result<Option<Question>, AppError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {QUESTION_COLUMNS}
                 FROM questions q LEFT JOIN users u ON q.user_id = u.id
                 WHERE q.id = ?1"
            ),
            [id],
            question_from_row,
        )
        .optional()?)
}

fn author_of(conn: &Connection, id: i64) -> Result<i64, AppError> {
    conn.query_row("SELECT user_id FROM questions WHERE id = ?1", [id], |row| {
        row.get(0)
    })
    .optional()?
    .ok_or(AppError::NotFound("question"))
}

fn validate_question(title: &str, body: &str, tags: Option<&[String]>) -> Result<(), AppError> {
    validate::length("title", title, 5, Some(200))?;
    validate::length("body", body, 10, None)?;
    if tags.is_some_and(|t| t.len() > MAX_TAGS) {
        return Err(AppError::validation(format!(
            "a question takes at most {MAX_TAGS} tags"
        )));
    }
    Ok(())
}

/// Removes every tag link of a question, keeping usage counts in step.
fn unlink_tags(conn: &Connection, question_id: i64) -> Result<(), AppError> {
    conn.execute(
        "UPDATE tags SET usage_count = MAX(usage_count - 1, 0)
         WHERE id IN (SELECT tag_id FROM question_tags WHERE question_id = ?1)",
        [question_id],
    )?;
    conn.execute("DELETE FROM question_tags WHERE question_id = ?1", [question_id])?;
    Ok(())
}

fn link_tags(conn: &Connection, question_id: i64, names: &[String]) -> Result<(), AppError> {
    for tag_id in tags::resolve_names(conn, names)? {
        conn.execute(
            "INSERT INTO question_tags (question_id, tag_id) VALUES (?1, ?2)",
            params![question_id, tag_id],
        )?;
        conn.execute(
            "UPDATE tags SET usage_count = usage_count + 1 WHERE id = ?1",
            [tag_id],
        )?;
    }
    Ok(())
}

// ── Query params ──

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    q: String,
}

// ── Handlers ──

/// GET /questions?page=1&limit=10
pub async fn list_questions(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<Question>>, AppError> {
    let page = params.resolve(10)?;
    let result = db::run(&state.db, move |conn| {
        db::read_tx(conn, |tx| list(tx, Listing::All, page))
    })
    .await?;
    Ok(Json(result))
}

/// GET /questions/search?q=...
pub async fn search_questions(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Question>>, AppError> {
    let term = params.q.trim().to_string();
    if term.is_empty() {
        return Err(AppError::validation("search term is required"));
    }

    let questions = db::run(&state.db, move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUESTION_COLUMNS}
             FROM questions q LEFT JOIN users u ON q.user_id = u.id
             WHERE q.title LIKE '%' || ?1 || '%' OR q.body LIKE '%' || ?1 || '%'
             ORDER BY (q.title LIKE '%' || ?1 || '%') DESC, q.votes DESC, q.created_at DESC
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![term, SEARCH_LIMIT], question_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
    .await?;

    Ok(Json(questions))
}

/// GET /questions/:id: question with its tags and answers
pub async fn get_question(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<QuestionDetail>, AppError> {
    let detail = db::run(&state.db, move |conn| {
        if let Err(e) = conn.execute(
            "UPDATE questions SET view_count = view_count + 1 WHERE id = ?1",
            [id],
        ) {
            warn!(question_id = id, error = %e, "failed to bump view count");
        }

        let question = find(conn, id)?.ok_or(AppError::NotFound("question"))?;
        let tags = tags::for_question(conn, id)?;
        let answers = answers::for_question(conn, id, None)?;

        Ok(QuestionDetail {
            question,
            tags,
            answers,
        })
    })
    .await?;

    Ok(Json(detail))
}

/// POST /api/v1/questions
pub async fn create_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateQuestion>,
) -> Result<(StatusCode, Json<Created>), AppError> {
    let caller = auth::require_user(&headers, &state.jwt_secret)?;
    let title = validate::clean(&payload.title);
    let body = validate::clean(&payload.body);
    validate_question(&title, &body, Some(&payload.tags))?;

    let id = db::run(&state.db, move |conn| {
        db::write_tx(conn, |tx| {
            tx.execute(
                "INSERT INTO questions (user_id, title, body) VALUES (?1, ?2, ?3)",
                params![caller.user_id, title, body],
            )?;
            let id = tx.last_insert_rowid();
            link_tags(tx, id, &payload.tags)?;
            Ok(id)
        })
    })
    .await?;

    info!(question_id = id, user_id = caller.user_id, "question created");
    Ok((
        StatusCode::CREATED,
        Json(Created {
            id,
            message: "question created".into(),
        }),
    ))
}

/// PUT /api/v1/questions/:id
pub async fn update_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateQuestion>,
) -> Result<Json<Message>, AppError> {
    let caller = auth::require_user(&headers, &state.jwt_secret)?;
    let title = validate::clean(&payload.title);
    let body = validate::clean(&payload.body);
    validate_question(&title, &body, payload.tags.as_deref())?;

    db::run(&state.db, move |conn| {
        db::write_tx(conn, |tx| {
            if author_of(tx, id)? != caller.user_id {
                return Err(AppError::Forbidden("only the author can edit this question"));
            }

            tx.execute(
                "UPDATE questions
                 SET title = ?1, body = ?2, updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE id = ?3",
                params![title, body, id],
            )?;

            if let Some(names) = &payload.tags {
                unlink_tags(tx, id)?;
                link_tags(tx, id, names)?;
            }
            Ok(())
        })
    })
    .await?;

    Ok(Json(Message {
        message: "question updated".into(),
    }))
}

/// DELETE /api/v1/questions/:id: also drops its answers and every vote on them
pub async fn delete_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Message>, AppError> {
    let caller = auth::require_user(&headers, &state.jwt_secret)?;

    db::run(&state.db, move |conn| {
        db::write_tx(conn, |tx| {
            let author = author_of(tx, id)?;
            if author != caller.user_id && !caller.role.can(Capability::ModerateContent) {
                return Err(AppError::Forbidden("not allowed to delete this question"));
            }

            let answer_ids = {
                let mut stmt = tx.prepare("SELECT id FROM answers WHERE question_id = ?1")?;
                let ids = stmt
                    .query_map([id], |row| row.get::<_, i64>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                ids
            };
            for answer_id in answer_ids {
                ledger::remove_for_post(tx, PostRef::Answer(answer_id))?;
            }
            ledger::remove_for_post(tx, PostRef::Question(id))?;

            unlink_tags(tx, id)?;
            tx.execute("DELETE FROM questions WHERE id = ?1", [id])?;
            Ok(())
        })
    })
    .await?;

    info!(question_id = id, user_id = caller.user_id, "question deleted");
    Ok(Json(Message {
        message: "question deleted".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::*;

    fn tag(conn: &Connection, name: &str) -> i64 {
        conn.execute("INSERT INTO tags (name) VALUES (?1)", [name]).unwrap();
        conn.last_insert_rowid()
    }

    fn usage(conn: &Connection, tag_id: i64) -> i64 {
        conn.query_row("SELECT usage_count FROM tags WHERE id = ?1", [tag_id], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn listings_filter_and_page() {
        let conn = memory();
        let u1 = user(&conn, "w1");
        let u2 = user(&conn, "w2");
        let rust = tag(&conn, "rust");
        let q1 = question(&conn, u1, "first question");
        question(&conn, u2, "second question");
        let q3 = question(&conn, u1, "third question");
        link_tags(&conn, q1, &["rust".to_string()]).unwrap();

        let all = list(&conn, Listing::All, Page { page: 1, limit: 2 }).unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.items.len(), 2);
        assert_eq!(all.items[0].id, q3);
        assert_eq!(all.items[0].author.username.as_deref(), Some("w1"));

        let mine = list(&conn, Listing::ByUser(u1), Page { page: 1, limit: 10 }).unwrap();
        assert_eq!(mine.total, 2);

        let tagged = list(&conn, Listing::ByTag(rust), Page { page: 1, limit: 10 }).unwrap();
        assert_eq!(tagged.total, 1);
        assert_eq!(tagged.items[0].id, q1);
        assert_eq!(usage(&conn, rust), 1);
    }

    #[test]
    fn unknown_tags_abort_linking() {
        let conn = memory();
        let u1 = user(&conn, "w1");
        let q1 = question(&conn, u1, "first question");
        let err = link_tags(&conn, q1, &["missing".to_string()]).unwrap_err();
        assert!(matches!(err, AppError::NotFound("tag")));
    }

    #[test]
    fn retagging_keeps_usage_counts() {
        let conn = memory();
        let u1 = user(&conn, "w1");
        let rust = tag(&conn, "rust");
        let sql = tag(&conn, "sql");
        let q1 = question(&conn, u1, "first question");

        link_tags(&conn, q1, &["rust".to_string()]).unwrap();
        unlink_tags(&conn, q1).unwrap();
        link_tags(&conn, q1, &["sql".to_string()]).unwrap();

        assert_eq!(usage(&conn, rust), 0);
        assert_eq!(usage(&conn, sql), 1);
    }

    #[test]
    fn question_shape_is_checked() {
        assert!(validate_question("Title", "long enough body", None).is_ok());
        assert!(validate_question("Tiny", "long enough body", None).is_err());
        assert!(validate_question("Title", "short", None).is_err());
        let six: Vec<String> = (0..6).map(|i| i.to_string()).collect();
        assert!(validate_question("Title", "long enough body", Some(&six)).is_err());
    }
}
