use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use forum_shared::{Capability, Created, Message, Paginated, Question, Tag, TagInput};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use crate::{
    auth, db,
    error::AppError,
    extract::{Json, Path, Query},
    pagination::{Page, PageParams},
    questions::{self, Listing},
    validate, AppState,
};

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        usage_count: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Maps tag names to ids. Every name must already exist; duplicates collapse.
pub fn resolve_names(conn: &Connection, names: &[String]) -> Result<Vec<i64>, AppError> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        let id: i64 = conn
            .query_row("SELECT id FROM tags WHERE name = ?1", [name.trim()], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or(AppError::NotFound("tag"))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

pub fn for_question(conn: &Connection, question_id: i64) -> Result<Vec<Tag>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.description, t.usage_count, t.created_at
         FROM tags t
         JOIN question_tags qt ON t.id = qt.tag_id
         WHERE qt.question_id = ?1
         ORDER BY t.name",
    )?;
    let tags = stmt
        .query_map([question_id], tag_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tags)
}

/// Tags by stored usage, then name. `usage_count` is the same column
/// `get_tag` reports.
pub fn list(conn: &Connection, page: Page) -> Result<Paginated<Tag>, AppError> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))?;
    let mut stmt = conn.prepare(
        "SELECT id, name, description, usage_count, created_at
         FROM tags
         ORDER BY usage_count DESC, name ASC
         LIMIT ?1 OFFSET ?2",
    )?;
    let items = stmt
        .query_map(params![page.limit, page.offset()], tag_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Paginated {
        items,
        total,
        page: page.page,
        per_page: page.limit,
    })
}

fn validate_tag(input: &TagInput) -> Result<(String, String), AppError> {
    let name = validate::clean(&input.name);
    let description = validate::clean(&input.description);
    validate::length("name", &name, 2, Some(50))?;
    validate::length("description", &description, 0, Some(200))?;
    Ok((name, description))
}

fn name_taken(e: rusqlite::Error) -> AppError {
    if db::is_unique_violation(&e) {
        AppError::Conflict("tag already exists")
    } else {
        e.into()
    }
}

// ── Handlers ──

/// GET /tags?page=1&limit=20: most used first
pub async fn list_tags(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<Tag>>, AppError> {
    let page = params.resolve(20)?;
    let result = db::run(&state.db, move |conn| db::read_tx(conn, |tx| list(tx, page))).await?;
    Ok(Json(result))
}

/// GET /tags/:id
pub async fn get_tag(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Tag>, AppError> {
    let tag = db::run(&state.db, move |conn| {
        Ok(conn
            .query_row(
                "SELECT id, name, description, usage_count, created_at FROM tags WHERE id = ?1",
                [id],
                tag_from_row,
            )
            .optional()?)
    })
    .await?
    .ok_or(AppError::NotFound("tag"))?;

    Ok(Json(tag))
}

/// GET /tags/:tag_id/questions?page=1&limit=10
pub async fn questions_by_tag(
    State(state): State<AppState>,
    Path(tag_id): Path<i64>,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<Question>>, AppError> {
    let page = params.resolve(10)?;

    let result = db::run(&state.db, move |conn| {
        db::read_tx(conn, |tx| questions::list(tx, Listing::ByTag(tag_id), page))
    })
    .await?;

    Ok(Json(result))
}

/// POST /api/v1/admin/tags
pub async fn create_tag(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<TagInput>,
) -> Result<(StatusCode, Json<Created>), AppError> {
    let caller = auth::require_user(&headers, &state.jwt_secret)?;
    caller.require(Capability::ManageTags)?;
    let (name, description) = validate_tag(&payload)?;

    let id = db::run(&state.db, move |conn| {
        conn.execute(
            "INSERT INTO tags (name, description) VALUES (?1, ?2)",
            params![name, description],
        )
        .map_err(name_taken)?;
        Ok(conn.last_insert_rowid())
    })
    .await?;

    info!(tag_id = id, "tag created");
    Ok((
        StatusCode::CREATED,
        Json(Created {
            id,
            message: "tag created".into(),
        }),
    ))
}

/// PUT /api/v1/admin/tags/:id
pub async fn update_tag(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<TagInput>,
) -> Result<Json<Message>, AppError> {
    let caller = auth::require_user(&headers, &state.jwt_secret)?;
    caller.require(Capability::ManageTags)?;
    let (name, description) = validate_tag(&payload)?;

    let affected = db::run(&state.db, move |conn| {
        Ok(conn
            .execute(
                "UPDATE tags SET name = ?1, description = ?2 WHERE id = ?3",
                params![name, description, id],
            )
            .map_err(name_taken)?)
    })
    .await?;

    if affected == 0 {
        return Err(AppError::NotFound("tag"));
    }

    Ok(Json(Message {
        message: "tag updated".into(),
    }))
}

/// DELETE /api/v1/admin/tags/:id: links to questions go with it
pub async fn delete_tag(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Message>, AppError> {
    let caller = auth::require_user(&headers, &state.jwt_secret)?;
    caller.require(Capability::ManageTags)?;

    let affected = db::run(&state.db, move |conn| {
        db::write_tx(conn, |tx| {
            tx.execute("DELETE FROM question_tags WHERE tag_id = ?1", [id])?;
            Ok(tx.execute("DELETE FROM tags WHERE id = ?1", [id])?)
        })
    })
    .await?;

    if affected == 0 {
        return Err(AppError::NotFound("tag"));
    }

    info!(tag_id = id, "tag deleted");
    Ok(Json(Message {
        message: "tag deleted".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::*;

    #[test]
    fn names_resolve_once_each() {
        let conn = memory();
        conn.execute("INSERT INTO tags (name) VALUES ('rust'), ('sql')", [])
            .unwrap();

        let ids = resolve_names(
            &conn,
            &["rust".into(), " sql ".into(), "rust".into()],
        )
        .unwrap();
        assert_eq!(ids.len(), 2);

        assert!(matches!(
            resolve_names(&conn, &["go".into()]),
            Err(AppError::NotFound("tag"))
        ));
    }

    #[test]
    fn listing_reports_the_stored_usage() {
        let conn = memory();
        let uid = user(&conn, "w1");
        let qid = question(&conn, uid, "first question");
        conn.execute(
            "INSERT INTO tags (name, usage_count) VALUES ('rust', 0), ('sql', 3)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO question_tags (question_id, tag_id)
             SELECT ?1, id FROM tags WHERE name = 'rust'",
            [qid],
        )
        .unwrap();

        let page = list(&conn, Page { page: 1, limit: 20 }).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].name, "sql");
        assert_eq!(page.items[0].usage_count, 3);
        assert_eq!(page.items[1].usage_count, 0);
    }

    #[test]
    fn tag_input_bounds() {
        let ok = TagInput {
            name: "rust".into(),
            description: String::new(),
        };
        assert!(validate_tag(&ok).is_ok());

        let short = TagInput {
            name: "r".into(),
            description: String::new(),
        };
        assert!(validate_tag(&short).is_err());

        let long = TagInput {
            name: "rust".into(),
            description: "d".repeat(201),
        };
        assert!(validate_tag(&long).is_err());
    }
}
