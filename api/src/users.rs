use axum::{
    extract::State,
    http::HeaderMap,
};
use forum_shared::{
    Capability, Message, Paginated, Question, Role, UpdateProfile, UpdateUserStatus, User,
    UserAnswer,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{
    answers, auth,
    db::{self, parse_column},
    error::AppError,
    extract::{Json, Path, Query},
    pagination::PageParams,
    questions::{self, Listing},
    AppState,
};

const USER_COLUMNS: &str = "id, wallet, username, email, phone, avatar_url, role, reputation,
                            is_active, created_at, last_seen";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        wallet: row.get(1)?,
        username: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        avatar_url: row.get(5)?,
        role: parse_column(row, 6)?,
        reputation: row.get(7)?,
        is_active: row.get(8)?,
        created_at: row.get(9)?,
        last_seen: row.get(10)?,
    })
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<User>, AppError> {
    Ok(conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [id],
            user_from_row,
        )
        .optional()?)
}

pub fn find_by_wallet(conn: &Connection, wallet: &str) -> Result<Option<User>, AppError> {
    Ok(conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE wallet = ?1"),
            [wallet],
            user_from_row,
        )
        .optional()?)
}

pub fn create(
    conn: &Connection,
    wallet: &str,
    username: &str,
    avatar_url: &str,
) -> Result<User, AppError> {
    conn.execute(
        "INSERT INTO users (wallet, username, avatar_url, role) VALUES (?1, ?2, ?3, ?4)",
        params![wallet, username, avatar_url, Role::Member.as_str()],
    )
    .map_err(|e| {
        if db::is_unique_violation(&e) {
            AppError::Conflict("wallet already registered")
        } else {
            e.into()
        }
    })?;

    find_by_id(conn, conn.last_insert_rowid())?.ok_or(AppError::NotFound("user"))
}

pub fn touch_last_seen(conn: &Connection, user_id: i64) -> Result<(), AppError> {
    conn.execute(
        "UPDATE users SET last_seen = datetime('now') WHERE id = ?1",
        [user_id],
    )?;
    Ok(())
}

// ── Handlers ──

/// GET /api/v1/profile
pub async fn get_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<User>, AppError> {
    let caller = auth::require_user(&headers, &state.jwt_secret)?;

    let user = db::run(&state.db, move |conn| find_by_id(conn, caller.user_id))
        .await?
        .ok_or(AppError::NotFound("user"))?;

    Ok(Json(user))
}

/// PUT /api/v1/profile
pub async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpdateProfile>,
) -> Result<Json<Message>, AppError> {
    let caller = auth::require_user(&headers, &state.jwt_secret)?;

    let username = payload.username.trim().to_string();
    let wallet = payload.wallet.trim().to_string();
    if username.is_empty() || wallet.is_empty() {
        return Err(AppError::validation("username and wallet are required"));
    }

    db::run(&state.db, move |conn| {
        conn.execute(
            "UPDATE users SET username = ?1, email = ?2, phone = ?3, wallet = ?4,
                    avatar_url = ?5, last_seen = datetime('now')
             WHERE id = ?6",
            params![
                username,
                payload.email,
                payload.phone,
                wallet,
                payload.avatar_url,
                caller.user_id
            ],
        )
        .map_err(|e| {
            if db::is_unique_violation(&e) {
                AppError::Conflict("wallet already registered")
            } else {
                e.into()
            }
        })?;
        Ok(())
    })
    .await?;

    Ok(Json(Message {
        message: "profile updated".into(),
    }))
}

/// GET /api/v1/users/:user_id/questions
pub async fn user_questions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<Question>>, AppError> {
    auth::require_user(&headers, &state.jwt_secret)?;
    let page = params.resolve(10)?;

    let result = db::run(&state.db, move |conn| {
        db::read_tx(conn, |tx| questions::list(tx, Listing::ByUser(user_id), page))
    })
    .await?;

    Ok(Json(result))
}

/// GET /api/v1/users/:user_id/answers
pub async fn user_answers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<UserAnswer>>, AppError> {
    auth::require_user(&headers, &state.jwt_secret)?;
    let page = params.resolve(10)?;

    let result = db::run(&state.db, move |conn| {
        db::read_tx(conn, |tx| answers::list_for_user(tx, user_id, page))
    })
    .await?;

    Ok(Json(result))
}

/// GET /api/v1/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<User>>, AppError> {
    let caller = auth::require_user(&headers, &state.jwt_secret)?;
    caller.require(Capability::ManageUsers)?;
    let page = params.resolve(20)?;

    let result = db::run(&state.db, move |conn| {
        db::read_tx(conn, |tx| {
            let total: i64 = tx.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            let mut stmt = tx.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?1 OFFSET ?2"
            ))?;
            let items = stmt
                .query_map(params![page.limit, page.offset()], user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Paginated {
                items,
                total,
                page: page.page,
                per_page: page.limit,
            })
        })
    })
    .await?;

    Ok(Json(result))
}

/// PUT /api/v1/admin/users/:user_id/status
pub async fn update_user_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
    Json(payload): Json<UpdateUserStatus>,
) -> Result<Json<Message>, AppError> {
    let caller = auth::require_user(&headers, &state.jwt_secret)?;
    caller.require(Capability::ManageUsers)?;

    let role: Role = payload
        .role
        .parse()
        .map_err(|e: forum_shared::UnknownRole| AppError::validation(e.to_string()))?;

    let affected = db::run(&state.db, move |conn| {
        Ok(conn.execute(
            "UPDATE users SET is_active = ?1, role = ?2 WHERE id = ?3",
            params![payload.is_active, role.as_str(), user_id],
        )?)
    })
    .await?;

    if affected == 0 {
        return Err(AppError::NotFound("user"));
    }

    Ok(Json(Message {
        message: "user status updated".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::*;

    #[test]
    fn new_users_are_active_members() {
        let conn = memory();
        let user = create(&conn, "0xabc", "hero", "https://img/1.png").unwrap();
        assert_eq!(user.role, Role::Member);
        assert!(user.is_active);
        assert_eq!(user.reputation, 0);

        let again = create(&conn, "0xabc", "hero", "");
        assert!(matches!(again, Err(AppError::Conflict(_))));
        assert_eq!(find_by_wallet(&conn, "0xabc").unwrap().unwrap().id, user.id);
    }
}
