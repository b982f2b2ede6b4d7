//! Cached vote totals on questions and answers.
//!
//! `votes` on a post must always equal the sum of its ledger rows. The
//! voting service keeps it in step inside the same transaction as the ledger
//! write; `recount` and `reconcile` re-derive it from the ledger.

use axum::{extract::State, http::HeaderMap};
use forum_shared::{Capability, PostKind, PostRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{info, warn};

use crate::{auth, db, error::AppError, extract::Json, AppState};

fn table(kind: PostKind) -> &'static str {
    match kind {
        PostKind::Question => "questions",
        PostKind::Answer => "answers",
    }
}

/// Adds `delta` to the post's total. Returns the number of rows touched,
/// zero when the post does not exist.
pub fn adjust(conn: &Connection, post: PostRef, delta: i64) -> Result<usize, AppError> {
    let sql = format!(
        "UPDATE {} SET votes = votes + ?1 WHERE id = ?2",
        table(post.kind())
    );
    Ok(conn.execute(&sql, params![delta, post.id()])?)
}

pub fn cached(conn: &Connection, post: PostRef) -> Result<Option<i64>, AppError> {
    let sql = format!("SELECT votes FROM {} WHERE id = ?1", table(post.kind()));
    Ok(conn
        .query_row(&sql, [post.id()], |row| row.get(0))
        .optional()?)
}

/// The total as the ledger says it should be.
pub fn recount(conn: &Connection, post: PostRef) -> Result<i64, AppError> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(type), 0) FROM votes WHERE post_type = ?1 AND post_id = ?2",
        params![post.kind().as_str(), post.id()],
        |row| row.get(0),
    )?)
}

/// Rewrites every total that disagrees with the ledger. Returns how many
/// posts were corrected.
pub fn reconcile(conn: &Connection) -> Result<usize, AppError> {
    let mut corrected = 0;

    for kind in [PostKind::Question, PostKind::Answer] {
        let sql = format!(
            "UPDATE {table} SET votes = (
                 SELECT COALESCE(SUM(v.type), 0) FROM votes v
                 WHERE v.post_type = ?1 AND v.post_id = {table}.id
             )
             WHERE votes <> (
                 SELECT COALESCE(SUM(v.type), 0) FROM votes v
                 WHERE v.post_type = ?1 AND v.post_id = {table}.id
             )",
            table = table(kind)
        );
        let fixed = conn.execute(&sql, [kind.as_str()])?;
        if fixed > 0 {
            warn!(kind = kind.as_str(), fixed, "vote totals drifted from the ledger");
        }
        corrected += fixed;
    }

    Ok(corrected)
}

#[derive(Debug, Serialize)]
pub struct Reconciled {
    pub corrected: usize,
}

/// POST /api/v1/admin/scores/reconcile
pub async fn reconcile_scores(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Reconciled>, AppError> {
    let caller = auth::require_user(&headers, &state.jwt_secret)?;
    caller.require(Capability::ModerateContent)?;

    let corrected = db::run(&state.db, |conn| db::write_tx(conn, |tx| reconcile(tx))).await?;

    info!(user_id = caller.user_id, corrected, "vote totals reconciled");
    Ok(Json(Reconciled { corrected }))
}
