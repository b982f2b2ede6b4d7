use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use forum_shared::{CreateVote, Paginated, PostKind, PostRef, UserVote, VoteAction, VoteResponse};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::{
    auth, db,
    error::AppError,
    extract::{Json, Query},
    ledger::{self, Direction},
    pagination::PageParams,
    score, AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CastOutcome {
    pub action: VoteAction,
    /// The post's total after the cast, `None` if the post does not exist.
    pub vote_count: Option<i64>,
    pub user_vote: Option<Direction>,
}

/// Casts, flips or withdraws `user_id`'s vote on `post`.
///
/// - no vote yet: record it, total moves by `direction`
/// - same direction again: withdraw it, total moves back by the stored value
/// - opposite direction: flip it, total moves by the difference (±2)
///
/// The ledger write and the total update commit together or not at all.
/// Votes on posts that do not exist are recorded; the total update then
/// touches nothing.
pub fn cast(
    conn: &mut Connection,
    user_id: i64,
    post: PostRef,
    direction: Direction,
) -> Result<CastOutcome, AppError> {
    db::write_tx(conn, |tx| {
        let (action, delta, user_vote) = match ledger::find(tx, user_id, post)? {
            None => {
                ledger::insert(tx, user_id, post, direction)?;
                (VoteAction::Registered, direction.value(), Some(direction))
            }
            Some(existing) if existing.direction == direction => {
                ledger::remove(tx, existing.id)?;
                (VoteAction::Removed, -existing.direction.value(), None)
            }
            Some(existing) => {
                ledger::set_direction(tx, existing.id, direction)?;
                (
                    VoteAction::Updated,
                    direction.value() - existing.direction.value(),
                    Some(direction),
                )
            }
        };

        if score::adjust(tx, post, delta)? == 0 {
            debug!(%post, user_id, "vote recorded for a post that does not exist");
        }

        Ok(CastOutcome {
            action,
            vote_count: score::cached(tx, post)?,
            user_vote,
        })
    })
}

fn message(action: VoteAction) -> &'static str {
    match action {
        VoteAction::Registered => "vote registered",
        VoteAction::Updated => "vote updated",
        VoteAction::Removed => "vote removed",
    }
}

// ── Handlers ──

/// POST /api/v1/votes: toggle on re-vote with the same value, flip otherwise
pub async fn cast_vote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateVote>,
) -> Result<(StatusCode, Json<VoteResponse>), AppError> {
    let caller = auth::require_user(&headers, &state.jwt_secret)?;

    let kind: PostKind = payload
        .post_type
        .parse()
        .map_err(|e: forum_shared::UnknownPostKind| AppError::validation(e.to_string()))?;
    let direction = Direction::try_from(payload.r#type)?;
    let post = PostRef::new(kind, payload.post_id);

    let outcome = db::run(&state.db, move |conn| {
        cast(conn, caller.user_id, post, direction)
    })
    .await?;

    info!(user_id = caller.user_id, %post, action = ?outcome.action, "vote cast");

    let status = match outcome.action {
        VoteAction::Registered => StatusCode::CREATED,
        VoteAction::Updated | VoteAction::Removed => StatusCode::OK,
    };

    Ok((
        status,
        Json(VoteResponse {
            action: outcome.action,
            message: message(outcome.action).to_string(),
            vote_count: outcome.vote_count,
            user_vote: outcome.user_vote.map(Direction::value),
        }),
    ))
}

/// GET /api/v1/votes?page=1&limit=10: the caller's votes, newest first
pub async fn list_votes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<UserVote>>, AppError> {
    let caller = auth::require_user(&headers, &state.jwt_secret)?;
    let page = params.resolve(10)?;

    let (items, total) = db::run(&state.db, move |conn| {
        db::read_tx(conn, |tx| ledger::list_for_user(tx, caller.user_id, page))
    })
    .await?;

    Ok(Json(Paginated {
        items,
        total,
        page: page.page,
        per_page: page.limit,
    }))
}
