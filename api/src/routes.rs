use axum::{
    routing::{get, post, put},
    Router,
};

use crate::{answers, auth, questions, score, tags, users, votes, AppState};

/// Every API route. Public routes sit at the root; routes that need a
/// session live under `/api/v1`.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(|| async { "ok" }))
        // Auth
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/wallets/exists", post(auth::wallet_exists))
        // Questions
        .route("/questions", get(questions::list_questions))
        .route("/questions/search", get(questions::search_questions))
        .route("/questions/{id}", get(questions::get_question))
        // Tags
        .route("/tags", get(tags::list_tags))
        .route("/tags/{id}", get(tags::get_tag))
        .route("/tags/{id}/questions", get(tags::questions_by_tag));

    let protected = Router::new()
        // Questions
        .route("/questions", post(questions::create_question))
        .route(
            "/questions/{id}",
            put(questions::update_question).delete(questions::delete_question),
        )
        // Answers
        .route(
            "/questions/{id}/answers",
            get(answers::list_answers).post(answers::create_answer),
        )
        .route(
            "/answers/{id}",
            put(answers::update_answer).delete(answers::delete_answer),
        )
        .route("/answers/{id}/accept", post(answers::accept_answer))
        // Votes
        .route("/votes", get(votes::list_votes).post(votes::cast_vote))
        // Users
        .route(
            "/profile",
            get(users::get_profile).put(users::update_profile),
        )
        .route("/users/{user_id}/questions", get(users::user_questions))
        .route("/users/{user_id}/answers", get(users::user_answers))
        // Admin
        .route("/admin/users", get(users::list_users))
        .route(
            "/admin/users/{user_id}/status",
            put(users::update_user_status),
        )
        .route("/admin/tags", post(tags::create_tag))
        .route(
            "/admin/tags/{id}",
            put(tags::update_tag).delete(tags::delete_tag),
        )
        .route("/admin/scores/reconcile", post(score::reconcile_scores));

    public.nest("/api/v1", protected).with_state(state)
}
