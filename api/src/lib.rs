pub mod admin;
pub mod answers;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod notifications;
pub mod notifier;
pub mod questions;
pub mod reports;
pub mod votes;

#[cfg(test)]
mod tests;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{delete, get, patch, post, put},
    Router,
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::notifier::Notifier;

pub type DbPool = r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>;

/// Multipart question forms carry up to five images.
const UPLOAD_BODY_LIMIT: usize = 25 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub notifier: Notifier,
}

/// `*` allows any origin; anything else must be a single origin.
pub fn cors_layer(origin: &str) -> anyhow::Result<CorsLayer> {
    let allow_origin = if origin == "*" {
        AllowOrigin::any()
    } else {
        AllowOrigin::exact(
            origin
                .parse::<HeaderValue>()
                .map_err(|e| anyhow::anyhow!("invalid CORS_ORIGIN {origin:?}: {e}"))?,
        )
    };
    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::any())
        .allow_headers(AllowHeaders::any()))
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/api/health", get(|| async { "ok" }))
        // Auth
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route(
            "/api/auth/profile",
            get(auth::profile).put(auth::edit_profile),
        )
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/verify", get(auth::verify))
        .route("/api/auth/users/{id}/promote", post(auth::promote))
        .route("/api/auth/users/{id}/demote", post(auth::demote))
        // Questions
        .route(
            "/api/questions",
            get(questions::list_questions).merge(
                post(questions::create_question).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
            ),
        )
        .route("/api/questions/tags", get(questions::list_popular_tags))
        .route("/api/questions/user/{id}", get(questions::user_questions))
        .route(
            "/api/questions/vote",
            get(votes::get_votes).post(votes::cast_vote),
        )
        .route(
            "/api/questions/{id}",
            get(questions::get_question)
                .put(questions::update_question)
                .delete(questions::delete_question),
        )
        // Answers
        .route("/api/questions/{id}/answers", post(answers::create_answer))
        .route(
            "/api/questions/{id}/answers/{answer_id}/accept",
            post(answers::accept_answer),
        )
        .route(
            "/api/questions/answers/{answer_id}",
            put(answers::update_answer).delete(answers::delete_answer),
        )
        .route("/api/questions/answers/user/{id}", get(answers::user_answers))
        // Notifications
        .route("/api/notifications", get(notifications::list_notifications))
        .route(
            "/api/notifications/unread-count",
            get(notifications::get_unread_count),
        )
        .route(
            "/api/notifications/mark-all-read",
            patch(notifications::read_all),
        )
        .route("/api/notifications/stream", get(notifications::stream_unread))
        .route("/api/notifications/{id}/read", patch(notifications::read_one))
        .route("/api/notifications/{id}", delete(notifications::remove))
        // Reports
        .route("/api/reports", post(reports::file_report))
        // Admin
        .route("/api/admin/stats", get(admin::get_stats))
        .route("/api/admin/users", get(admin::get_users))
        .route("/api/admin/users/{id}/ban", post(admin::ban_user))
        .route("/api/admin/users/{id}/unban", post(admin::unban_user))
        .route("/api/admin/questions/{id}", delete(admin::delete_question))
        .route("/api/admin/answers/{id}", delete(admin::delete_answer))
        .route("/api/admin/reports", get(admin::get_reports))
        .route("/api/admin/reports/{id}/review", post(admin::review_report))
        .route("/api/admin/reports/{id}/resolve", post(admin::resolve_report))
        .route("/api/admin/reports/{id}/dismiss", post(admin::dismiss_report))
        .route("/api/admin/recount", post(admin::run_recount))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
