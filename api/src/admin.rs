use askboard_shared::{
    AdminStats, ApiResponse, BanUser, Paginated, Profile, RecountSummary, Report, ReportAction,
    ReportStatus,
};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Deserialize;

use crate::{
    answers::{self, ACCEPT_BONUS},
    auth,
    db::{self, PageParams},
    error::{ApiError, ApiQuery, OptionalJson},
    questions, reports, AppState,
};

const DEFAULT_BAN_REASON: &str = "Admin action";

#[derive(Debug, Default, Deserialize)]
pub struct ReportListParams {
    page: Option<i64>,
    limit: Option<i64>,
    status: Option<String>,
}

// ── Store ──

pub fn stats(conn: &Connection) -> Result<AdminStats, ApiError> {
    Ok(conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM users),
            (SELECT COUNT(*) FROM questions WHERE is_deleted = 0),
            (SELECT COUNT(*) FROM answers WHERE is_deleted = 0),
            (SELECT COUNT(*) FROM reports WHERE status = 'pending'),
            (SELECT COUNT(*) FROM users WHERE is_banned = 1)",
        [],
        |row| {
            Ok(AdminStats {
                total_users: row.get(0)?,
                total_questions: row.get(1)?,
                total_answers: row.get(2)?,
                pending_reports: row.get(3)?,
                banned_users: row.get(4)?,
            })
        },
    )?)
}

pub fn list_users(conn: &Connection, page: i64, limit: i64) -> Result<Paginated<Profile>, ApiError> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    let items = auth::list_profiles(conn, limit, db::offset(page, limit))?;
    Ok(Paginated::new(items, total, page, limit))
}

pub fn ban(
    conn: &Connection,
    acting_id: i64,
    target_id: i64,
    reason: Option<&str>,
) -> Result<Profile, ApiError> {
    if acting_id == target_id {
        return Err(ApiError::validation("You cannot ban yourself"));
    }
    let reason = reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_BAN_REASON);
    let touched = conn.execute(
        "UPDATE users SET is_banned = 1, ban_reason = ?2 WHERE id = ?1",
        params![target_id, reason],
    )?;
    if touched == 0 {
        return Err(ApiError::NotFound("User"));
    }
    tracing::info!(acting_id, target_id, reason, "user banned");
    auth::load_profile(conn, target_id)
}

pub fn unban(conn: &Connection, acting_id: i64, target_id: i64) -> Result<Profile, ApiError> {
    let touched = conn.execute(
        "UPDATE users SET is_banned = 0, ban_reason = NULL WHERE id = ?1",
        [target_id],
    )?;
    if touched == 0 {
        return Err(ApiError::NotFound("User"));
    }
    tracing::info!(acting_id, target_id, "user unbanned");
    auth::load_profile(conn, target_id)
}

/// Removes a question, its answers, the votes on all of them and its tag
/// links. Authors' counters keep their history.
pub fn purge_question(conn: &mut Connection, id: i64) -> Result<(), ApiError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let is_deleted: bool = tx
        .query_row("SELECT is_deleted FROM questions WHERE id = ?1", [id], |row| {
            row.get(0)
        })
        .optional()?
        .ok_or(ApiError::NotFound("Question"))?;

    if is_deleted {
        tx.execute("DELETE FROM question_tags WHERE question_id = ?1", [id])?;
    } else {
        questions::release_tags(&tx, id, true)?;
    }

    tx.execute(
        "DELETE FROM votes
         WHERE (target_type = 'question' AND target_id = ?1)
            OR (target_type = 'answer'
                AND target_id IN (SELECT id FROM answers WHERE question_id = ?1))",
        [id],
    )?;
    tx.execute(
        "UPDATE questions SET accepted_answer_id = NULL WHERE id = ?1",
        [id],
    )?;
    let removed_answers = tx.execute("DELETE FROM answers WHERE question_id = ?1", [id])?;
    tx.execute("DELETE FROM questions WHERE id = ?1", [id])?;
    tx.commit()?;

    tracing::info!(question_id = id, removed_answers, "question purged");
    Ok(())
}

pub fn purge_answer(conn: &mut Connection, id: i64) -> Result<(), ApiError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let (question_id, is_deleted): (i64, bool) = tx
        .query_row(
            "SELECT question_id, is_deleted FROM answers WHERE id = ?1",
            [id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or(ApiError::NotFound("Answer"))?;

    answers::revoke_acceptance(&tx, id)?;
    if !is_deleted {
        tx.execute(
            "UPDATE questions SET answer_count = MAX(answer_count - 1, 0) WHERE id = ?1",
            [question_id],
        )?;
    }
    tx.execute(
        "DELETE FROM votes WHERE target_type = 'answer' AND target_id = ?1",
        [id],
    )?;
    tx.execute("DELETE FROM answers WHERE id = ?1", [id])?;
    tx.commit()?;

    tracing::info!(answer_id = id, question_id, "answer purged");
    Ok(())
}

/// Recomputes every denormalized counter from source rows.
pub fn recount(conn: &mut Connection) -> Result<RecountSummary, ApiError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let questions = tx.execute(
        "UPDATE questions
         SET upvotes = t.up, downvotes = t.down, total_votes = t.up - t.down,
             answer_count = t.answers
         FROM (
            SELECT q.id AS id,
                (SELECT COUNT(*) FROM votes v WHERE v.target_type = 'question'
                    AND v.target_id = q.id AND v.vote_type = 'upvote') AS up,
                (SELECT COUNT(*) FROM votes v WHERE v.target_type = 'question'
                    AND v.target_id = q.id AND v.vote_type = 'downvote') AS down,
                (SELECT COUNT(*) FROM answers a
                    WHERE a.question_id = q.id AND a.is_deleted = 0) AS answers
            FROM questions q
         ) AS t
         WHERE questions.id = t.id
           AND (questions.upvotes != t.up OR questions.downvotes != t.down
                OR questions.total_votes != t.up - t.down
                OR questions.answer_count != t.answers)",
        [],
    )?;

    let answers = tx.execute(
        "UPDATE answers
         SET upvotes = t.up, downvotes = t.down, total_votes = t.up - t.down
         FROM (
            SELECT a.id AS id,
                (SELECT COUNT(*) FROM votes v WHERE v.target_type = 'answer'
                    AND v.target_id = a.id AND v.vote_type = 'upvote') AS up,
                (SELECT COUNT(*) FROM votes v WHERE v.target_type = 'answer'
                    AND v.target_id = a.id AND v.vote_type = 'downvote') AS down
            FROM answers a
         ) AS t
         WHERE answers.id = t.id
           AND (answers.upvotes != t.up OR answers.downvotes != t.down
                OR answers.total_votes != t.up - t.down)",
        [],
    )?;

    let tags = tx.execute(
        "UPDATE tags
         SET question_count = t.n
         FROM (
            SELECT tg.id AS id,
                (SELECT COUNT(*) FROM question_tags qt
                    JOIN questions q ON q.id = qt.question_id
                    WHERE qt.tag_id = tg.id AND q.is_deleted = 0) AS n
            FROM tags tg
         ) AS t
         WHERE tags.id = t.id AND tags.question_count != t.n",
        [],
    )?;

    let users = tx.execute(
        "UPDATE users
         SET questions_asked = t.asked,
             answers_given = t.given,
             accepted_answers = t.accepted,
             total_votes_received = t.received,
             reputation = t.received + t.answer_votes + ?1 * t.accepted
         FROM (
            SELECT u.id AS id,
                (SELECT COUNT(*) FROM questions q WHERE q.author_id = u.id) AS asked,
                (SELECT COUNT(*) FROM answers a WHERE a.author_id = u.id) AS given,
                (SELECT COUNT(*) FROM answers a
                    WHERE a.author_id = u.id AND a.is_accepted = 1) AS accepted,
                (SELECT COALESCE(SUM(CASE v.vote_type WHEN 'upvote' THEN 1 ELSE -1 END), 0)
                    FROM votes v JOIN questions q
                        ON v.target_type = 'question' AND q.id = v.target_id
                    WHERE q.author_id = u.id) AS received,
                (SELECT COALESCE(SUM(CASE v.vote_type WHEN 'upvote' THEN 1 ELSE -1 END), 0)
                    FROM votes v JOIN answers a
                        ON v.target_type = 'answer' AND a.id = v.target_id
                    WHERE a.author_id = u.id) AS answer_votes
            FROM users u
         ) AS t
         WHERE users.id = t.id
           AND (users.questions_asked != t.asked OR users.answers_given != t.given
                OR users.accepted_answers != t.accepted
                OR users.total_votes_received != t.received
                OR users.reputation != t.received + t.answer_votes + ?1 * t.accepted)",
        [ACCEPT_BONUS],
    )?;

    tx.commit()?;

    let summary = RecountSummary {
        users,
        questions,
        answers,
        tags,
    };
    if summary == RecountSummary::default() {
        tracing::info!("recount found no drift");
    } else {
        tracing::warn!(?summary, "recount corrected counters");
    }
    Ok(summary)
}

// ── Handlers ──

/// GET /api/admin/stats
pub async fn get_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<AdminStats>>, ApiError> {
    auth::require_admin(&headers, &state.jwt_secret)?;
    let stats = db::with_conn(&state.db, |conn| stats(conn)).await?;
    Ok(Json(ApiResponse::ok(stats)))
}

/// GET /api/admin/users?page=1&limit=20
pub async fn get_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiQuery(params): ApiQuery<PageParams>,
) -> Result<Json<ApiResponse<Paginated<Profile>>>, ApiError> {
    auth::require_admin(&headers, &state.jwt_secret)?;
    let (page, limit) = params.resolve(20);
    let users = db::with_conn(&state.db, move |conn| list_users(conn, page, limit)).await?;
    Ok(Json(ApiResponse::ok(users)))
}

/// POST /api/admin/users/{id}/ban
pub async fn ban_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    OptionalJson(body): OptionalJson<BanUser>,
) -> Result<Json<ApiResponse<Profile>>, ApiError> {
    let claims = auth::require_admin(&headers, &state.jwt_secret)?;
    let reason = body.reason;
    let user = db::with_conn(&state.db, move |conn| {
        ban(conn, claims.sub, id, reason.as_deref())
    })
    .await?;
    Ok(Json(ApiResponse::with_message("User banned successfully", user)))
}

/// POST /api/admin/users/{id}/unban
pub async fn unban_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Profile>>, ApiError> {
    let claims = auth::require_admin(&headers, &state.jwt_secret)?;
    let user = db::with_conn(&state.db, move |conn| unban(conn, claims.sub, id)).await?;
    Ok(Json(ApiResponse::with_message("User unbanned successfully", user)))
}

/// DELETE /api/admin/questions/{id}
pub async fn delete_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    auth::require_admin(&headers, &state.jwt_secret)?;
    db::with_conn(&state.db, move |conn| purge_question(conn, id)).await?;
    Ok(Json(ApiResponse::message("Question permanently deleted")))
}

/// DELETE /api/admin/answers/{id}
pub async fn delete_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    auth::require_admin(&headers, &state.jwt_secret)?;
    db::with_conn(&state.db, move |conn| purge_answer(conn, id)).await?;
    Ok(Json(ApiResponse::message("Answer permanently deleted")))
}

/// GET /api/admin/reports?page=1&limit=20&status=pending
pub async fn get_reports(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiQuery(params): ApiQuery<ReportListParams>,
) -> Result<Json<ApiResponse<Paginated<Report>>>, ApiError> {
    auth::require_admin(&headers, &state.jwt_secret)?;
    let status: Option<ReportStatus> = params
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .transpose()?;
    let (page, limit) = PageParams {
        page: params.page,
        limit: params.limit,
    }
    .resolve(20);

    let result =
        db::with_conn(&state.db, move |conn| reports::list(conn, status, page, limit)).await?;
    Ok(Json(ApiResponse::ok(result)))
}

async fn move_report(
    state: AppState,
    headers: HeaderMap,
    id: i64,
    next: ReportStatus,
    action: Option<String>,
) -> Result<Report, ApiError> {
    let claims = auth::require_admin(&headers, &state.jwt_secret)?;
    db::with_conn(&state.db, move |conn| {
        reports::transition(conn, claims.sub, id, next, action.as_deref())
    })
    .await
}

/// POST /api/admin/reports/{id}/review
pub async fn review_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Report>>, ApiError> {
    let report = move_report(state, headers, id, ReportStatus::Reviewed, None).await?;
    Ok(Json(ApiResponse::with_message("Report marked as reviewed", report)))
}

/// POST /api/admin/reports/{id}/resolve
pub async fn resolve_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    OptionalJson(body): OptionalJson<ReportAction>,
) -> Result<Json<ApiResponse<Report>>, ApiError> {
    let action = body.action;
    let report = move_report(state, headers, id, ReportStatus::Resolved, action).await?;
    Ok(Json(ApiResponse::with_message("Report resolved", report)))
}

/// POST /api/admin/reports/{id}/dismiss
pub async fn dismiss_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    OptionalJson(body): OptionalJson<ReportAction>,
) -> Result<Json<ApiResponse<Report>>, ApiError> {
    let action = body.action;
    let report = move_report(state, headers, id, ReportStatus::Dismissed, action).await?;
    Ok(Json(ApiResponse::with_message("Report dismissed", report)))
}

/// POST /api/admin/recount
pub async fn run_recount(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<RecountSummary>>, ApiError> {
    auth::require_admin(&headers, &state.jwt_secret)?;
    let summary = db::with_conn(&state.db, |conn| recount(conn)).await?;
    Ok(Json(ApiResponse::with_message("Counters recomputed", summary)))
}
