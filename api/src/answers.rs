use askboard_shared::{Answer, ApiResponse, CreateAnswer, NotificationKind, Paginated};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

use crate::{
    auth,
    db::{self, user_summary, PageParams},
    error::{ApiError, ApiJson, ApiQuery},
    notifier::NewNotification,
    questions, AppState,
};

/// Reputation granted to the author of an accepted answer.
pub const ACCEPT_BONUS: i64 = 15;

// ── Store ──

const SELECT_ANSWER: &str = "SELECT a.id, a.question_id, a.content, a.upvotes, a.downvotes,
        a.total_votes, a.is_accepted, a.accepted_at, a.created_at, a.updated_at,
        u.id, u.username, u.name, u.reputation
     FROM answers a
     JOIN users u ON u.id = a.author_id";

fn answer_from_row(row: &Row<'_>) -> rusqlite::Result<Answer> {
    Ok(Answer {
        id: row.get(0)?,
        question_id: row.get(1)?,
        content: row.get(2)?,
        upvotes: row.get(3)?,
        downvotes: row.get(4)?,
        total_votes: row.get(5)?,
        is_accepted: row.get(6)?,
        accepted_at: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        author: user_summary(row, 10)?,
    })
}

fn clean_content(raw: &str) -> Result<String, ApiError> {
    let content = ammonia::clean(raw.trim());
    if content.trim().is_empty() {
        return Err(ApiError::validation("Answer content is required"));
    }
    Ok(content)
}

/// A live answer.
pub fn load(conn: &Connection, id: i64) -> Result<Answer, ApiError> {
    conn.query_row(
        &format!("{SELECT_ANSWER} WHERE a.id = ?1 AND a.is_deleted = 0"),
        [id],
        answer_from_row,
    )
    .optional()?
    .ok_or(ApiError::NotFound("Answer"))
}

/// Live answers of a question: accepted first, then by score, then oldest.
pub fn for_question(conn: &Connection, question_id: i64) -> Result<Vec<Answer>, ApiError> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_ANSWER}
         WHERE a.question_id = ?1 AND a.is_deleted = 0
         ORDER BY a.is_accepted DESC, a.total_votes DESC, a.created_at ASC, a.id ASC"
    ))?;
    let answers = stmt
        .query_map([question_id], answer_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(answers)
}

pub fn by_author(
    conn: &Connection,
    author_id: i64,
    page: i64,
    limit: i64,
) -> Result<Paginated<Answer>, ApiError> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM answers WHERE author_id = ?1 AND is_deleted = 0",
        [author_id],
        |row| row.get(0),
    )?;
    let mut stmt = conn.prepare(&format!(
        "{SELECT_ANSWER}
         WHERE a.author_id = ?1 AND a.is_deleted = 0
         ORDER BY a.created_at DESC, a.id DESC
         LIMIT ?2 OFFSET ?3"
    ))?;
    let items = stmt
        .query_map(
            params![author_id, limit, db::offset(page, limit)],
            answer_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Paginated::new(items, total, page, limit))
}

fn question_title(conn: &Connection, question_id: i64) -> Result<String, ApiError> {
    Ok(conn.query_row(
        "SELECT title FROM questions WHERE id = ?1",
        [question_id],
        |row| row.get(0),
    )?)
}

/// Returns the answer and, when someone else asked, the notification owed to
/// the question's author.
pub fn create(
    conn: &mut Connection,
    author_id: i64,
    question_id: i64,
    content: &str,
) -> Result<(Answer, Option<NewNotification>), ApiError> {
    let content = clean_content(content)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let asker_id = questions::author_of(&tx, question_id)?;

    let ts = db::now();
    tx.execute(
        "INSERT INTO answers (question_id, author_id, content, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![question_id, author_id, content, ts],
    )?;
    let id = tx.last_insert_rowid();
    tx.execute(
        "UPDATE questions SET answer_count = answer_count + 1, updated_at = ?2 WHERE id = ?1",
        params![question_id, ts],
    )?;
    tx.execute(
        "UPDATE users SET answers_given = answers_given + 1 WHERE id = ?1",
        [author_id],
    )?;

    let answer = load(&tx, id)?;
    let notification = if asker_id != author_id {
        let title = question_title(&tx, question_id)?;
        Some(NewNotification {
            recipient_id: asker_id,
            sender_id: Some(author_id),
            kind: NotificationKind::Answer,
            message: format!("Someone answered your question \"{title}\""),
            related_question_id: Some(question_id),
            related_answer_id: Some(id),
        })
    } else {
        None
    };
    tx.commit()?;

    tracing::debug!(answer_id = id, question_id, author_id, "answer posted");
    Ok((answer, notification))
}

/// Author of a live answer and the question it belongs to.
fn owner_of(conn: &Connection, id: i64) -> Result<(i64, i64), ApiError> {
    conn.query_row(
        "SELECT author_id, question_id FROM answers WHERE id = ?1 AND is_deleted = 0",
        [id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()?
    .ok_or(ApiError::NotFound("Answer"))
}

pub fn edit(
    conn: &Connection,
    acting_id: i64,
    is_admin: bool,
    id: i64,
    content: &str,
) -> Result<Answer, ApiError> {
    let content = clean_content(content)?;
    let (author_id, _) = owner_of(conn, id)?;
    auth::ensure_owner_or_admin(
        acting_id,
        is_admin,
        author_id,
        "Not authorized to edit this answer",
    )?;
    conn.execute(
        "UPDATE answers SET content = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, content, db::now()],
    )?;
    load(conn, id)
}

/// Unmarks an accepted answer: clears its flag, the question's pointer and
/// the author's acceptance counters. No-op for an answer that is not accepted.
pub(crate) fn revoke_acceptance(tx: &Transaction<'_>, answer_id: i64) -> Result<(), ApiError> {
    let accepted: Option<(i64, i64)> = tx
        .query_row(
            "SELECT author_id, question_id FROM answers WHERE id = ?1 AND is_accepted = 1",
            [answer_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((author_id, question_id)) = accepted else {
        return Ok(());
    };

    tx.execute(
        "UPDATE answers SET is_accepted = 0, accepted_at = NULL WHERE id = ?1",
        [answer_id],
    )?;
    tx.execute(
        "UPDATE questions SET accepted_answer_id = NULL
         WHERE id = ?1 AND accepted_answer_id = ?2",
        params![question_id, answer_id],
    )?;
    tx.execute(
        "UPDATE users
         SET accepted_answers = MAX(accepted_answers - 1, 0),
             reputation = reputation - ?2
         WHERE id = ?1",
        params![author_id, ACCEPT_BONUS],
    )?;
    Ok(())
}

pub fn soft_delete(
    conn: &mut Connection,
    acting_id: i64,
    is_admin: bool,
    id: i64,
) -> Result<(), ApiError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let (author_id, question_id) = owner_of(&tx, id)?;
    auth::ensure_owner_or_admin(
        acting_id,
        is_admin,
        author_id,
        "Not authorized to delete this answer",
    )?;

    revoke_acceptance(&tx, id)?;
    tx.execute(
        "UPDATE answers SET is_deleted = 1, deleted_by = ?2, deleted_at = ?3 WHERE id = ?1",
        params![id, acting_id, db::now()],
    )?;
    tx.execute(
        "UPDATE questions SET answer_count = MAX(answer_count - 1, 0) WHERE id = ?1",
        [question_id],
    )?;
    tx.commit()?;

    tracing::info!(answer_id = id, acting_id, "answer deleted");
    Ok(())
}

/// Marks `answer_id` as the accepted answer of `question_id`, replacing any
/// previous acceptance. Only the question's author may do this.
pub fn accept(
    conn: &mut Connection,
    requester_id: i64,
    question_id: i64,
    answer_id: i64,
) -> Result<(Answer, Option<NewNotification>), ApiError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let (asker_id, title, current): (i64, String, Option<i64>) = tx
        .query_row(
            "SELECT author_id, title, accepted_answer_id FROM questions
             WHERE id = ?1 AND is_deleted = 0",
            [question_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?
        .ok_or(ApiError::NotFound("Question"))?;
    if asker_id != requester_id {
        return Err(ApiError::forbidden(
            "Only the question author can accept answers",
        ));
    }

    let answer_author: i64 = tx
        .query_row(
            "SELECT author_id FROM answers
             WHERE id = ?1 AND question_id = ?2 AND is_deleted = 0",
            params![answer_id, question_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(ApiError::NotFound("Answer"))?;

    if current == Some(answer_id) {
        let answer = load(&tx, answer_id)?;
        tx.commit()?;
        return Ok((answer, None));
    }

    if let Some(previous) = current {
        revoke_acceptance(&tx, previous)?;
    }

    tx.execute(
        "UPDATE answers SET is_accepted = 1, accepted_at = ?2 WHERE id = ?1",
        params![answer_id, db::now()],
    )?;
    tx.execute(
        "UPDATE questions SET accepted_answer_id = ?2 WHERE id = ?1",
        params![question_id, answer_id],
    )?;
    tx.execute(
        "UPDATE users
         SET accepted_answers = accepted_answers + 1,
             reputation = reputation + ?2
         WHERE id = ?1",
        params![answer_author, ACCEPT_BONUS],
    )?;

    let answer = load(&tx, answer_id)?;
    tx.commit()?;

    tracing::debug!(question_id, answer_id, replaced = ?current, "answer accepted");
    let notification = (answer_author != requester_id).then(|| NewNotification {
        recipient_id: answer_author,
        sender_id: Some(requester_id),
        kind: NotificationKind::AcceptedAnswer,
        message: format!("Your answer was accepted for the question \"{title}\""),
        related_question_id: Some(question_id),
        related_answer_id: Some(answer_id),
    });
    Ok((answer, notification))
}

// ── Handlers ──

/// POST /api/questions/{id}/answers
pub async fn create_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(question_id): Path<i64>,
    ApiJson(payload): ApiJson<CreateAnswer>,
) -> Result<(StatusCode, Json<ApiResponse<Answer>>), ApiError> {
    let claims = auth::extract_claims(&headers, &state.jwt_secret)?;
    let (answer, notification) = db::with_conn(&state.db, move |conn| {
        create(conn, claims.sub, question_id, &payload.content)
    })
    .await?;

    if let Some(notification) = notification {
        state.notifier.dispatch(notification);
    }
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("Answer created successfully", answer)),
    ))
}

/// PUT /api/questions/answers/{answer_id}
pub async fn update_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(answer_id): Path<i64>,
    ApiJson(payload): ApiJson<CreateAnswer>,
) -> Result<Json<ApiResponse<Answer>>, ApiError> {
    let claims = auth::extract_claims(&headers, &state.jwt_secret)?;
    let answer = db::with_conn(&state.db, move |conn| {
        edit(conn, claims.sub, claims.is_admin(), answer_id, &payload.content)
    })
    .await?;
    Ok(Json(ApiResponse::with_message("Answer updated successfully", answer)))
}

/// DELETE /api/questions/answers/{answer_id}
pub async fn delete_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(answer_id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let claims = auth::extract_claims(&headers, &state.jwt_secret)?;
    db::with_conn(&state.db, move |conn| {
        soft_delete(conn, claims.sub, claims.is_admin(), answer_id)
    })
    .await?;
    Ok(Json(ApiResponse::message("Answer deleted successfully")))
}

/// POST /api/questions/{id}/answers/{answer_id}/accept
pub async fn accept_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((question_id, answer_id)): Path<(i64, i64)>,
) -> Result<Json<ApiResponse<Answer>>, ApiError> {
    let claims = auth::extract_claims(&headers, &state.jwt_secret)?;
    let (answer, notification) = db::with_conn(&state.db, move |conn| {
        accept(conn, claims.sub, question_id, answer_id)
    })
    .await?;

    if let Some(notification) = notification {
        state.notifier.dispatch(notification);
    }
    Ok(Json(ApiResponse::with_message("Answer accepted successfully", answer)))
}

/// GET /api/questions/answers/user/{id}
pub async fn user_answers(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> Result<Json<ApiResponse<Paginated<Answer>>>, ApiError> {
    let (page, limit) = params.resolve(10);
    let result =
        db::with_conn(&state.db, move |conn| by_author(conn, user_id, page, limit)).await?;
    Ok(Json(ApiResponse::ok(result)))
}
