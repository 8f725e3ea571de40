use askboard_shared::{ApiResponse, CastVote, TargetType, VoteTally, VoteType};
use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Deserialize;

use crate::{
    auth,
    db::{self, enum_column},
    error::{ApiError, ApiJson, ApiQuery},
    AppState,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteQuery {
    target_type: String,
    target_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOutcome {
    pub tally: VoteTally,
    /// The call toggled an existing vote off.
    pub removed: bool,
}

fn table(target: TargetType) -> &'static str {
    match target {
        TargetType::Question => "questions",
        TargetType::Answer => "answers",
    }
}

fn entity(target: TargetType) -> &'static str {
    match target {
        TargetType::Question => "Question",
        TargetType::Answer => "Answer",
    }
}

/// Author of a votable target. Answers count as gone once their question is.
fn live_author_sql(target: TargetType) -> &'static str {
    match target {
        TargetType::Question => "SELECT author_id FROM questions WHERE id = ?1 AND is_deleted = 0",
        TargetType::Answer => {
            "SELECT a.author_id FROM answers a
             JOIN questions q ON q.id = a.question_id
             WHERE a.id = ?1 AND a.is_deleted = 0 AND q.is_deleted = 0"
        }
    }
}

fn existing_vote(
    conn: &Connection,
    user_id: i64,
    target: TargetType,
    target_id: i64,
) -> Result<Option<VoteType>, ApiError> {
    Ok(conn
        .query_row(
            "SELECT vote_type FROM votes
             WHERE user_id = ?1 AND target_type = ?2 AND target_id = ?3",
            params![user_id, target.as_str(), target_id],
            |row| enum_column(row, 0),
        )
        .optional()?)
}

/// (upvotes, downvotes) counted from the vote rows.
pub fn count_votes(
    conn: &Connection,
    target: TargetType,
    target_id: i64,
) -> Result<(i64, i64), ApiError> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(vote_type = 'upvote'), 0), COALESCE(SUM(vote_type = 'downvote'), 0)
         FROM votes WHERE target_type = ?1 AND target_id = ?2",
        params![target.as_str(), target_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?)
}

/// Records, switches or toggles off `user_id`'s vote and refreshes the
/// target's tallies and its author's counters, all in one transaction.
pub fn record_vote(
    conn: &mut Connection,
    user_id: i64,
    target: TargetType,
    target_id: i64,
    vote: VoteType,
) -> Result<VoteOutcome, ApiError> {
    let table = table(target);
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let author_id: i64 = tx
        .query_row(live_author_sql(target), [target_id], |row| row.get(0))
        .optional()?
        .ok_or(ApiError::NotFound(entity(target)))?;

    let previous = existing_vote(&tx, user_id, target, target_id)?;
    let current = match previous {
        Some(prev) if prev == vote => {
            // Same vote → remove (toggle off)
            tx.execute(
                "DELETE FROM votes WHERE user_id = ?1 AND target_type = ?2 AND target_id = ?3",
                params![user_id, target.as_str(), target_id],
            )?;
            None
        }
        Some(_) => {
            // Different vote → switch
            tx.execute(
                "UPDATE votes SET vote_type = ?4
                 WHERE user_id = ?1 AND target_type = ?2 AND target_id = ?3",
                params![user_id, target.as_str(), target_id, vote.as_str()],
            )?;
            Some(vote)
        }
        None => {
            tx.execute(
                "INSERT INTO votes (user_id, target_type, target_id, vote_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![user_id, target.as_str(), target_id, vote.as_str(), db::now()],
            )?;
            Some(vote)
        }
    };

    let (upvotes, downvotes) = count_votes(&tx, target, target_id)?;
    let total_votes = upvotes - downvotes;
    tx.execute(
        &format!("UPDATE {table} SET upvotes = ?2, downvotes = ?3, total_votes = ?4 WHERE id = ?1"),
        params![target_id, upvotes, downvotes, total_votes],
    )?;

    // +1 / -1 for a new vote or a removal, ±2 for a switch.
    let delta = current.map_or(0, VoteType::value) - previous.map_or(0, VoteType::value);
    if delta != 0 {
        let received = match target {
            TargetType::Question => delta,
            TargetType::Answer => 0,
        };
        tx.execute(
            "UPDATE users
             SET total_votes_received = total_votes_received + ?2,
                 reputation = reputation + ?3
             WHERE id = ?1",
            params![author_id, received, delta],
        )?;
    }

    tx.commit()?;

    tracing::debug!(user_id, %target, target_id, ?current, total_votes, "vote recorded");
    Ok(VoteOutcome {
        tally: VoteTally {
            upvotes,
            downvotes,
            total_votes,
            user_vote: current,
        },
        removed: current.is_none(),
    })
}

pub fn tally(
    conn: &Connection,
    user_id: Option<i64>,
    target: TargetType,
    target_id: i64,
) -> Result<VoteTally, ApiError> {
    let (upvotes, downvotes) = count_votes(conn, target, target_id)?;
    let user_vote = match user_id {
        Some(uid) => existing_vote(conn, uid, target, target_id)?,
        None => None,
    };
    Ok(VoteTally {
        upvotes,
        downvotes,
        total_votes: upvotes - downvotes,
        user_vote,
    })
}

// ── Handlers ──

/// GET /api/questions/vote?targetType=answer&targetId=123
pub async fn get_votes(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiQuery(params): ApiQuery<VoteQuery>,
) -> Result<Json<ApiResponse<VoteTally>>, ApiError> {
    let user_id = auth::extract_claims(&headers, &state.jwt_secret)
        .ok()
        .map(|c| c.sub);
    let target: TargetType = params.target_type.parse()?;
    let target_id = params.target_id;

    let resp =
        db::with_conn(&state.db, move |conn| tally(conn, user_id, target, target_id)).await?;
    Ok(Json(ApiResponse::ok(resp)))
}

/// POST /api/questions/vote (same type again toggles the vote off)
pub async fn cast_vote(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<CastVote>,
) -> Result<Json<ApiResponse<VoteTally>>, ApiError> {
    let claims = auth::extract_claims(&headers, &state.jwt_secret)?;

    let target: TargetType = payload.target_type.parse()?;
    let vote: VoteType = payload
        .vote_type
        .parse()
        .map_err(|_| ApiError::validation("Invalid vote type"))?;
    let target_id = payload.target_id;

    let outcome = db::with_conn(&state.db, move |conn| {
        record_vote(conn, claims.sub, target, target_id, vote)
    })
    .await?;

    let message = if outcome.removed {
        "Vote removed"
    } else {
        "Vote recorded"
    };
    Ok(Json(ApiResponse::with_message(message, outcome.tally)))
}
