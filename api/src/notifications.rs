use std::convert::Infallible;

use askboard_shared::{ApiResponse, Notification, Paginated, UnreadCount};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{stream, Stream, StreamExt};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::{
    auth,
    db::{self, enum_column, user_summary, PageParams},
    error::{ApiError, ApiQuery},
    notifier::NewNotification,
    AppState,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    page: Option<i64>,
    limit: Option<i64>,
    unread_only: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct Updated {
    pub updated: usize,
}

// ── Store ──

const SELECT_NOTIFICATION: &str = "
    SELECT n.id, n.kind, n.message, n.related_question_id, q.title, n.related_answer_id,
           n.is_read, n.created_at, n.read_at,
           s.id, s.username, s.name, s.reputation
    FROM notifications n
    LEFT JOIN users s ON s.id = n.sender_id
    LEFT JOIN questions q ON q.id = n.related_question_id";

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    let sender_id: Option<i64> = row.get(9)?;
    Ok(Notification {
        id: row.get(0)?,
        kind: enum_column(row, 1)?,
        message: row.get(2)?,
        related_question: row.get(3)?,
        related_question_title: row.get(4)?,
        related_answer: row.get(5)?,
        is_read: row.get(6)?,
        created_at: row.get(7)?,
        read_at: row.get(8)?,
        sender: match sender_id {
            Some(_) => Some(user_summary(row, 9)?),
            None => None,
        },
    })
}

pub fn insert(conn: &Connection, n: &NewNotification) -> Result<i64, ApiError> {
    conn.execute(
        "INSERT INTO notifications
             (recipient_id, sender_id, kind, message, related_question_id, related_answer_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            n.recipient_id,
            n.sender_id,
            n.kind.as_str(),
            n.message,
            n.related_question_id,
            n.related_answer_id,
            db::now()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn unread_count(conn: &Connection, recipient_id: i64) -> Result<i64, ApiError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND is_read = 0",
        [recipient_id],
        |row| row.get(0),
    )?)
}

pub fn list(
    conn: &Connection,
    recipient_id: i64,
    unread_only: bool,
    page: i64,
    limit: i64,
) -> Result<Paginated<Notification>, ApiError> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM notifications
         WHERE recipient_id = ?1 AND (?2 = 0 OR is_read = 0)",
        params![recipient_id, unread_only],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "{SELECT_NOTIFICATION}
         WHERE n.recipient_id = ?1 AND (?2 = 0 OR n.is_read = 0)
         ORDER BY n.created_at DESC, n.id DESC
         LIMIT ?3 OFFSET ?4"
    ))?;
    let items = stmt
        .query_map(
            params![recipient_id, unread_only, limit, db::offset(page, limit)],
            notification_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Paginated::new(items, total, page, limit))
}

fn load(conn: &Connection, recipient_id: i64, id: i64) -> Result<Notification, ApiError> {
    conn.query_row(
        &format!("{SELECT_NOTIFICATION} WHERE n.id = ?1 AND n.recipient_id = ?2"),
        params![id, recipient_id],
        notification_from_row,
    )
    .optional()?
    .ok_or(ApiError::NotFound("Notification"))
}

/// Marks one of the recipient's notifications read. Someone else's → not found.
pub fn mark_read(conn: &Connection, recipient_id: i64, id: i64) -> Result<Notification, ApiError> {
    let changed = conn.execute(
        "UPDATE notifications SET is_read = 1, read_at = COALESCE(read_at, ?3)
         WHERE id = ?1 AND recipient_id = ?2",
        params![id, recipient_id, db::now()],
    )?;
    if changed == 0 {
        return Err(ApiError::NotFound("Notification"));
    }
    load(conn, recipient_id, id)
}

pub fn mark_all_read(conn: &Connection, recipient_id: i64) -> Result<usize, ApiError> {
    Ok(conn.execute(
        "UPDATE notifications SET is_read = 1, read_at = ?2
         WHERE recipient_id = ?1 AND is_read = 0",
        params![recipient_id, db::now()],
    )?)
}

pub fn delete(conn: &Connection, recipient_id: i64, id: i64) -> Result<(), ApiError> {
    let removed = conn.execute(
        "DELETE FROM notifications WHERE id = ?1 AND recipient_id = ?2",
        params![id, recipient_id],
    )?;
    if removed == 0 {
        return Err(ApiError::NotFound("Notification"));
    }
    Ok(())
}

// ── Handlers ──

/// GET /api/notifications?page=1&limit=10&unreadOnly=true
pub async fn list_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Json<ApiResponse<Paginated<Notification>>>, ApiError> {
    let claims = auth::extract_claims(&headers, &state.jwt_secret)?;
    let (page, limit) = PageParams {
        page: params.page,
        limit: params.limit,
    }
    .resolve(10);
    let unread_only = params.unread_only.unwrap_or(false);

    let result = db::with_conn(&state.db, move |conn| {
        list(conn, claims.sub, unread_only, page, limit)
    })
    .await?;
    Ok(Json(ApiResponse::ok(result)))
}

/// GET /api/notifications/unread-count
pub async fn get_unread_count(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<UnreadCount>>, ApiError> {
    let claims = auth::extract_claims(&headers, &state.jwt_secret)?;
    let count = db::with_conn(&state.db, move |conn| unread_count(conn, claims.sub)).await?;
    Ok(Json(ApiResponse::ok(UnreadCount {
        unread_count: count,
    })))
}

/// PATCH /api/notifications/{id}/read
pub async fn read_one(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Notification>>, ApiError> {
    let claims = auth::extract_claims(&headers, &state.jwt_secret)?;
    let user_id = claims.sub;
    let (notification, count) = db::with_conn(&state.db, move |conn| {
        let n = mark_read(conn, user_id, id)?;
        Ok((n, unread_count(conn, user_id)?))
    })
    .await?;

    state.notifier.publish_unread(user_id, count);
    Ok(Json(ApiResponse::with_message(
        "Notification marked as read",
        notification,
    )))
}

/// PATCH /api/notifications/mark-all-read
pub async fn read_all(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Updated>>, ApiError> {
    let claims = auth::extract_claims(&headers, &state.jwt_secret)?;
    let user_id = claims.sub;
    let updated = db::with_conn(&state.db, move |conn| mark_all_read(conn, user_id)).await?;

    state.notifier.publish_unread(user_id, 0);
    Ok(Json(ApiResponse::with_message(
        "All notifications marked as read",
        Updated { updated },
    )))
}

/// DELETE /api/notifications/{id}
pub async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let claims = auth::extract_claims(&headers, &state.jwt_secret)?;
    let user_id = claims.sub;
    let count = db::with_conn(&state.db, move |conn| {
        delete(conn, user_id, id)?;
        unread_count(conn, user_id)
    })
    .await?;

    state.notifier.publish_unread(user_id, count);
    Ok(Json(ApiResponse::message("Notification deleted successfully")))
}

fn unread_event(unread_count: i64) -> Event {
    let body = serde_json::json!({ "unreadCount": unread_count });
    Event::default().event("unread-count").data(body.to_string())
}

/// GET /api/notifications/stream: server-sent `unread-count` events.
pub async fn stream_unread(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let claims = auth::extract_claims(&headers, &state.jwt_secret)?;
    let user_id = claims.sub;

    // Subscribe first so nothing between the initial read and the stream is lost.
    let rx = state.notifier.subscribe();
    let initial = db::with_conn(&state.db, move |conn| unread_count(conn, user_id)).await?;

    let updates = stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(change) if change.recipient_id == user_id => {
                    return Some((Ok::<_, Infallible>(unread_event(change.unread_count)), rx));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(user_id, skipped, "notification stream lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    let events = stream::once(async move { Ok::<_, Infallible>(unread_event(initial)) }).chain(updates);
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_user, test_pool};
    use askboard_shared::{NotificationKind, Role};

    fn system(recipient_id: i64, sender_id: Option<i64>) -> NewNotification {
        NewNotification {
            recipient_id,
            sender_id,
            kind: NotificationKind::System,
            message: "maintenance tonight".into(),
            related_question_id: None,
            related_answer_id: None,
        }
    }

    #[test]
    fn unread_count_tracks_reads() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let alice = insert_user(&conn, "alice", Role::User);
        let bob = insert_user(&conn, "bob", Role::User);

        let first = insert(&conn, &system(alice, Some(bob))).unwrap();
        insert(&conn, &system(alice, None)).unwrap();
        insert(&conn, &system(bob, None)).unwrap();
        assert_eq!(unread_count(&conn, alice).unwrap(), 2);

        let read = mark_read(&conn, alice, first).unwrap();
        assert!(read.is_read);
        assert!(read.read_at.is_some());
        assert_eq!(read.sender.unwrap().id, bob);
        assert_eq!(unread_count(&conn, alice).unwrap(), 1);

        assert_eq!(mark_all_read(&conn, alice).unwrap(), 1);
        assert_eq!(unread_count(&conn, alice).unwrap(), 0);
        assert_eq!(unread_count(&conn, bob).unwrap(), 1);
    }

    #[test]
    fn others_notifications_are_invisible() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let alice = insert_user(&conn, "alice", Role::User);
        let eve = insert_user(&conn, "eve", Role::User);
        let id = insert(&conn, &system(alice, None)).unwrap();

        assert!(matches!(mark_read(&conn, eve, id), Err(ApiError::NotFound(_))));
        assert!(matches!(delete(&conn, eve, id), Err(ApiError::NotFound(_))));
        delete(&conn, alice, id).unwrap();
        assert_eq!(unread_count(&conn, alice).unwrap(), 0);
    }

    #[test]
    fn listing_pages_and_filters() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let alice = insert_user(&conn, "alice", Role::User);
        let ids: Vec<i64> = (0..3)
            .map(|_| insert(&conn, &system(alice, None)).unwrap())
            .collect();
        mark_read(&conn, alice, ids[0]).unwrap();

        let page = list(&conn, alice, false, 1, 2).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, ids[2]);
        assert!(page.has_next_page);

        let unread = list(&conn, alice, true, 1, 10).unwrap();
        assert_eq!(unread.total, 2);
        assert!(unread.items.iter().all(|n| !n.is_read));
    }
}
