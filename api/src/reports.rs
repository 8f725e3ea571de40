use askboard_shared::{
    ApiResponse, CreateReport, Paginated, Report, ReportReason, ReportStatus, ReportTarget,
};
use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::{
    auth,
    db::{self, enum_column, user_summary},
    error::{ApiError, ApiJson},
    AppState,
};

const MAX_DESCRIPTION_CHARS: usize = 500;

const SELECT_REPORT: &str = "SELECT r.id, r.target_type, r.target_id, r.reason, r.description,
        r.status, r.reviewed_by, r.reviewed_at, r.resolution, r.created_at,
        u.id, u.username, u.name, u.reputation
     FROM reports r
     JOIN users u ON u.id = r.reporter_id";

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<Report> {
    Ok(Report {
        id: row.get(0)?,
        target_type: enum_column(row, 1)?,
        target_id: row.get(2)?,
        reason: enum_column(row, 3)?,
        description: row.get(4)?,
        status: enum_column(row, 5)?,
        reviewed_by: row.get(6)?,
        reviewed_at: row.get(7)?,
        resolution: row.get(8)?,
        created_at: row.get(9)?,
        reporter: user_summary(row, 10)?,
    })
}

pub fn load(conn: &Connection, id: i64) -> Result<Report, ApiError> {
    conn.query_row(
        &format!("{SELECT_REPORT} WHERE r.id = ?1"),
        [id],
        report_from_row,
    )
    .optional()?
    .ok_or(ApiError::NotFound("Report"))
}

fn target_exists(conn: &Connection, target: ReportTarget, id: i64) -> Result<bool, ApiError> {
    let sql = match target {
        ReportTarget::Question => "SELECT 1 FROM questions WHERE id = ?1 AND is_deleted = 0",
        ReportTarget::Answer => "SELECT 1 FROM answers WHERE id = ?1 AND is_deleted = 0",
        ReportTarget::User => "SELECT 1 FROM users WHERE id = ?1",
    };
    Ok(conn
        .query_row(sql, [id], |_| Ok(()))
        .optional()?
        .is_some())
}

pub fn create(
    conn: &Connection,
    reporter_id: i64,
    payload: &CreateReport,
) -> Result<Report, ApiError> {
    let target: ReportTarget = payload.target_type.parse()?;
    let reason: ReportReason = payload.reason.parse()?;
    let description = ammonia::clean(payload.description.trim());
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(ApiError::validation(format!(
            "Description cannot exceed {MAX_DESCRIPTION_CHARS} characters"
        )));
    }
    if !target_exists(conn, target, payload.target_id)? {
        return Err(ApiError::NotFound(match target {
            ReportTarget::Question => "Question",
            ReportTarget::Answer => "Answer",
            ReportTarget::User => "User",
        }));
    }

    conn.execute(
        "INSERT INTO reports (reporter_id, target_type, target_id, reason, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            reporter_id,
            target.as_str(),
            payload.target_id,
            reason.as_str(),
            description,
            db::now()
        ],
    )?;
    let id = conn.last_insert_rowid();
    tracing::info!(report_id = id, reporter_id, %target, target_id = payload.target_id, %reason, "report filed");
    load(conn, id)
}

pub fn list(
    conn: &Connection,
    status: Option<ReportStatus>,
    page: i64,
    limit: i64,
) -> Result<Paginated<Report>, ApiError> {
    let status = status.map(|s| s.as_str());
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM reports WHERE ?1 IS NULL OR status = ?1",
        [status],
        |row| row.get(0),
    )?;
    let mut stmt = conn.prepare(&format!(
        "{SELECT_REPORT}
         WHERE ?1 IS NULL OR r.status = ?1
         ORDER BY r.created_at DESC, r.id DESC
         LIMIT ?2 OFFSET ?3"
    ))?;
    let items = stmt
        .query_map(params![status, limit, db::offset(page, limit)], report_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Paginated::new(items, total, page, limit))
}

/// Moves a report along pending → reviewed → resolved | dismissed.
pub fn transition(
    conn: &mut Connection,
    reviewer_id: i64,
    id: i64,
    next: ReportStatus,
    resolution: Option<&str>,
) -> Result<Report, ApiError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current: ReportStatus = tx
        .query_row("SELECT status FROM reports WHERE id = ?1", [id], |row| {
            enum_column(row, 0)
        })
        .optional()?
        .ok_or(ApiError::NotFound("Report"))?;
    if !current.can_transition_to(next) {
        return Err(ApiError::conflict(format!(
            "Report is already {current} and cannot be marked {next}"
        )));
    }

    tx.execute(
        "UPDATE reports
         SET status = ?2, reviewed_by = ?3, reviewed_at = ?4,
             resolution = COALESCE(?5, resolution)
         WHERE id = ?1",
        params![
            id,
            next.as_str(),
            reviewer_id,
            db::now(),
            resolution.map(|r| ammonia::clean(r.trim()))
        ],
    )?;
    let report = load(&tx, id)?;
    tx.commit()?;

    tracing::info!(report_id = id, reviewer_id, from = %current, to = %next, "report updated");
    Ok(report)
}

// ── Handlers ──

/// POST /api/reports
pub async fn file_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<CreateReport>,
) -> Result<(StatusCode, Json<ApiResponse<Report>>), ApiError> {
    let claims = auth::extract_claims(&headers, &state.jwt_secret)?;
    let report = db::with_conn(&state.db, move |conn| create(conn, claims.sub, &payload)).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("Report submitted successfully", report)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_user, test_pool};
    use askboard_shared::Role;

    fn body(target_type: &str, target_id: i64) -> CreateReport {
        CreateReport {
            target_type: target_type.into(),
            target_id,
            reason: "spam".into(),
            description: "Link farm".into(),
        }
    }

    #[test]
    fn report_requires_existing_target() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let reporter = insert_user(&conn, "rita", Role::User);
        let spammer = insert_user(&conn, "spammer", Role::User);

        let report = create(&conn, reporter, &body("user", spammer)).unwrap();
        assert_eq!(report.status, ReportStatus::Pending);
        assert_eq!(report.reporter.id, reporter);

        assert!(matches!(
            create(&conn, reporter, &body("question", 77)),
            Err(ApiError::NotFound("Question"))
        ));
        assert!(matches!(
            create(&conn, reporter, &body("comment", 1)),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn status_moves_forward_only() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let reporter = insert_user(&conn, "rita", Role::User);
        let admin = insert_user(&conn, "root", Role::Admin);
        let id = create(&conn, reporter, &body("user", reporter)).unwrap().id;

        let reviewed = transition(&mut conn, admin, id, ReportStatus::Reviewed, None).unwrap();
        assert_eq!(reviewed.reviewed_by, Some(admin));

        let resolved =
            transition(&mut conn, admin, id, ReportStatus::Resolved, Some("warned")).unwrap();
        assert_eq!(resolved.resolution.as_deref(), Some("warned"));

        assert!(matches!(
            transition(&mut conn, admin, id, ReportStatus::Dismissed, None),
            Err(ApiError::Conflict(_))
        ));

        let pending = list(&conn, Some(ReportStatus::Pending), 1, 10).unwrap();
        assert_eq!(pending.total, 0);
        assert_eq!(list(&conn, None, 1, 10).unwrap().total, 1);
    }
}
