use askboard_shared::{
    ApiResponse, CreateQuestion, Paginated, Question, QuestionDetail, QuestionFilter, Tag,
    UpdateQuestion,
};
use axum::{
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    Json,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::Deserialize;

use crate::{
    answers, auth,
    db::{self, user_summary, PageParams},
    error::{ApiError, ApiJson, ApiQuery},
    AppState,
};

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_TAGS: usize = 5;
pub const MAX_IMAGES: usize = 5;
const POPULAR_TAGS: i64 = 20;

// ── Query params ──

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    page: Option<i64>,
    limit: Option<i64>,
    search: Option<String>,
    tag: Option<String>,
    filter: Option<String>,
}

/// Listing criteria after parsing.
#[derive(Debug, Clone, Default)]
pub struct QuestionQuery {
    pub search: Option<String>,
    pub tag: Option<String>,
    pub author_id: Option<i64>,
    pub filter: Option<QuestionFilter>,
}

impl TryFrom<&ListParams> for QuestionQuery {
    type Error = ApiError;

    fn try_from(params: &ListParams) -> Result<Self, Self::Error> {
        let filter: Option<QuestionFilter> = params
            .filter
            .as_deref()
            .filter(|f| !f.is_empty())
            .map(str::parse)
            .transpose()?;
        Ok(Self {
            search: params
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            tag: params
                .tag
                .as_deref()
                .map(normalize_tag)
                .filter(|t| !t.is_empty()),
            author_id: None,
            filter,
        })
    }
}

// ── Validation ──

fn normalize_tag(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Lowercases, trims and dedupes, keeping first-seen order.
fn normalize_tags(raw: &[String]) -> Result<Vec<String>, ApiError> {
    let mut tags: Vec<String> = Vec::new();
    for tag in raw.iter().map(|t| normalize_tag(t)).filter(|t| !t.is_empty()) {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    if tags.len() > MAX_TAGS {
        return Err(ApiError::validation(format!(
            "A question can have at most {MAX_TAGS} tags"
        )));
    }
    Ok(tags)
}

fn clean_title(raw: &str) -> Result<String, ApiError> {
    let title = ammonia::clean(raw.trim());
    if title.trim().is_empty() {
        return Err(ApiError::validation("Title is required"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ApiError::validation(format!(
            "Title cannot exceed {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(title)
}

fn clean_description(raw: &str) -> Result<String, ApiError> {
    let description = ammonia::clean(raw.trim());
    if description.trim().is_empty() {
        return Err(ApiError::validation("Description is required"));
    }
    Ok(description)
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ── Store ──

const SELECT_QUESTION: &str = "SELECT q.id, q.title, q.description, q.views, q.upvotes,
        q.downvotes, q.total_votes, q.answer_count, q.accepted_answer_id, q.created_at,
        q.updated_at, u.id, u.username, u.name, u.reputation
     FROM questions q
     JOIN users u ON u.id = q.author_id";

fn question_from_row(row: &Row<'_>) -> rusqlite::Result<Question> {
    Ok(Question {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        views: row.get(3)?,
        upvotes: row.get(4)?,
        downvotes: row.get(5)?,
        total_votes: row.get(6)?,
        answer_count: row.get(7)?,
        accepted_answer: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        author: user_summary(row, 11)?,
        tags: Vec::new(),
    })
}

fn tags_of(conn: &Connection, question_id: i64) -> Result<Vec<String>, ApiError> {
    let mut stmt = conn.prepare_cached(
        "SELECT t.name FROM question_tags qt
         JOIN tags t ON t.id = qt.tag_id
         WHERE qt.question_id = ?1
         ORDER BY qt.rowid",
    )?;
    let tags = stmt
        .query_map([question_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(tags)
}

fn with_tags(conn: &Connection, mut question: Question) -> Result<Question, ApiError> {
    question.tags = tags_of(conn, question.id)?;
    Ok(question)
}

/// A live (not deleted) question.
pub fn load(conn: &Connection, id: i64) -> Result<Question, ApiError> {
    let question = conn
        .query_row(
            &format!("{SELECT_QUESTION} WHERE q.id = ?1 AND q.is_deleted = 0"),
            [id],
            question_from_row,
        )
        .optional()?
        .ok_or(ApiError::NotFound("Question"))?;
    with_tags(conn, question)
}

/// Author of a live question.
pub(crate) fn author_of(conn: &Connection, id: i64) -> Result<i64, ApiError> {
    conn.query_row(
        "SELECT author_id FROM questions WHERE id = ?1 AND is_deleted = 0",
        [id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(ApiError::NotFound("Question"))
}

pub fn list(
    conn: &Connection,
    query: &QuestionQuery,
    page: i64,
    limit: i64,
) -> Result<Paginated<Question>, ApiError> {
    let search = query.search.as_deref().map(|s| format!("%{}%", escape_like(s)));
    let unanswered = query.filter == Some(QuestionFilter::Unanswered);
    let order = match query.filter.unwrap_or(QuestionFilter::Newest) {
        QuestionFilter::Newest | QuestionFilter::Unanswered => "q.created_at DESC, q.id DESC",
        QuestionFilter::Active => "q.updated_at DESC, q.id DESC",
        QuestionFilter::Votes => "q.total_votes DESC, q.created_at DESC, q.id DESC",
    };

    let filters = "q.is_deleted = 0
        AND (?1 IS NULL OR q.title LIKE ?1 ESCAPE '\\' OR q.description LIKE ?1 ESCAPE '\\')
        AND (?2 IS NULL OR EXISTS (
            SELECT 1 FROM question_tags qt JOIN tags t ON t.id = qt.tag_id
            WHERE qt.question_id = q.id AND t.name = ?2))
        AND (?3 IS NULL OR q.author_id = ?3)
        AND (?4 = 0 OR q.answer_count = 0)";
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM questions q WHERE {filters}"),
        params![search, query.tag, query.author_id, unanswered],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "{SELECT_QUESTION} WHERE {filters} ORDER BY {order} LIMIT ?5 OFFSET ?6"
    ))?;
    let rows = stmt
        .query_map(
            params![search, query.tag, query.author_id, unanswered, limit, db::offset(page, limit)],
            question_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    let items = rows
        .into_iter()
        .map(|q| with_tags(conn, q))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Paginated::new(items, total, page, limit))
}

/// Counts a view and returns the question with its live answers.
pub fn view(conn: &Connection, id: i64) -> Result<QuestionDetail, ApiError> {
    let touched = conn.execute(
        "UPDATE questions SET views = views + 1 WHERE id = ?1 AND is_deleted = 0",
        [id],
    )?;
    if touched == 0 {
        return Err(ApiError::NotFound("Question"));
    }
    let question = load(conn, id)?;
    let answers = answers::for_question(conn, id)?;
    Ok(QuestionDetail { question, answers })
}

pub fn popular_tags(conn: &Connection) -> Result<Vec<Tag>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, question_count FROM tags
         WHERE question_count > 0
         ORDER BY question_count DESC, name ASC
         LIMIT ?1",
    )?;
    let tags = stmt
        .query_map([POPULAR_TAGS], |row| {
            Ok(Tag {
                id: row.get(0)?,
                name: row.get(1)?,
                question_count: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tags)
}

/// Upserts each tag, links it and bumps its question count.
fn link_tags(
    tx: &Transaction<'_>,
    question_id: i64,
    tags: &[String],
    created_by: i64,
) -> Result<(), ApiError> {
    let ts = db::now();
    for name in tags {
        tx.execute(
            "INSERT INTO tags (name, question_count, created_by, created_at)
             VALUES (?1, 0, ?2, ?3)
             ON CONFLICT(name) DO NOTHING",
            params![name, created_by, ts],
        )?;
        let tag_id: i64 = tx.query_row("SELECT id FROM tags WHERE name = ?1", [name], |row| {
            row.get(0)
        })?;
        tx.execute(
            "INSERT INTO question_tags (question_id, tag_id) VALUES (?1, ?2)",
            params![question_id, tag_id],
        )?;
        tx.execute(
            "UPDATE tags SET question_count = question_count + 1 WHERE id = ?1",
            [tag_id],
        )?;
    }
    Ok(())
}

/// Decrements the question's tags. `unlink` also removes the links.
pub(crate) fn release_tags(
    tx: &Transaction<'_>,
    question_id: i64,
    unlink: bool,
) -> Result<(), ApiError> {
    tx.execute(
        "UPDATE tags SET question_count = MAX(question_count - 1, 0)
         WHERE id IN (SELECT tag_id FROM question_tags WHERE question_id = ?1)",
        [question_id],
    )?;
    if unlink {
        tx.execute("DELETE FROM question_tags WHERE question_id = ?1", [question_id])?;
    }
    Ok(())
}

pub fn create(
    conn: &mut Connection,
    author_id: i64,
    draft: &CreateQuestion,
) -> Result<Question, ApiError> {
    let title = clean_title(&draft.title)?;
    let description = clean_description(&draft.description)?;
    let tags = normalize_tags(&draft.tags)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let ts = db::now();
    tx.execute(
        "INSERT INTO questions (author_id, title, description, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![author_id, title, description, ts],
    )?;
    let id = tx.last_insert_rowid();
    link_tags(&tx, id, &tags, author_id)?;
    tx.execute(
        "UPDATE users SET questions_asked = questions_asked + 1 WHERE id = ?1",
        [author_id],
    )?;
    let question = load(&tx, id)?;
    tx.commit()?;

    tracing::debug!(question_id = id, author_id, tags = tags.len(), "question created");
    Ok(question)
}

pub fn edit(
    conn: &mut Connection,
    acting_id: i64,
    is_admin: bool,
    id: i64,
    changes: &UpdateQuestion,
) -> Result<Question, ApiError> {
    let title = changes.title.as_deref().map(clean_title).transpose()?;
    let description = changes
        .description
        .as_deref()
        .map(clean_description)
        .transpose()?;
    let tags = changes.tags.as_deref().map(normalize_tags).transpose()?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let author_id = author_of(&tx, id)?;
    auth::ensure_owner_or_admin(
        acting_id,
        is_admin,
        author_id,
        "Not authorized to edit this question",
    )?;

    tx.execute(
        "UPDATE questions
         SET title = COALESCE(?2, title),
             description = COALESCE(?3, description),
             updated_at = ?4
         WHERE id = ?1",
        params![id, title, description, db::now()],
    )?;
    if let Some(tags) = &tags {
        release_tags(&tx, id, true)?;
        link_tags(&tx, id, tags, acting_id)?;
    }
    let question = load(&tx, id)?;
    tx.commit()?;
    Ok(question)
}

pub fn soft_delete(
    conn: &mut Connection,
    acting_id: i64,
    is_admin: bool,
    id: i64,
) -> Result<(), ApiError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let author_id = author_of(&tx, id)?;
    auth::ensure_owner_or_admin(
        acting_id,
        is_admin,
        author_id,
        "Not authorized to delete this question",
    )?;

    tx.execute(
        "UPDATE questions SET is_deleted = 1, deleted_by = ?2, deleted_at = ?3 WHERE id = ?1",
        params![id, acting_id, db::now()],
    )?;
    release_tags(&tx, id, false)?;
    tx.commit()?;

    tracing::info!(question_id = id, acting_id, "question deleted");
    Ok(())
}

// ── Request body ──

/// `POST /api/questions` body: JSON, or a multipart form whose `tags` part is
/// a JSON array (comma-separated text is accepted too).
pub struct QuestionForm(pub CreateQuestion);

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::Validation(err.body_text())
}

fn parse_tag_field(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw)
        .unwrap_or_else(|_| raw.split(',').map(str::to_string).collect())
}

impl<S> FromRequest<S> for QuestionForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));
        if !is_multipart {
            let ApiJson(draft) = ApiJson::<CreateQuestion>::from_request(req, state).await?;
            return Ok(Self(draft));
        }

        let mut form = Multipart::from_request(req, state)
            .await
            .map_err(|e| ApiError::Validation(e.body_text()))?;
        let mut draft = CreateQuestion {
            title: String::new(),
            description: String::new(),
            tags: Vec::new(),
        };
        let mut images = 0;
        while let Some(field) = form.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "title" => draft.title = field.text().await.map_err(multipart_error)?,
                "description" => {
                    draft.description = field.text().await.map_err(multipart_error)?
                }
                "tags" => {
                    draft.tags = parse_tag_field(&field.text().await.map_err(multipart_error)?)
                }
                "images" => {
                    images += 1;
                    if images > MAX_IMAGES {
                        return Err(ApiError::validation(format!(
                            "At most {MAX_IMAGES} images are allowed"
                        )));
                    }
                    // Not stored; drain the part.
                    field.bytes().await.map_err(multipart_error)?;
                }
                _ => {}
            }
        }
        tracing::debug!(images, "multipart question form");
        Ok(Self(draft))
    }
}

// ── Handlers ──

/// GET /api/questions?page=1&limit=10&search=&tag=&filter=newest
pub async fn list_questions(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Json<ApiResponse<Paginated<Question>>>, ApiError> {
    let query = QuestionQuery::try_from(&params)?;
    let (page, limit) = PageParams {
        page: params.page,
        limit: params.limit,
    }
    .resolve(10);

    let result = db::with_conn(&state.db, move |conn| list(conn, &query, page, limit)).await?;
    Ok(Json(ApiResponse::ok(result)))
}

/// GET /api/questions/user/{id}
pub async fn user_questions(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> Result<Json<ApiResponse<Paginated<Question>>>, ApiError> {
    let (page, limit) = params.resolve(10);
    let query = QuestionQuery {
        author_id: Some(user_id),
        ..Default::default()
    };
    let result = db::with_conn(&state.db, move |conn| list(conn, &query, page, limit)).await?;
    Ok(Json(ApiResponse::ok(result)))
}

/// GET /api/questions/tags
pub async fn list_popular_tags(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Tag>>>, ApiError> {
    let tags = db::with_conn(&state.db, |conn| popular_tags(conn)).await?;
    Ok(Json(ApiResponse::ok(tags)))
}

/// GET /api/questions/{id}
pub async fn get_question(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<QuestionDetail>>, ApiError> {
    let detail = db::with_conn(&state.db, move |conn| view(conn, id)).await?;
    Ok(Json(ApiResponse::ok(detail)))
}

/// POST /api/questions
pub async fn create_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    QuestionForm(draft): QuestionForm,
) -> Result<(StatusCode, Json<ApiResponse<Question>>), ApiError> {
    let claims = auth::extract_claims(&headers, &state.jwt_secret)?;
    let question = db::with_conn(&state.db, move |conn| create(conn, claims.sub, &draft)).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("Question created successfully", question)),
    ))
}

/// PUT /api/questions/{id}
pub async fn update_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    ApiJson(changes): ApiJson<UpdateQuestion>,
) -> Result<Json<ApiResponse<Question>>, ApiError> {
    let claims = auth::extract_claims(&headers, &state.jwt_secret)?;
    let question = db::with_conn(&state.db, move |conn| {
        edit(conn, claims.sub, claims.is_admin(), id, &changes)
    })
    .await?;
    Ok(Json(ApiResponse::with_message(
        "Question updated successfully",
        question,
    )))
}

/// DELETE /api/questions/{id}
pub async fn delete_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let claims = auth::extract_claims(&headers, &state.jwt_secret)?;
    db::with_conn(&state.db, move |conn| {
        soft_delete(conn, claims.sub, claims.is_admin(), id)
    })
    .await?;
    Ok(Json(ApiResponse::message("Question deleted successfully")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_user, test_pool};
    use askboard_shared::Role;

    fn draft(title: &str, tags: &[&str]) -> CreateQuestion {
        CreateQuestion {
            title: title.into(),
            description: format!("Details about {title}"),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn tag_count(conn: &Connection, name: &str) -> i64 {
        conn.query_row(
            "SELECT question_count FROM tags WHERE name = ?1",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn create_normalizes_tags_and_counts() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let author = insert_user(&conn, "alice", Role::User);

        let q = create(&mut conn, author, &draft("Borrowing", &["Rust", " rust ", "Lifetimes"]))
            .unwrap();
        assert_eq!(q.tags, vec!["rust", "lifetimes"]);
        assert_eq!(q.author.id, author);
        assert_eq!(tag_count(&conn, "rust"), 1);

        let profile = auth::load_profile(&conn, author).unwrap();
        assert_eq!(profile.questions_asked, 1);
    }

    #[test]
    fn create_rejects_bad_input() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let author = insert_user(&conn, "alice", Role::User);

        let too_many = draft("Tags", &["a", "b", "c", "d", "e", "f"]);
        assert!(matches!(create(&mut conn, author, &too_many), Err(ApiError::Validation(_))));

        let long_title = draft(&"x".repeat(MAX_TITLE_CHARS + 1), &[]);
        assert!(matches!(create(&mut conn, author, &long_title), Err(ApiError::Validation(_))));

        // Markup alone sanitizes to nothing.
        let empty = draft("<script>alert(1)</script>", &[]);
        assert!(matches!(create(&mut conn, author, &empty), Err(ApiError::Validation(_))));
    }

    #[test]
    fn view_counts_and_hides_deleted() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let author = insert_user(&conn, "alice", Role::User);
        let id = create(&mut conn, author, &draft("Views", &[])).unwrap().id;

        view(&conn, id).unwrap();
        let detail = view(&conn, id).unwrap();
        assert_eq!(detail.question.views, 2);
        assert!(detail.answers.is_empty());

        soft_delete(&mut conn, author, false, id).unwrap();
        assert!(matches!(view(&conn, id), Err(ApiError::NotFound("Question"))));
    }

    #[test]
    fn listing_filters() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let alice = insert_user(&conn, "alice", Role::User);
        let bob = insert_user(&conn, "bob", Role::User);

        let first = create(&mut conn, alice, &draft("Async traits", &["rust"])).unwrap();
        create(&mut conn, bob, &draft("Grid vs flexbox", &["css"])).unwrap();
        create(&mut conn, alice, &draft("100% width", &["css"])).unwrap();
        answers::create(&mut conn, bob, first.id, "Use a boxed future.").unwrap();

        let all = list(&conn, &QuestionQuery::default(), 1, 10).unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.items[0].title, "100% width");

        let by_tag = QuestionQuery {
            tag: Some("css".into()),
            ..Default::default()
        };
        assert_eq!(list(&conn, &by_tag, 1, 10).unwrap().total, 2);

        let search = QuestionQuery {
            search: Some("ASYNC".into()),
            ..Default::default()
        };
        assert_eq!(list(&conn, &search, 1, 10).unwrap().items[0].id, first.id);

        let literal_percent = QuestionQuery {
            search: Some("100%".into()),
            ..Default::default()
        };
        assert_eq!(list(&conn, &literal_percent, 1, 10).unwrap().total, 1);

        let unanswered = QuestionQuery {
            filter: Some(QuestionFilter::Unanswered),
            ..Default::default()
        };
        assert_eq!(list(&conn, &unanswered, 1, 10).unwrap().total, 2);

        let mine = QuestionQuery {
            author_id: Some(alice),
            ..Default::default()
        };
        let page = list(&conn, &mine, 2, 1).unwrap();
        assert_eq!(page.total, 2);
        assert!(page.has_prev_page);
        assert!(!page.has_next_page);
    }

    #[test]
    fn unknown_filter_is_rejected() {
        let params = ListParams {
            filter: Some("hottest".into()),
            ..Default::default()
        };
        assert!(matches!(
            QuestionQuery::try_from(&params),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn edit_moves_tag_counts_and_checks_owner() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let alice = insert_user(&conn, "alice", Role::User);
        let mallory = insert_user(&conn, "mallory", Role::User);
        let admin = insert_user(&conn, "root", Role::Admin);
        let id = create(&mut conn, alice, &draft("Tags", &["old"])).unwrap().id;

        let retag = UpdateQuestion {
            tags: Some(vec!["new".into()]),
            ..Default::default()
        };
        assert!(matches!(
            edit(&mut conn, mallory, false, id, &retag),
            Err(ApiError::Forbidden(_))
        ));

        let edited = edit(&mut conn, admin, true, id, &retag).unwrap();
        assert_eq!(edited.tags, vec!["new"]);
        assert_eq!(edited.title, "Tags");
        assert_eq!(tag_count(&conn, "old"), 0);
        assert_eq!(tag_count(&conn, "new"), 1);
    }

    #[test]
    fn soft_delete_releases_tags() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let alice = insert_user(&conn, "alice", Role::User);
        let id = create(&mut conn, alice, &draft("Gone", &["temp"])).unwrap().id;
        create(&mut conn, alice, &draft("Stays", &["keep"])).unwrap();

        soft_delete(&mut conn, alice, false, id).unwrap();
        assert_eq!(tag_count(&conn, "temp"), 0);

        let names: Vec<String> = popular_tags(&conn).unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["keep"]);

        // Second delete sees nothing live.
        assert!(matches!(
            soft_delete(&mut conn, alice, false, id),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn tag_field_accepts_json_or_commas() {
        assert_eq!(parse_tag_field(r#"["a","b"]"#), vec!["a", "b"]);
        assert_eq!(parse_tag_field("a, b"), vec!["a", " b"]);
    }
}
