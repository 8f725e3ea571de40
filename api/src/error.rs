//! Error type shared by every handler.
//!
//! Client errors carry their message to the response body; server errors are
//! logged and replaced with a generic message.

use askboard_shared::{ApiResponse, UnknownVariant};
use axum::{
    body::Bytes,
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{FromRequest, FromRequestParts, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    // ── 400 ──
    #[error("{0}")]
    Validation(String),

    // ── 401 ──
    #[error("{0}")]
    Unauthorized(String),

    // ── 403 ──
    #[error("{0}")]
    Forbidden(String),

    // ── 404 ──
    #[error("{0} not found")]
    NotFound(&'static str),

    // ── 409 ──
    #[error("{0}")]
    Conflict(String),

    // ── 500 ──
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("password hashing error: {0}")]
    PasswordHash(String),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Database(_)
            | ApiError::Pool(_)
            | ApiError::Token(_)
            | ApiError::PasswordHash(_)
            | ApiError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ApiResponse::error(message))).into_response()
    }
}

impl From<UnknownVariant> for ApiError {
    fn from(err: UnknownVariant) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

/// `Json` whose rejection renders through [`ApiError`].
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `Query` whose rejection renders through [`ApiError`].
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// JSON body that may be left out; an empty body yields `T::default()`.
#[derive(Debug)]
pub struct OptionalJson<T>(pub T);

impl<T, S> FromRequest<S> for OptionalJson<T>
where
    T: DeserializeOwned + Default,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::Validation(e.body_text()))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(T::default()));
        }
        serde_json::from_slice(&body)
            .map(Self)
            .map_err(|e| ApiError::validation(format!("Invalid JSON body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use askboard_shared::BanUser;
    use axum::body::Body;

    #[test]
    fn statuses() {
        assert_eq!(ApiError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound("Question").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Database(rusqlite::Error::QueryReturnedNoRows).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn not_found_message_names_the_entity() {
        assert_eq!(ApiError::NotFound("Answer").to_string(), "Answer not found");
    }

    #[tokio::test]
    async fn optional_json_defaults_on_empty_body() {
        let empty = Request::builder().body(Body::empty()).unwrap();
        let OptionalJson(ban) = OptionalJson::<BanUser>::from_request(empty, &()).await.unwrap();
        assert_eq!(ban.reason, None);

        let given = Request::builder()
            .body(Body::from(r#"{"reason":"spam"}"#))
            .unwrap();
        let OptionalJson(ban) = OptionalJson::<BanUser>::from_request(given, &()).await.unwrap();
        assert_eq!(ban.reason.as_deref(), Some("spam"));

        let broken = Request::builder().body(Body::from("{")).unwrap();
        assert!(matches!(
            OptionalJson::<BanUser>::from_request(broken, &()).await,
            Err(ApiError::Validation(_))
        ));
    }
}
