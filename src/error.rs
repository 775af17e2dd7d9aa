use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("course has no curriculum")]
    CourseNotFound,

    #[error("certificate not enabled for this student")]
    NotEligible,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) | Error::CourseNotFound => StatusCode::NOT_FOUND,
            Error::NotEligible => StatusCode::FORBIDDEN,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        // db failures are logged in full and surfaced opaque
        let msg = match &self {
            Error::Db(e) => {
                tracing::error!(error=%e, "database error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": msg }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// True when the database rejected the write on a unique constraint. Those
/// races are benign here: the loser re-reads and returns the winner's row.
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}
