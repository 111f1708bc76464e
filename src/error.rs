use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{
    credentials::CredentialError, models::FieldError, outcome::Redirect, session::SessionError,
};

/// Shown when an anonymous visitor tries to comment.
pub const LOGIN_TO_COMMENT: &str = "You need to login or register to comment.";

/// RepoError
///
/// The persistence-layer taxonomy. Every `sqlx::Error` is converted into one of these
/// at the repository boundary, so no raw storage error reaches a handler.
#[derive(Debug, Error)]
pub enum RepoError {
    /// A unique constraint was violated; nothing was written.
    #[error("duplicate {field}")]
    DuplicateKey { field: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i32 },

    /// The row is still referenced by other rows and may not be removed.
    #[error("{entity} {id} is still referenced")]
    Referenced { entity: &'static str, id: i32 },

    /// The row carries a privilege that would pass to someone else if it were removed.
    #[error("{entity} {id} may not be removed")]
    Protected { entity: &'static str, id: i32 },

    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                let field = match db_err.constraint() {
                    Some("users_email_key") => "email",
                    Some("blog_posts_title_key") => "title",
                    Some(other) => other,
                    None => "key",
                };
                return RepoError::DuplicateKey {
                    field: field.to_string(),
                };
            }
        }
        RepoError::Storage(err.to_string())
    }
}

/// AppError
///
/// The request-layer taxonomy. Each variant maps to exactly one kind of response; none of
/// them terminates the process.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found")]
    NotFound,

    /// The principal is known but the policy gate refused it (403).
    #[error("forbidden")]
    Forbidden,

    /// No principal at all on a route that needs one; answered with a redirect to /login.
    #[error("login required")]
    LoginRequired,

    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    Authentication(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            // Handlers answer the clashes they expect; anything left over is a fault.
            RepoError::DuplicateKey { field } => {
                AppError::Internal(format!("unexpected duplicate {field}"))
            }
            RepoError::NotFound { .. } => AppError::NotFound,
            RepoError::Referenced { entity, id } => {
                AppError::Internal(format!("{entity} {id} is still referenced"))
            }
            RepoError::Protected { entity, id } => {
                AppError::Internal(format!("{entity} {id} may not be removed"))
            }
            RepoError::Storage(msg) => AppError::Internal(msg),
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("blocking task failed: {err}"))
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::LoginRequired => StatusCode::SEE_OTHER,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            AppError::LoginRequired => {
                Redirect::to("/login").with_notice(LOGIN_TO_COMMENT).into_response()
            }
            AppError::Validation(errors) => {
                (status, Json(json!({ "error": "validation failed", "errors": errors })))
                    .into_response()
            }
            AppError::Internal(detail) => {
                // Log the underlying failure but return a generic body.
                tracing::error!(error = %detail, "internal error");
                (status, Json(json!({ "error": "internal server error" }))).into_response()
            }
            other => (status, Json(json!({ "error": other.to_string() }))).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_errors_map_to_request_errors() {
        let missing: AppError = RepoError::NotFound { entity: "post", id: 7 }.into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        // Every title and email clash is answered by its handler, so a leftover one is a fault.
        let clash: AppError = RepoError::DuplicateKey {
            field: "title".to_string(),
        }
        .into();
        assert_eq!(clash.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let protected: AppError = RepoError::Protected { entity: "user", id: 1 }.into();
        assert_eq!(protected.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn login_required_redirects_with_notice() {
        let response = AppError::LoginRequired.into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[axum::http::header::LOCATION], "/login");
    }
}
