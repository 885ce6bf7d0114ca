//! HTTP error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use derive_more::{Display, Error};
use tracing::{error, warn};

use crate::auth::{AuthError, AuthErrorKind};
use crate::directory::DirectoryError;
use crate::http::validation::FieldErrors;
use crate::http::Envelope;
use crate::rooms::SessionError;

/// Category of an [`ApiError`], one per response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ApiErrorKind {
    /// 400.
    BadRequest,
    /// 401.
    Unauthorized,
    /// 403.
    Forbidden,
    /// 404.
    NotFound,
    /// 409.
    Conflict,
    /// 500.
    Internal,
}

impl ApiErrorKind {
    /// Response status for this kind.
    pub fn status(self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Request failure with location tracking.
#[derive(Debug, Clone, Display, Error)]
#[display("API error ({}): {} at {}:{}", kind, message, file, line)]
pub struct ApiError {
    /// Error category.
    pub kind: ApiErrorKind,
    /// Message returned to the client.
    pub message: String,
    /// Per-field validation failures.
    pub errors: Option<FieldErrors>,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ApiError {
    /// Creates a new API error with caller location tracking.
    #[track_caller]
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            kind,
            message: message.into(),
            errors: None,
            line: loc.line(),
            file: loc.file(),
        }
    }

    /// 400 carrying field errors.
    #[track_caller]
    pub fn validation(errors: FieldErrors) -> Self {
        Self {
            errors: Some(errors),
            ..Self::new(ApiErrorKind::BadRequest, "validation failed")
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.kind {
            ApiErrorKind::Internal => error!(error = %self, "Request failed"),
            _ => warn!(kind = %self.kind, message = %self.message, "Request rejected"),
        }
        let body = Envelope::<()> {
            data: None,
            errors: self.errors,
            message: Some(self.message),
        };
        (self.kind.status(), Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    #[track_caller]
    fn from(err: AuthError) -> Self {
        let kind = match err.kind {
            AuthErrorKind::InvalidCredentials
            | AuthErrorKind::TokenExpired
            | AuthErrorKind::TokenInvalid
            | AuthErrorKind::UnknownUser => ApiErrorKind::Unauthorized,
            AuthErrorKind::Conflict => ApiErrorKind::Conflict,
            AuthErrorKind::Crypto | AuthErrorKind::Storage => ApiErrorKind::Internal,
        };
        Self::new(kind, err.message)
    }
}

impl From<DirectoryError> for ApiError {
    #[track_caller]
    fn from(err: DirectoryError) -> Self {
        let kind = match &err {
            DirectoryError::InvalidOwner { .. } => ApiErrorKind::Unauthorized,
            DirectoryError::NotFound { .. } => ApiErrorKind::NotFound,
            DirectoryError::Forbidden { .. } => ApiErrorKind::Forbidden,
            DirectoryError::Hashing(_) | DirectoryError::Db(_) | DirectoryError::Session(_) => {
                ApiErrorKind::Internal
            }
        };
        Self::new(kind, err.to_string())
    }
}

impl From<crate::db::DbError> for ApiError {
    #[track_caller]
    fn from(err: crate::db::DbError) -> Self {
        Self::new(ApiErrorKind::Internal, err.message)
    }
}

impl From<SessionError> for ApiError {
    #[track_caller]
    fn from(err: SessionError) -> Self {
        Self::new(ApiErrorKind::Internal, err.to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    #[track_caller]
    fn from(err: tokio::task::JoinError) -> Self {
        Self::new(ApiErrorKind::Internal, format!("Blocking task failed: {}", err))
    }
}
