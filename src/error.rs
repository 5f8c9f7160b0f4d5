use std::error::Error as _;

use axum::{
    extract::{
        path::ErrorKind,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::auth::{repo_types::StoreError, reset::ResetError};

/// Error returned by every handler and service operation.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Validation { message: String, fields: Vec<String> },
    /// Bad credentials, bad token or vanished account. The message is kept
    /// generic so callers cannot tell which factor failed.
    #[error("{0}")]
    Auth(&'static str),
    #[error("insufficient permissions")]
    Forbidden,
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Reset(ResetError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            fields: vec![field.to_string()],
        }
    }

    pub fn missing_fields(fields: Vec<String>) -> Self {
        AppError::Validation {
            message: "missing required fields".into(),
            fields,
        }
    }

    pub fn invalid_credentials() -> Self {
        AppError::Auth("invalid credentials")
    }

    pub fn invalid_token() -> Self {
        AppError::Auth("invalid or expired token")
    }
}

impl From<ResetError> for AppError {
    fn from(e: ResetError) -> Self {
        match e {
            ResetError::Store(inner) => AppError::Internal(inner),
            other => AppError::Reset(other),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail => AppError::Conflict("email already registered".into()),
            StoreError::Other(inner) => AppError::Internal(inner),
        }
    }
}

/// Field named by a serde error: the `path.to.field: message` prefix, or the
/// field of a root-level "missing field `x`".
fn json_error_field(detail: &str) -> Option<&str> {
    if let Some(rest) = detail.strip_prefix("missing field `") {
        return rest.split_once('`').map(|(field, _)| field);
    }
    let (path, _) = detail.split_once(": ")?;
    (!path.is_empty() && !path.contains(char::is_whitespace)).then_some(path)
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(e) => {
                let detail = e.source().map(ToString::to_string).unwrap_or_default();
                match json_error_field(&detail).map(str::to_string) {
                    Some(field) => AppError::invalid_field(&field, detail),
                    None => AppError::validation(detail),
                }
            }
            JsonRejection::JsonSyntaxError(_) => AppError::validation("malformed JSON body"),
            JsonRejection::MissingJsonContentType(_) => {
                AppError::validation("expected Content-Type: application/json")
            }
            other => AppError::validation(other.body_text()),
        }
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        if rejection.status().is_server_error() {
            return AppError::Internal(anyhow::anyhow!(rejection.body_text()));
        }
        match rejection {
            PathRejection::FailedToDeserializePathParams(e) => {
                let message = e.body_text();
                match e.into_kind() {
                    ErrorKind::ParseErrorAtKey { key, .. }
                    | ErrorKind::InvalidUtf8InPathParam { key } => {
                        AppError::invalid_field(&key, message)
                    }
                    // Every route captures a single `:id`.
                    _ => AppError::invalid_field("id", message),
                }
            }
            other => AppError::validation(other.body_text()),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, fields) = match self {
            AppError::Validation { message, fields } => (StatusCode::BAD_REQUEST, message, fields),
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg.to_string(), Vec::new()),
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                "insufficient permissions".to_string(),
                Vec::new(),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg, Vec::new()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, Vec::new()),
            AppError::Reset(e) => (StatusCode::BAD_REQUEST, e.to_string(), Vec::new()),
            AppError::Internal(e) => {
                error!(error = ?e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                    Vec::new(),
                )
            }
        };

        let mut body = json!({
            "error": message,
            "code": status.as_u16(),
        });
        if !fields.is_empty() {
            body["fields"] = json!(fields);
        }

        (status, Json(body)).into_response()
    }
}
