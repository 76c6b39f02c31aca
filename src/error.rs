use serde::Serialize;
use serde_json::json;

/// Coarse error classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    ValidationError,
    Forbidden,
    InvalidState,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::Validation { .. } => ErrorKind::ValidationError,
            CoreError::Forbidden(_) => ErrorKind::Forbidden,
            CoreError::InvalidState(_) => ErrorKind::InvalidState,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Structured context for the request layer.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            CoreError::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            CoreError::Validation { field, .. } => Some(json!({ "field": field })),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref code, ref msg) = e {
            // extended codes 2067 (UNIQUE) and 1555 (PRIMARYKEY)
            if code.code == rusqlite::ErrorCode::ConstraintViolation
                && (code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
            {
                return CoreError::Conflict(
                    msg.clone()
                        .unwrap_or_else(|| "uniqueness constraint violated".to_string()),
                );
            }
        }
        CoreError::Internal(e.to_string())
    }
}
