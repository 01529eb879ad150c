use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use std::time::Duration;

pub type HrResult<T> = Result<T, HrError>;

#[derive(Debug, thiserror::Error)]
pub enum HrError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    NotFound(String),

    #[error("connection pool exhausted after waiting {waited:?}")]
    PoolExhausted { waited: Duration },

    #[error("failed to open database connection: {0}")]
    ConnectionCreateFailed(#[source] sqlx::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl HrError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        HrError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn employee_not_found(id: i64) -> Self {
        HrError::NotFound(format!("employee {id} not found"))
    }

    /// Human-readable message derived from the raw error text.
    pub fn user_message(&self) -> String {
        let raw = self.to_string();
        let lower = raw.to_lowercase();

        if lower.contains("no such table") {
            return "Database is not initialised, tables are missing".to_string();
        }
        if lower.contains("unique constraint") {
            return "Record already exists".to_string();
        }
        if lower.contains("foreign key constraint") {
            return "Operation refused, the record is referenced by other data".to_string();
        }
        if lower.contains("permission denied") {
            return "Permission denied for this operation".to_string();
        }
        if lower.contains("disk full") || lower.contains("database or disk is full") {
            return "Disk is full, free some space and retry".to_string();
        }

        match self {
            HrError::Validation { .. } | HrError::NotFound(_) => raw,
            HrError::PoolExhausted { .. } => "Server is busy, please retry shortly".to_string(),
            HrError::Parse(_) => format!("Invalid input format: {raw}"),
            _ => format!("Operation failed: {raw}"),
        }
    }
}

impl ResponseError for HrError {
    fn status_code(&self) -> StatusCode {
        match self {
            HrError::Validation { .. } | HrError::Parse(_) => StatusCode::BAD_REQUEST,
            HrError::NotFound(_) => StatusCode::NOT_FOUND,
            HrError::PoolExhausted { .. } | HrError::ConnectionCreateFailed(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": self.user_message(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_names_the_field() {
        let err = HrError::validation("name", "must not be empty");
        assert_eq!(err.user_message(), "name: must not be empty");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn raw_database_text_is_translated() {
        let err = HrError::Internal("UNIQUE constraint failed: employees.employee_number".into());
        assert_eq!(err.user_message(), "Record already exists");

        let err = HrError::Internal("no such table: attendance".into());
        assert!(err.user_message().contains("not initialised"));
    }

    #[test]
    fn pool_errors_map_to_service_unavailable() {
        let err = HrError::PoolExhausted {
            waited: Duration::from_secs(1),
        };
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(HrError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
    }
}
