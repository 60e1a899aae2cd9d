use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::models::AttemptStatus;
use crate::store::StoreError;

/// Every way an attempt operation can be refused. All variants are
/// recoverable and carry the identifiers a client needs to render a message.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("test {test_id} is not available at {at}")]
    TestNotAvailable { test_id: String, at: DateTime<Utc> },

    #[error("student {student_id} used all {max_attempts} attempts on test {test_id}")]
    AttemptLimitExceeded {
        student_id: String,
        test_id: String,
        max_attempts: u32,
    },

    #[error("student {student_id} already has attempt in progress on test {test_id}")]
    AttemptAlreadyInProgress {
        student_id: String,
        test_id: String,
        attempt_id: Option<String>,
    },

    #[error("attempt {attempt_id} is {status}, not in progress")]
    AttemptNotInProgress {
        attempt_id: String,
        status: AttemptStatus,
    },

    #[error("attempt {attempt_id} expired at {deadline}")]
    AttemptExpired {
        attempt_id: String,
        deadline: DateTime<Utc>,
    },

    #[error("question {question_id} is not part of test {test_id} (attempt {attempt_id})")]
    UnknownQuestion {
        attempt_id: String,
        test_id: String,
        question_id: String,
    },

    #[error("attempt {attempt_id} not found")]
    AttemptNotFound { attempt_id: String },

    #[error("test {test_id} not found")]
    TestNotFound { test_id: String },

    #[error("attempt store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl AttemptError {
    pub fn kind(&self) -> &'static str {
        match self {
            AttemptError::TestNotAvailable { .. } => "test_not_available",
            AttemptError::AttemptLimitExceeded { .. } => "attempt_limit_exceeded",
            AttemptError::AttemptAlreadyInProgress { .. } => "attempt_already_in_progress",
            AttemptError::AttemptNotInProgress { .. } => "attempt_not_in_progress",
            AttemptError::AttemptExpired { .. } => "attempt_expired",
            AttemptError::UnknownQuestion { .. } => "unknown_question",
            AttemptError::AttemptNotFound { .. } => "attempt_not_found",
            AttemptError::TestNotFound { .. } => "test_not_found",
            AttemptError::StoreUnavailable(_) => "store_unavailable",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AttemptError::TestNotAvailable { .. } => StatusCode::FORBIDDEN,
            AttemptError::AttemptLimitExceeded { .. }
            | AttemptError::AttemptAlreadyInProgress { .. }
            | AttemptError::AttemptNotInProgress { .. } => StatusCode::CONFLICT,
            AttemptError::AttemptExpired { .. } => StatusCode::GONE,
            AttemptError::UnknownQuestion { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AttemptError::AttemptNotFound { .. } | AttemptError::TestNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            AttemptError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Identifiers attached to the error, keyed the way the API names them.
    pub fn details(&self) -> Map<String, Value> {
        let mut details = Map::new();
        let mut put = |key: &str, value: Value| {
            details.insert(key.to_string(), value);
        };

        match self {
            AttemptError::TestNotAvailable { test_id, at } => {
                put("test_id", json!(test_id));
                put("at", json!(at));
            }
            AttemptError::AttemptLimitExceeded {
                student_id,
                test_id,
                max_attempts,
            } => {
                put("student_id", json!(student_id));
                put("test_id", json!(test_id));
                put("max_attempts", json!(max_attempts));
            }
            AttemptError::AttemptAlreadyInProgress {
                student_id,
                test_id,
                attempt_id,
            } => {
                put("student_id", json!(student_id));
                put("test_id", json!(test_id));
                if let Some(attempt_id) = attempt_id {
                    put("attempt_id", json!(attempt_id));
                }
            }
            AttemptError::AttemptNotInProgress { attempt_id, status } => {
                put("attempt_id", json!(attempt_id));
                put("status", json!(status));
            }
            AttemptError::AttemptExpired {
                attempt_id,
                deadline,
            } => {
                put("attempt_id", json!(attempt_id));
                put("deadline", json!(deadline));
            }
            AttemptError::UnknownQuestion {
                attempt_id,
                test_id,
                question_id,
            } => {
                put("attempt_id", json!(attempt_id));
                put("test_id", json!(test_id));
                put("question_id", json!(question_id));
            }
            AttemptError::AttemptNotFound { attempt_id } => put("attempt_id", json!(attempt_id)),
            AttemptError::TestNotFound { test_id } => put("test_id", json!(test_id)),
            AttemptError::StoreUnavailable(_) => {}
        }

        details
    }
}

impl IntoResponse for AttemptError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Attempt operation failed: {}", self);
        } else {
            tracing::warn!("Attempt operation rejected: {}", self);
        }

        let mut body = self.details();
        body.insert("error".to_string(), json!(self.kind()));
        body.insert("message".to_string(), json!(self.to_string()));

        (status, Json(Value::Object(body))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn kind_and_status_line_up() {
        let err = AttemptError::UnknownQuestion {
            attempt_id: "a1".to_string(),
            test_id: "t1".to_string(),
            question_id: "q9".to_string(),
        };
        assert_eq!(err.kind(), "unknown_question");
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let details = err.details();
        assert_eq!(details["question_id"], "q9");
        assert_eq!(details["attempt_id"], "a1");
    }

    #[test]
    fn store_errors_convert_unchanged() {
        let err: AttemptError = StoreError::Timeout {
            operation: "save_attempt",
            after: Duration::from_millis(10),
        }
        .into();
        assert_eq!(err.kind(), "store_unavailable");
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.to_string().contains("save_attempt"));
    }
}
