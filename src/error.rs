use crate::ai::MalformedAiResponse;
use crate::models::ValidationIssue;
use crate::session::SessionError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub field: String,
    pub issue: String,
}

impl From<ValidationIssue> for ErrorDetail {
    fn from(issue: ValidationIssue) -> Self {
        Self {
            field: issue.field,
            issue: issue.issue,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

/// Structured request failure. Every error in the taxonomy is recovered
/// here at the boundary and surfaced as JSON; nothing crashes the process.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

impl AppError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: Vec::new(),
            request_id: request_id.into(),
        }
    }

    pub fn with_details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.details = details;
        self
    }

    pub fn validation(issues: Vec<ValidationIssue>, request_id: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "validation failed",
            request_id,
        )
        .with_details(issues.into_iter().map(ErrorDetail::from).collect())
    }

    pub fn from_session(err: SessionError, request_id: impl Into<String>) -> Self {
        let (status, code) = match err {
            SessionError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            SessionError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            SessionError::QuizUnavailable => (StatusCode::CONFLICT, "QUIZ_UNAVAILABLE"),
            SessionError::Inactive => (StatusCode::CONFLICT, "SESSION_INACTIVE"),
        };
        Self::new(status, code, err.to_string(), request_id)
    }

    pub fn from_ai_parse(err: MalformedAiResponse, request_id: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "MALFORMED_AI_RESPONSE",
            "failed to parse AI response, please try again",
            request_id,
        )
        .with_details(err.issues().into_iter().map(ErrorDetail::from).collect())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let payload = ErrorBody {
            error: ErrorPayload {
                code: self.code,
                message: self.message,
                details: self.details,
                request_id: self.request_id,
            },
        };
        (self.status, Json(payload)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_map_to_the_right_status() {
        let cases = [
            (SessionError::NotFound, StatusCode::NOT_FOUND, "NOT_FOUND"),
            (SessionError::Forbidden, StatusCode::FORBIDDEN, "FORBIDDEN"),
            (
                SessionError::QuizUnavailable,
                StatusCode::CONFLICT,
                "QUIZ_UNAVAILABLE",
            ),
            (
                SessionError::Inactive,
                StatusCode::CONFLICT,
                "SESSION_INACTIVE",
            ),
        ];
        for (err, status, code) in cases {
            let mapped = AppError::from_session(err, "req-1");
            assert_eq!(mapped.status, status);
            assert_eq!(mapped.code, code);
        }
    }

    #[test]
    fn validation_carries_field_details() {
        let err = AppError::validation(
            vec![ValidationIssue {
                field: "questions[0].options".into(),
                issue: "must contain exactly 4 options".into(),
            }],
            "req-2",
        );
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.details.len(), 1);
        assert_eq!(err.details[0].field, "questions[0].options");
    }
}
