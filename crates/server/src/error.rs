use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use services::services::{
    database_validator::DatabaseValidationError,
    push::PushFanoutError,
    recurrence::RecurrenceError,
    recurring_tasks::RecurringTaskError,
};
use thiserror::Error;
use utils::response::ApiResponse;

/// Errors from the `/api` routes, rendered as an [`ApiResponse`] envelope
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    DatabaseValidation(#[from] DatabaseValidationError),
    #[error(transparent)]
    Recurrence(#[from] RecurrenceError),
    #[error(transparent)]
    RecurringTask(#[from] RecurringTaskError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    BadRequest(String),
    #[error("push notifications are not configured")]
    PushNotConfigured,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Recurrence(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RecurringTask(RecurringTaskError::Recurrence(_)) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PushNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Database(_)
            | ApiError::DatabaseValidation(_)
            | ApiError::RecurringTask(RecurringTaskError::Database(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self, "API request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ApiResponse::<()>::error(&message))).into_response()
    }
}

/// Errors from the `/functions/v1` endpoints, rendered as `{"error": "<message>"}`
#[derive(Debug)]
pub struct FunctionError {
    status: StatusCode,
    message: String,
}

impl FunctionError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "unauthorized".to_string(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }
}

impl From<RecurringTaskError> for FunctionError {
    fn from(e: RecurringTaskError) -> Self {
        tracing::error!(error = %e, "create-recurring-tasks failed");
        Self::internal(e.to_string())
    }
}

impl From<PushFanoutError> for FunctionError {
    fn from(e: PushFanoutError) -> Self {
        match e {
            PushFanoutError::MissingRecipients | PushFanoutError::MissingTitle => {
                Self::bad_request(e.to_string())
            }
            PushFanoutError::Database(_) | PushFanoutError::Serde(_) => {
                tracing::error!(error = %e, "send-push-notification failed");
                Self::internal(e.to_string())
            }
        }
    }
}

impl From<JsonRejection> for FunctionError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for FunctionError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}
