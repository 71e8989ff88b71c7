use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json as ResponseJson,
    routing::get,
};
use services::services::database_validator::{DatabaseValidator, ValidationResult};
use utils::response::ApiResponse;

use crate::{Deployment, error::ApiError};

/// Report migration state; 503 when the schema is not usable
pub async fn health_check(
    State(deployment): State<Deployment>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<ValidationResult>>), ApiError> {
    let result = DatabaseValidator::new(deployment.db().pool.clone())
        .validate()
        .await?;

    let status = if result.is_ok() {
        StatusCode::OK
    } else {
        tracing::warn!("{}", result.summary());
        StatusCode::SERVICE_UNAVAILABLE
    };

    Ok((status, ResponseJson(ApiResponse::success(result))))
}

pub fn router(_deployment: &Deployment) -> Router<Deployment> {
    Router::new().route("/health", get(health_check))
}
