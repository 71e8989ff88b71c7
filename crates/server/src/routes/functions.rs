//! Scheduler-callable endpoints. Responses are bare JSON, errors are
//! `{"error": "<message>"}`.

use axum::{
    Json, Router,
    extract::{Request, State, rejection::JsonRejection},
    http::{HeaderMap, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::Utc;
use services::services::{
    push::{PushReport, PushRequest},
    recurring_tasks::{GenerationReport, RecurringTaskGenerator},
};

use crate::{Deployment, error::FunctionError};

/// Generate tasks for every recurring rule that is due now
pub async fn create_recurring_tasks(
    State(deployment): State<Deployment>,
) -> Result<Json<GenerationReport>, FunctionError> {
    let report = RecurringTaskGenerator::new(deployment.db().clone())
        .run(Utc::now())
        .await?;
    Ok(Json(report))
}

pub async fn send_push_notification(
    State(deployment): State<Deployment>,
    payload: Result<Json<PushRequest>, JsonRejection>,
) -> Result<Json<PushReport>, FunctionError> {
    let Json(request) = payload?;
    let fanout = deployment
        .push()
        .ok_or_else(|| FunctionError::unavailable("push notifications are not configured"))?;

    let report = fanout.send(&request).await?;
    Ok(Json(report))
}

fn bearer_is_valid(headers: &HeaderMap, expected: &str) -> bool {
    let candidate = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or_default();
    !expected.is_empty() && candidate == expected
}

async fn require_functions_token(
    State(deployment): State<Deployment>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = deployment.functions_token() {
        if !bearer_is_valid(request.headers(), expected) {
            tracing::warn!(path = %request.uri().path(), "Rejected function call without valid token");
            return FunctionError::unauthorized().into_response();
        }
    }
    next.run(request).await
}

pub fn router(deployment: &Deployment) -> Router<Deployment> {
    Router::new()
        .route("/create-recurring-tasks", post(create_recurring_tasks))
        .route("/send-push-notification", post(send_push_notification))
        .route_layer(middleware::from_fn_with_state(
            deployment.clone(),
            require_functions_token,
        ))
}
