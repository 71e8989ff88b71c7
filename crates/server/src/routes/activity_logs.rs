use axum::{
    Router,
    extract::{Query, State, rejection::QueryRejection},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::activity_log::ActivityLog;
use serde::Deserialize;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{Deployment, error::ApiError};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct ActivityLogQuery {
    pub user_id: Uuid,
    pub limit: Option<i64>,
}

/// Most recent entries first
pub async fn get_activity_logs(
    State(deployment): State<Deployment>,
    query: Result<Query<ActivityLogQuery>, QueryRejection>,
) -> Result<ResponseJson<ApiResponse<Vec<ActivityLog>>>, ApiError> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let logs = ActivityLog::find_by_user_id(&deployment.db().pool, query.user_id, limit).await?;
    Ok(ResponseJson(ApiResponse::success(logs)))
}

pub fn router(_deployment: &Deployment) -> Router<Deployment> {
    Router::new().route("/activity-logs", get(get_activity_logs))
}
