use axum::{
    Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    response::Json as ResponseJson,
    routing::get,
};
use db::models::{
    activity_log::{ActivityAction, ActivityLog, CreateActivityLog},
    task::{CreateTask, Task, UpdateTask},
};
use serde::Deserialize;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{Deployment, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct TaskQuery {
    pub user_id: Uuid,
    pub team_id: Option<Uuid>,
}

pub async fn get_tasks(
    State(deployment): State<Deployment>,
    query: Result<Query<TaskQuery>, QueryRejection>,
) -> Result<ResponseJson<ApiResponse<Vec<Task>>>, ApiError> {
    let Query(query) = query?;
    let tasks = Task::find_by_user_id(&deployment.db().pool, query.user_id, query.team_id).await?;
    Ok(ResponseJson(ApiResponse::success(tasks)))
}

pub async fn get_task(
    State(deployment): State<Deployment>,
    Path(task_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let task = Task::find_by_id(&deployment.db().pool, task_id)
        .await?
        .ok_or(ApiError::NotFound("Task"))?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn create_task(
    State(deployment): State<Deployment>,
    payload: Result<axum::Json<CreateTask>, JsonRejection>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let axum::Json(payload) = payload?;
    if payload.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title is required".to_string()));
    }

    let mut tx = deployment.db().pool.begin().await?;
    let task = Task::create(&mut *tx, &payload, Uuid::new_v4()).await?;
    ActivityLog::create(
        &mut *tx,
        CreateActivityLog {
            user_id: task.user_id,
            team_id: task.team_id,
            task_id: Some(task.id),
            action: ActivityAction::TaskCreated,
            details: Some(format!("Created task '{}'", task.title)),
        },
    )
    .await?;
    tx.commit().await?;

    tracing::info!(task_id = %task.id, user_id = %task.user_id, "Task created");
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn update_task(
    State(deployment): State<Deployment>,
    Path(task_id): Path<Uuid>,
    payload: Result<axum::Json<UpdateTask>, JsonRejection>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let axum::Json(payload) = payload?;
    if payload.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ApiError::BadRequest("title cannot be empty".to_string()));
    }

    let mut tx = deployment.db().pool.begin().await?;
    let task = Task::update(&mut *tx, task_id, &payload)
        .await?
        .ok_or(ApiError::NotFound("Task"))?;

    ActivityLog::create(
        &mut *tx,
        CreateActivityLog {
            user_id: task.user_id,
            team_id: task.team_id,
            task_id: Some(task.id),
            action: ActivityAction::TaskUpdated,
            details: payload.status.map(|s| format!("Status changed to {s}")),
        },
    )
    .await?;
    tx.commit().await?;

    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn delete_task(
    State(deployment): State<Deployment>,
    Path(task_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let pool = &deployment.db().pool;
    let task = Task::find_by_id(pool, task_id)
        .await?
        .ok_or(ApiError::NotFound("Task"))?;

    let mut tx = pool.begin().await?;
    Task::delete(&mut *tx, task.id).await?;
    ActivityLog::create(
        &mut *tx,
        CreateActivityLog {
            user_id: task.user_id,
            team_id: task.team_id,
            task_id: Some(task.id),
            action: ActivityAction::TaskDeleted,
            details: Some(format!("Deleted task '{}'", task.title)),
        },
    )
    .await?;
    tx.commit().await?;

    Ok(ResponseJson(ApiResponse::success(())))
}

pub fn router(_deployment: &Deployment) -> Router<Deployment> {
    Router::new().nest(
        "/tasks",
        Router::new()
            .route("/", get(get_tasks).post(create_task))
            .route("/{task_id}", get(get_task).put(update_task).delete(delete_task)),
    )
}
