//! CRUD for recurring task rules, plus a schedule preview.
//!
//! Every write validates the rule and reseeds `next_scheduled_at` from the
//! current time when the schedule changed, so the generator never sees a rule
//! it cannot advance.

use axum::{
    Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    response::Json as ResponseJson,
    routing::get,
};
use chrono::{DateTime, Utc};
use db::models::{
    activity_log::{ActivityAction, ActivityLog, CreateActivityLog},
    recurring_task::{CreateRecurringTask, RecurringTask, UpdateRecurringTask},
};
use serde::{Deserialize, Serialize};
use services::services::recurrence::{RecurrenceRule, parse_time_of_day};
use sqlx::types::Json;
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{Deployment, error::ApiError};

const DEFAULT_PREVIEW_COUNT: usize = 5;

#[derive(Debug, Deserialize)]
pub struct RecurringTaskQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub count: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct RecurringTaskPreview {
    pub recurring_task_id: Uuid,
    pub occurrences: Vec<DateTime<Utc>>,
}

fn normalize_weekdays(days: &mut Vec<u32>) {
    days.sort_unstable();
    days.dedup();
}

pub async fn get_recurring_tasks(
    State(deployment): State<Deployment>,
    query: Result<Query<RecurringTaskQuery>, QueryRejection>,
) -> Result<ResponseJson<ApiResponse<Vec<RecurringTask>>>, ApiError> {
    let Query(query) = query?;
    let rules = RecurringTask::find_by_user_id(&deployment.db().pool, query.user_id).await?;
    Ok(ResponseJson(ApiResponse::success(rules)))
}

pub async fn get_recurring_task(
    State(deployment): State<Deployment>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<RecurringTask>>, ApiError> {
    let rule = RecurringTask::find_by_id(&deployment.db().pool, id)
        .await?
        .ok_or(ApiError::NotFound("Recurring task"))?;
    Ok(ResponseJson(ApiResponse::success(rule)))
}

pub async fn create_recurring_task(
    State(deployment): State<Deployment>,
    payload: Result<axum::Json<CreateRecurringTask>, JsonRejection>,
) -> Result<ResponseJson<ApiResponse<RecurringTask>>, ApiError> {
    let axum::Json(mut payload) = payload?;
    if payload.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title is required".to_string()));
    }
    normalize_weekdays(&mut payload.days_of_week);

    let time_of_day = parse_time_of_day(&payload.time_of_day)?;
    let rule = RecurrenceRule {
        frequency: payload.frequency,
        time_of_day,
        days_of_week: payload.days_of_week.clone(),
        day_of_month: payload.day_of_month,
    };
    let next_scheduled_at = rule.first_occurrence(Utc::now())?;

    let mut tx = deployment.db().pool.begin().await?;
    let created = RecurringTask::create(
        &mut *tx,
        &payload,
        time_of_day,
        next_scheduled_at,
        Uuid::new_v4(),
    )
    .await?;

    ActivityLog::create(
        &mut *tx,
        CreateActivityLog {
            user_id: created.user_id,
            team_id: created.team_id,
            task_id: None,
            action: ActivityAction::RecurringTaskCreated,
            details: Some(format!(
                "Created {} recurring task '{}' ({})",
                created.frequency, created.title, created.id
            )),
        },
    )
    .await?;
    tx.commit().await?;

    tracing::info!(
        recurring_task_id = %created.id,
        frequency = %created.frequency,
        next_scheduled_at = %created.next_scheduled_at,
        "Recurring task created"
    );
    Ok(ResponseJson(ApiResponse::success(created)))
}

pub async fn update_recurring_task(
    State(deployment): State<Deployment>,
    Path(id): Path<Uuid>,
    payload: Result<axum::Json<UpdateRecurringTask>, JsonRejection>,
) -> Result<ResponseJson<ApiResponse<RecurringTask>>, ApiError> {
    let axum::Json(payload) = payload?;
    let pool = &deployment.db().pool;
    let mut rule = RecurringTask::find_by_id(pool, id)
        .await?
        .ok_or(ApiError::NotFound("Recurring task"))?;

    if let Some(title) = &payload.title {
        if title.trim().is_empty() {
            return Err(ApiError::BadRequest("title cannot be empty".to_string()));
        }
        rule.title = title.clone();
    }
    if payload.description.is_some() {
        rule.description = payload.description.clone();
    }
    if let Some(priority) = payload.priority {
        rule.priority = priority;
    }
    if let Some(frequency) = payload.frequency {
        rule.frequency = frequency;
    }
    if let Some(time_of_day) = &payload.time_of_day {
        rule.time_of_day = parse_time_of_day(time_of_day)?;
    }
    if let Some(days) = &payload.days_of_week {
        let mut days = days.clone();
        normalize_weekdays(&mut days);
        rule.days_of_week = Json(days);
    }
    if payload.day_of_month.is_some() {
        rule.day_of_month = payload.day_of_month;
    }
    if let Some(is_active) = payload.is_active {
        rule.is_active = is_active;
    }

    let recurrence = RecurrenceRule::from(&rule);
    recurrence.validate()?;
    if payload.changes_schedule() {
        rule.next_scheduled_at = recurrence.first_occurrence(Utc::now())?;
    }

    let mut tx = pool.begin().await?;
    let updated = rule.save(&mut *tx).await?;
    ActivityLog::create(
        &mut *tx,
        CreateActivityLog {
            user_id: updated.user_id,
            team_id: updated.team_id,
            task_id: None,
            action: ActivityAction::RecurringTaskUpdated,
            details: Some(format!(
                "Updated recurring task '{}' ({}), next run at {}",
                updated.title,
                updated.id,
                updated.next_scheduled_at.to_rfc3339()
            )),
        },
    )
    .await?;
    tx.commit().await?;

    Ok(ResponseJson(ApiResponse::success(updated)))
}

pub async fn delete_recurring_task(
    State(deployment): State<Deployment>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let pool = &deployment.db().pool;
    let rule = RecurringTask::find_by_id(pool, id)
        .await?
        .ok_or(ApiError::NotFound("Recurring task"))?;

    // Spawned tasks stay, their recurring_task_id is cleared by the foreign key
    let mut tx = pool.begin().await?;
    RecurringTask::delete(&mut *tx, rule.id).await?;
    ActivityLog::create(
        &mut *tx,
        CreateActivityLog {
            user_id: rule.user_id,
            team_id: rule.team_id,
            task_id: None,
            action: ActivityAction::RecurringTaskDeleted,
            details: Some(format!("Deleted recurring task '{}' ({})", rule.title, rule.id)),
        },
    )
    .await?;
    tx.commit().await?;

    Ok(ResponseJson(ApiResponse::success(())))
}

/// Upcoming occurrences of a rule from now, at most 31
pub async fn preview_recurring_task(
    State(deployment): State<Deployment>,
    Path(id): Path<Uuid>,
    query: Result<Query<PreviewQuery>, QueryRejection>,
) -> Result<ResponseJson<ApiResponse<RecurringTaskPreview>>, ApiError> {
    let Query(query) = query?;
    let rule = RecurringTask::find_by_id(&deployment.db().pool, id)
        .await?
        .ok_or(ApiError::NotFound("Recurring task"))?;

    let occurrences = RecurrenceRule::from(&rule).upcoming_occurrences(
        Utc::now(),
        query.count.unwrap_or(DEFAULT_PREVIEW_COUNT),
    )?;

    Ok(ResponseJson(ApiResponse::success(RecurringTaskPreview {
        recurring_task_id: rule.id,
        occurrences,
    })))
}

pub fn router(_deployment: &Deployment) -> Router<Deployment> {
    Router::new().nest(
        "/recurring-tasks",
        Router::new()
            .route("/", get(get_recurring_tasks).post(create_recurring_task))
            .route(
                "/{id}",
                get(get_recurring_task)
                    .put(update_recurring_task)
                    .delete(delete_recurring_task),
            )
            .route("/{id}/preview", get(preview_recurring_task)),
    )
}
