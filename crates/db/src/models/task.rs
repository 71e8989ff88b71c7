use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, QueryBuilder, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Cancelled,
}

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "task_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid,
    pub team_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
    pub recurring_task_id: Option<Uuid>, // Rule that spawned this task, if any
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateTask {
    pub user_id: Uuid,
    pub team_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurring_task_id: Option<Uuid>,
}

#[derive(Debug, Default, Serialize, Deserialize, TS)]
pub struct UpdateTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<DateTime<Utc>>,
}

const TASK_COLUMNS: &str = "id, user_id, team_id, title, description, status, priority, due_date, recurring_task_id, created_at, updated_at";

impl Task {
    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Tasks owned by a user, optionally narrowed to one team, newest first
    pub async fn find_by_user_id(
        pool: &SqlitePool,
        user_id: Uuid,
        team_id: Option<Uuid>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = "
        ));
        query.push_bind(user_id);
        if let Some(team_id) = team_id {
            query.push(" AND team_id = ").push_bind(team_id);
        }
        query.push(" ORDER BY created_at DESC");
        query.build_query_as::<Task>().fetch_all(pool).await
    }

    pub async fn find_by_recurring_task_id(
        pool: &SqlitePool,
        recurring_task_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE recurring_task_id = $1 ORDER BY created_at ASC"
        ))
        .bind(recurring_task_id)
        .fetch_all(pool)
        .await
    }

    pub async fn create<'e, E>(
        executor: E,
        data: &CreateTask,
        task_id: Uuid,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        sqlx::query_as::<_, Task>(&format!(
            r#"INSERT INTO tasks (id, user_id, team_id, title, description, status, priority, due_date, recurring_task_id, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
               RETURNING {TASK_COLUMNS}"#
        ))
        .bind(task_id)
        .bind(data.user_id)
        .bind(data.team_id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(data.status.unwrap_or_default())
        .bind(data.priority.unwrap_or_default())
        .bind(data.due_date)
        .bind(data.recurring_task_id)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    /// Apply a partial update; absent fields keep their stored value.
    /// Returns `None` when no task has `id`.
    pub async fn update<'e, E>(
        executor: E,
        id: Uuid,
        data: &UpdateTask,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(&format!(
            r#"UPDATE tasks
               SET title = COALESCE($2, title),
                   description = COALESCE($3, description),
                   status = COALESCE($4, status),
                   priority = COALESCE($5, priority),
                   due_date = COALESCE($6, due_date),
                   updated_at = $7
               WHERE id = $1
               RETURNING {TASK_COLUMNS}"#
        ))
        .bind(id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(data.status)
        .bind(data.priority)
        .bind(data.due_date)
        .bind(Utc::now())
        .fetch_optional(executor)
        .await
    }

    pub async fn delete<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
