use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

/// What happened to a task or recurring task
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[sqlx(type_name = "activity_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActivityAction {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    RecurringTaskCreated,
    RecurringTaskUpdated,
    RecurringTaskDeleted,
    /// A recurring task produced a new task row
    RecurringTaskSpawned,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct ActivityLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub team_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub action: ActivityAction,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateActivityLog {
    pub user_id: Uuid,
    pub team_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub action: ActivityAction,
    pub details: Option<String>,
}

impl ActivityLog {
    pub async fn create<'e, E>(executor: E, data: CreateActivityLog) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, ActivityLog>(
            r#"INSERT INTO activity_logs (id, user_id, team_id, task_id, action, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, user_id, team_id, task_id, action, details, created_at"#,
        )
        .bind(id)
        .bind(data.user_id)
        .bind(data.team_id)
        .bind(data.task_id)
        .bind(data.action)
        .bind(data.details)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_user_id(
        pool: &SqlitePool,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ActivityLog>(
            r#"SELECT id, user_id, team_id, task_id, action, details, created_at
            FROM activity_logs
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2"#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
