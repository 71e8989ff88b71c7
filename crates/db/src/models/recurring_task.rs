use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type, types::Json};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use super::task::TaskPriority;

/// How often a recurring task spawns a new task row
#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display,
)]
#[sqlx(type_name = "recurrence_frequency", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct RecurringTask {
    pub id: Uuid,
    pub user_id: Uuid,
    pub team_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub frequency: Frequency,
    #[ts(type = "string")]
    pub time_of_day: NaiveTime,
    #[ts(type = "Array<number>")]
    pub days_of_week: Json<Vec<u32>>, // 0 = Sunday .. 6 = Saturday, weekly rules only
    pub day_of_month: Option<u32>,    // 1..=31, monthly rules only
    pub is_active: bool,
    pub last_created_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateRecurringTask {
    pub user_id: Uuid,
    pub team_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub frequency: Frequency,
    /// `HH:MM` or `HH:MM:SS`, UTC
    pub time_of_day: String,
    #[serde(default)]
    pub days_of_week: Vec<u32>,
    pub day_of_month: Option<u32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateRecurringTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub frequency: Option<Frequency>,
    pub time_of_day: Option<String>,
    pub days_of_week: Option<Vec<u32>>,
    pub day_of_month: Option<u32>,
    pub is_active: Option<bool>,
}

impl UpdateRecurringTask {
    /// Whether the update touches any field that feeds the schedule
    pub fn changes_schedule(&self) -> bool {
        self.frequency.is_some()
            || self.time_of_day.is_some()
            || self.days_of_week.is_some()
            || self.day_of_month.is_some()
            || self.is_active == Some(true)
    }
}

const RECURRING_TASK_COLUMNS: &str = "id, user_id, team_id, title, description, priority, frequency, time_of_day, days_of_week, day_of_month, is_active, last_created_at, next_scheduled_at, created_at, updated_at";

impl RecurringTask {
    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, RecurringTask>(&format!(
            "SELECT {RECURRING_TASK_COLUMNS} FROM recurring_tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_user_id(
        pool: &SqlitePool,
        user_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, RecurringTask>(&format!(
            "SELECT {RECURRING_TASK_COLUMNS} FROM recurring_tasks WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Find active rules whose next occurrence has elapsed at `now`
    pub async fn find_due(
        pool: &SqlitePool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, RecurringTask>(&format!(
            r#"SELECT {RECURRING_TASK_COLUMNS}
               FROM recurring_tasks
               WHERE is_active = 1
                 AND next_scheduled_at <= $1
               ORDER BY next_scheduled_at ASC"#
        ))
        .bind(now)
        .fetch_all(pool)
        .await
    }

    /// Insert a rule. `time_of_day` is the parsed form of `data.time_of_day`
    /// and `next_scheduled_at` its first occurrence.
    pub async fn create<'e, E>(
        executor: E,
        data: &CreateRecurringTask,
        time_of_day: NaiveTime,
        next_scheduled_at: DateTime<Utc>,
        id: Uuid,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        sqlx::query_as::<_, RecurringTask>(&format!(
            r#"INSERT INTO recurring_tasks (id, user_id, team_id, title, description, priority, frequency, time_of_day, days_of_week, day_of_month, is_active, next_scheduled_at, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
               RETURNING {RECURRING_TASK_COLUMNS}"#
        ))
        .bind(id)
        .bind(data.user_id)
        .bind(data.team_id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(data.priority.unwrap_or_default())
        .bind(data.frequency)
        .bind(time_of_day)
        .bind(Json(&data.days_of_week))
        .bind(data.day_of_month)
        .bind(data.is_active.unwrap_or(true))
        .bind(next_scheduled_at)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    /// Persist every mutable field of `self`
    pub async fn save<'e, E>(&self, executor: E) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, RecurringTask>(&format!(
            r#"UPDATE recurring_tasks
               SET title = $2, description = $3, priority = $4, frequency = $5, time_of_day = $6,
                   days_of_week = $7, day_of_month = $8, is_active = $9, next_scheduled_at = $10, updated_at = $11
               WHERE id = $1
               RETURNING {RECURRING_TASK_COLUMNS}"#
        ))
        .bind(self.id)
        .bind(&self.title)
        .bind(&self.description)
        .bind(self.priority)
        .bind(self.frequency)
        .bind(self.time_of_day)
        .bind(&self.days_of_week)
        .bind(self.day_of_month)
        .bind(self.is_active)
        .bind(self.next_scheduled_at)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }

    /// Record that a task was spawned and move the schedule forward
    pub async fn mark_created<'e, E>(
        executor: E,
        id: Uuid,
        created_at: DateTime<Utc>,
        next_scheduled_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "UPDATE recurring_tasks SET last_created_at = $2, next_scheduled_at = $3, updated_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(created_at)
        .bind(next_scheduled_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn delete<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM recurring_tasks WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::DBService;

    fn weekly_rule(user_id: Uuid) -> CreateRecurringTask {
        CreateRecurringTask {
            user_id,
            team_id: None,
            title: "Stand-up notes".to_string(),
            description: None,
            priority: None,
            frequency: Frequency::Weekly,
            time_of_day: "09:00".to_string(),
            days_of_week: vec![1, 3, 5],
            day_of_month: None,
            is_active: None,
        }
    }

    #[tokio::test]
    async fn test_create_round_trips_schedule_fields() {
        let db = DBService::new_in_memory().await.unwrap();
        let next = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let time = NaiveTime::from_hms_opt(9, 0, 0).unwrap();

        let rule = RecurringTask::create(&db.pool, &weekly_rule(Uuid::new_v4()), time, next, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(rule.frequency, Frequency::Weekly);
        assert_eq!(rule.time_of_day, time);
        assert_eq!(rule.days_of_week.0, vec![1, 3, 5]);
        assert_eq!(rule.next_scheduled_at, next);
        assert!(rule.is_active);
        assert!(rule.last_created_at.is_none());
    }

    #[tokio::test]
    async fn test_find_due_skips_future_and_inactive() {
        let db = DBService::new_in_memory().await.unwrap();
        let time = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let user_id = Uuid::new_v4();

        let due = RecurringTask::create(
            &db.pool,
            &weekly_rule(user_id),
            time,
            now - chrono::Duration::hours(3),
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        RecurringTask::create(
            &db.pool,
            &weekly_rule(user_id),
            time,
            now + chrono::Duration::days(2),
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        let inactive = CreateRecurringTask {
            is_active: Some(false),
            ..weekly_rule(user_id)
        };
        RecurringTask::create(
            &db.pool,
            &inactive,
            time,
            now - chrono::Duration::days(1),
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let found = RecurringTask::find_due(&db.pool, now).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }

    #[test]
    fn test_changes_schedule() {
        let rename = UpdateRecurringTask {
            title: Some("Renamed".to_string()),
            ..Default::default()
        };
        let retime = UpdateRecurringTask {
            time_of_day: Some("10:30".to_string()),
            ..Default::default()
        };
        assert!(!rename.changes_schedule());
        assert!(retime.changes_schedule());
    }
}
