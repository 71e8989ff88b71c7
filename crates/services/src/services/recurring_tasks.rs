//! Spawns task rows from recurring task rules whose next occurrence has elapsed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use db::{
    DBService,
    models::{
        activity_log::{ActivityAction, ActivityLog, CreateActivityLog},
        recurring_task::RecurringTask,
        task::{CreateTask, Task, TaskStatus},
    },
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};
use ts_rs::TS;
use uuid::Uuid;

use super::recurrence::{RecurrenceError, RecurrenceRule};

#[derive(Debug, Error)]
pub enum RecurringTaskError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid recurrence: {0}")]
    Recurrence(#[from] RecurrenceError),
}

/// Outcome of one generator run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
pub struct GenerationReport {
    pub tasks_created: usize,
    pub routines_processed: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Creates one task per due recurring rule and advances each rule's schedule
#[derive(Clone)]
pub struct RecurringTaskGenerator {
    db: DBService,
}

impl RecurringTaskGenerator {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }

    /// Process every active rule due at `now`.
    ///
    /// A failing rule is recorded in the report and does not stop the batch.
    /// A rule can be spawned twice if two runs overlap before its schedule
    /// has been advanced.
    ///
    /// The next occurrence is computed from `now`, not from the slot that
    /// elapsed, and missed slots are not backfilled. A daily 09:00 rule first
    /// processed the following morning therefore fires next on the day after.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<GenerationReport, RecurringTaskError> {
        let due = RecurringTask::find_due(&self.db.pool, now).await?;
        let mut report = GenerationReport {
            routines_processed: due.len(),
            ..Default::default()
        };

        if due.is_empty() {
            debug!("Recurring tasks: nothing due");
            return Ok(report);
        }

        info!(due = due.len(), "Recurring tasks: processing due routines");

        for routine in due {
            match self.spawn_task(&routine, now).await {
                Ok(task) => {
                    report.tasks_created += 1;
                    info!(
                        recurring_task_id = %routine.id,
                        task_id = %task.id,
                        "Recurring tasks: created task"
                    );
                }
                Err(e) => {
                    warn!(
                        recurring_task_id = %routine.id,
                        error = %e,
                        "Recurring tasks: failed to process routine"
                    );
                    report
                        .errors
                        .push(format!("routine {} ({}): {}", routine.id, routine.title, e));
                }
            }
        }

        Ok(report)
    }

    /// Insert the task, log it, and move the rule forward in one transaction
    async fn spawn_task(
        &self,
        routine: &RecurringTask,
        now: DateTime<Utc>,
    ) -> Result<Task, RecurringTaskError> {
        let next_scheduled_at = RecurrenceRule::from(routine).next_occurrence(now)?;

        let mut tx = self.db.pool.begin().await?;

        let data = CreateTask {
            user_id: routine.user_id,
            team_id: routine.team_id,
            title: routine.title.clone(),
            description: routine.description.clone(),
            status: Some(TaskStatus::Todo),
            priority: Some(routine.priority),
            due_date: Some(routine.next_scheduled_at),
            recurring_task_id: Some(routine.id),
        };
        let task = Task::create(&mut *tx, &data, Uuid::new_v4()).await?;

        ActivityLog::create(
            &mut *tx,
            CreateActivityLog {
                user_id: routine.user_id,
                team_id: routine.team_id,
                task_id: Some(task.id),
                action: ActivityAction::RecurringTaskSpawned,
                details: Some(format!(
                    "Created from recurring task '{}', next run at {}",
                    routine.title,
                    next_scheduled_at.to_rfc3339()
                )),
            },
        )
        .await?;

        RecurringTask::mark_created(&mut *tx, routine.id, now, next_scheduled_at).await?;

        tx.commit().await?;
        Ok(task)
    }
}

/// Background service that runs the generator on a fixed interval
pub struct RecurringTaskScheduler {
    generator: RecurringTaskGenerator,
    poll_interval: Duration,
}

impl RecurringTaskScheduler {
    /// Spawn the background recurring task scheduler
    pub async fn spawn(db: DBService, poll_interval: Duration) -> tokio::task::JoinHandle<()> {
        let service = Self {
            generator: RecurringTaskGenerator::new(db),
            poll_interval,
        };
        tokio::spawn(async move {
            service.start().await;
        })
    }

    async fn start(&self) {
        info!(
            "Starting recurring task scheduler with interval {:?}",
            self.poll_interval
        );

        let mut interval = interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match self.generator.run(Utc::now()).await {
                Ok(report) if report.routines_processed > 0 => {
                    info!(
                        tasks_created = report.tasks_created,
                        routines_processed = report.routines_processed,
                        errors = report.errors.len(),
                        "Recurring task scheduler: run complete"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Error running recurring task generator: {}", e),
            }
        }
    }
}
