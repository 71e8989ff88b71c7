pub mod activity_log;
pub mod push_subscription;
pub mod recurring_task;
pub mod task;
