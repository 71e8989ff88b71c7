pub mod database_validator;
pub mod push;
pub mod recurrence;
pub mod recurring_tasks;
pub mod web_push;
