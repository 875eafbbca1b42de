pub mod automations;
pub mod jobs;
pub mod user_jobs;
pub mod users;
