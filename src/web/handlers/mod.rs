pub mod jobs;
pub mod webhooks;
