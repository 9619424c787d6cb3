/// Identifies one submission for logging and event correlation.
pub type TaskId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
