use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CadenceError;

/// Upper bound on the materialized horizon of a schedule.
pub const MAX_OCCURRENCES: usize = 101;

/// Key identifying an automation kind and the handler that executes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskType {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tenant-owned recurring automation and its execution ledger.
///
/// `occurrences` is derived state: it is fully recomputable from the cron
/// expressions, fixed times and timezone fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDefinition {
    pub id: String,
    pub tenant_id: String,
    pub kind: TaskType,
    pub active: bool,
    #[serde(default)]
    pub cron_expressions: Vec<String>,
    /// Local wall-clock instants, interpreted with `timezone_offset_minutes`.
    #[serde(default)]
    pub fixed_times: Vec<NaiveDateTime>,
    pub timezone_name: String,
    #[serde(default)]
    pub timezone_offset_minutes: i32,
    /// Ascending, unique, at most [`MAX_OCCURRENCES`] entries.
    #[serde(default)]
    pub occurrences: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub executed_occurrences: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub execution_count: u64,
    /// Optimistic-concurrency token, bumped on every persisted write.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleDefinition {
    pub fn new(tenant_id: impl Into<String>, kind: TaskType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            kind,
            active: true,
            cron_expressions: Vec::new(),
            fixed_times: Vec::new(),
            timezone_name: "UTC".to_string(),
            timezone_offset_minutes: 0,
            occurrences: Vec::new(),
            executed_occurrences: Vec::new(),
            execution_count: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Exact-instant membership check against the execution ledger.
    pub fn has_fired(&self, occurrence: DateTime<Utc>) -> bool {
        self.executed_occurrences.contains(&occurrence)
    }
}

/// Lifecycle state of a [`PendingTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Success,
    Failed,
    /// Terminal pseudo-status carried by legacy records; never claimed.
    Archived,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Archived => "archived",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "success" => Ok(TaskStatus::Success),
            "failed" => Ok(TaskStatus::Failed),
            "archived" => Ok(TaskStatus::Archived),
            other => Err(CadenceError::Storage(format!("unknown task status '{other}'"))),
        }
    }
}

/// A durable unit of work produced when an occurrence fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTask {
    pub id: String,
    pub tenant_id: String,
    pub task_type: TaskType,
    pub target_record_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub time_taken_ms: Option<u64>,
    pub last_error: Option<String>,
    /// Earliest instant a worker may attempt this task again.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingTask {
    pub fn new(
        tenant_id: impl Into<String>,
        task_type: TaskType,
        target_record_id: Option<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            task_type,
            target_record_id,
            payload,
            status: TaskStatus::Pending,
            retry_count: 0,
            time_taken_ms: None,
            last_error: None,
            next_attempt_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Atomic ledger update written when a schedule fires an occurrence.
#[derive(Debug, Clone)]
pub struct FiringCommit {
    pub schedule_id: String,
    pub expected_version: u64,
    pub executed_occurrences: Vec<DateTime<Utc>>,
    pub execution_count: u64,
    pub occurrences: Vec<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Result of one handler attempt, applied to a task still in `pending`.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub task_id: String,
    /// The retry count observed when the task was claimed.
    pub expected_retry_count: u32,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub time_taken_ms: u64,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// A request to run the handler registered for `task_type`.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub tenant_id: String,
    pub task_type: TaskType,
    pub target_record_id: Option<String>,
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_creation() {
        let schedule = ScheduleDefinition::new("tenant-a", TaskType::new("weekly_digest"));
        assert_eq!(schedule.tenant_id, "tenant-a");
        assert!(schedule.active);
        assert_eq!(schedule.version, 0);
        assert!(schedule.occurrences.is_empty());
        assert!(Uuid::parse_str(&schedule.id).is_ok());
    }

    #[test]
    fn test_schedule_serialization_uses_camel_case() {
        let schedule = ScheduleDefinition::new("tenant-a", TaskType::new("notes_summary"));
        let json = serde_json::to_value(&schedule).unwrap();
        assert_eq!(json["kind"], "notes_summary");
        assert!(json.get("cronExpressions").is_some());
        assert!(json.get("executedOccurrences").is_some());
        let back: ScheduleDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back, schedule);
    }

    #[test]
    fn test_task_status_parsing() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Success,
            TaskStatus::Failed,
            TaskStatus::Archived,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("completed".parse::<TaskStatus>().is_err());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(TaskStatus::Archived.is_terminal());
    }

    #[test]
    fn test_new_task_is_immediately_attemptable() {
        let now = Utc::now();
        let task = PendingTask::new(
            "tenant-a",
            TaskType::new("email_tasks"),
            Some("sched-1".into()),
            serde_json::Value::Null,
            now,
        );
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.next_attempt_at, Some(now));
    }
}
