use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    AttemptRecord, DispatchRequest, FiringCommit, PendingTask, ScheduleDefinition, TaskStatus,
};

/// Capability executing one automation kind.
///
/// Returns `Ok(true)` when the work is done, `Ok(false)` for a recoverable
/// failure. An `Err` is treated exactly like `Ok(false)` by the dispatcher.
/// Handlers are restarted from scratch on every attempt.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, target_record_id: Option<&str>) -> anyhow::Result<bool>;
}

/// The single path the trigger loop uses to reach handlers.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Enqueue the request and run its first attempt. Returns whether the
    /// attempt succeeded.
    async fn dispatch(&self, request: DispatchRequest) -> Result<bool>;
}

/// Persistence for schedule definitions and their execution ledgers.
pub trait ScheduleStore: Send + Sync {
    /// Insert (when `version == 0`) or update a schedule, guarded by its
    /// version. Returns the new version.
    fn save(&self, schedule: &ScheduleDefinition) -> Result<u64>;

    fn get(&self, id: &str) -> Result<Option<ScheduleDefinition>>;

    fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<ScheduleDefinition>>;

    /// Distinct tenants owning at least one schedule.
    fn tenant_ids(&self) -> Result<Vec<String>>;

    /// Apply a firing as a compare-and-swap on the schedule version.
    fn commit_firing(&self, commit: &FiringCommit) -> Result<u64>;

    fn set_active(&self, id: &str, active: bool) -> Result<bool>;

    fn delete(&self, id: &str) -> Result<bool>;
}

/// Persistence for the pending task queue.
pub trait TaskStore: Send + Sync {
    fn insert(&self, task: &PendingTask) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<PendingTask>>;

    /// Fetch a task only while it is still `pending`.
    fn claim(&self, id: &str) -> Result<Option<PendingTask>>;

    /// Apply an attempt result. Returns `false` when the task left `pending`
    /// or another attempt was recorded first.
    fn finish_attempt(&self, record: &AttemptRecord) -> Result<bool>;

    /// Pending tasks whose next attempt is due, oldest first.
    fn due_for_retry(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<PendingTask>>;

    fn list_for_tenant(
        &self,
        tenant_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<PendingTask>>;
}
