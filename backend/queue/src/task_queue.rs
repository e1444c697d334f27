use std::sync::Arc;

use cadence_core::{CadenceError, PendingTask, Result, TaskStatus, TaskStore};
use chrono::{DateTime, Utc};
use tracing::info;

/// Read access to the queue plus manual re-triggering of finished tasks.
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, task_id: &str) -> Result<PendingTask> {
        self.store.get(task_id)?.ok_or_else(|| CadenceError::NotFound {
            entity: "task",
            id: task_id.to_string(),
        })
    }

    pub fn list(&self, tenant_id: &str, status: Option<TaskStatus>) -> Result<Vec<PendingTask>> {
        self.store.list_for_tenant(tenant_id, status)
    }

    /// Enqueue a fresh copy of a terminal task with a full retry budget.
    /// The original record is left untouched.
    pub fn retrigger(&self, task_id: &str, now: DateTime<Utc>) -> Result<PendingTask> {
        let original = self.get(task_id)?;
        if !original.status.is_terminal() {
            return Err(CadenceError::TaskNotTerminal {
                id: original.id,
                status: original.status.to_string(),
            });
        }

        let task = PendingTask::new(
            original.tenant_id,
            original.task_type,
            original.target_record_id,
            original.payload,
            now,
        );
        self.store.insert(&task)?;
        info!(task_id = %task.id, retriggered_from = %task_id, "Task re-triggered");
        Ok(task)
    }
}
