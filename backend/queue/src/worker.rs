//! Retry drain: re-attempts pending tasks whose backoff has elapsed.

use std::collections::HashSet;
use std::sync::Arc;

use cadence_core::{Result, TaskStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::gateway::DispatchGateway;

pub const DEFAULT_DRAIN_BATCH: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub exhausted: usize,
}

pub struct QueueWorker {
    gateway: Arc<DispatchGateway>,
    batch_size: usize,
}

impl QueueWorker {
    pub fn new(gateway: Arc<DispatchGateway>, batch_size: usize) -> Self {
        Self {
            gateway,
            batch_size: if batch_size == 0 {
                DEFAULT_DRAIN_BATCH
            } else {
                batch_size
            },
        }
    }

    /// Attempt every task due at `now`, oldest first. Each task gets at most
    /// one attempt per drain.
    pub async fn drain(&self, now: DateTime<Utc>) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            let batch: Vec<_> = self
                .gateway
                .store()
                .due_for_retry(now, self.batch_size)?
                .into_iter()
                .filter(|task| seen.insert(task.id.clone()))
                .collect();
            if batch.is_empty() {
                break;
            }

            for task in batch {
                let outcome = match self.gateway.attempt(&task.id, now).await {
                    Ok(Some(outcome)) => outcome,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(task_id = %task.id, error = %e, "Retry attempt could not be recorded");
                        continue;
                    }
                };
                report.attempted += 1;
                match outcome.status {
                    TaskStatus::Success => report.succeeded += 1,
                    TaskStatus::Pending => report.rescheduled += 1,
                    _ => report.exhausted += 1,
                }
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                rescheduled = report.rescheduled,
                exhausted = report.exhausted,
                "Queue drain complete"
            );
        }
        Ok(report)
    }
}
