//! Per-tenant trigger loop.
//!
//! One pass walks a tenant's active schedules, fires at most one due
//! occurrence per schedule, and hands each firing to the dispatcher.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use cadence_core::{
    CadenceError, DispatchRequest, Dispatcher, Result, ScheduleDefinition, ScheduleStore,
};
use cadence_logging::{AutomationEvent, EventLogger};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ledger::{due_occurrence, prepare_firing, DEFAULT_GRACE_WINDOW};
use crate::materializer::Materializer;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Firing {
    pub schedule_id: String,
    pub occurrence: DateTime<Utc>,
    pub succeeded: bool,
}

/// Summary of one tenant pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantPass {
    pub tenant_id: String,
    pub evaluated: usize,
    pub fired: Vec<Firing>,
    /// Firings lost to a concurrent pass that committed first.
    pub conflicts: usize,
    pub commit_errors: usize,
}

pub struct TriggerLoop {
    store: Arc<dyn ScheduleStore>,
    dispatcher: Arc<dyn Dispatcher>,
    materializer: Materializer,
    grace_window: Duration,
}

impl TriggerLoop {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        dispatcher: Arc<dyn Dispatcher>,
        materializer: Materializer,
    ) -> Self {
        Self {
            store,
            dispatcher,
            materializer,
            grace_window: Duration::from_std(DEFAULT_GRACE_WINDOW).unwrap_or(Duration::seconds(1)),
        }
    }

    pub fn with_grace_window(mut self, grace: StdDuration) -> Self {
        self.grace_window = Duration::from_std(grace).unwrap_or(self.grace_window);
        self
    }

    pub fn store(&self) -> &Arc<dyn ScheduleStore> {
        &self.store
    }

    /// Evaluate every active schedule of `tenant_id` at `now`.
    ///
    /// Only a failure to list the tenant's schedules aborts the pass. Commit
    /// and dispatch failures are confined to their schedule.
    pub async fn run_tenant(&self, tenant_id: &str, now: DateTime<Utc>) -> Result<TenantPass> {
        let schedules = self.store.list_for_tenant(tenant_id)?;
        let mut pass = TenantPass {
            tenant_id: tenant_id.to_string(),
            ..Default::default()
        };

        for schedule in schedules.into_iter().filter(|s| s.active) {
            pass.evaluated += 1;
            let Some(occurrence) = due_occurrence(&schedule, now, self.grace_window) else {
                continue;
            };

            match self.commit(&schedule, occurrence, now) {
                Ok(()) => {}
                Err(e) if e.is_version_conflict() => {
                    debug!(schedule_id = %schedule.id, "Occurrence already claimed by another pass");
                    pass.conflicts += 1;
                    continue;
                }
                Err(e) => {
                    warn!(
                        schedule_id = %schedule.id,
                        error = %e,
                        "Failed to record firing, schedule left for the next pass"
                    );
                    pass.commit_errors += 1;
                    continue;
                }
            }

            EventLogger::log_event(
                tenant_id,
                AutomationEvent::OccurrenceFired {
                    schedule_id: schedule.id.clone(),
                    kind: schedule.kind.to_string(),
                    occurrence,
                },
            );

            let succeeded = self.dispatch(&schedule, occurrence).await;
            pass.fired.push(Firing {
                schedule_id: schedule.id.clone(),
                occurrence,
                succeeded,
            });
        }

        info!(
            tenant_id = %tenant_id,
            evaluated = pass.evaluated,
            fired = pass.fired.len(),
            conflicts = pass.conflicts,
            "Tenant pass complete"
        );
        Ok(pass)
    }

    fn commit(
        &self,
        schedule: &ScheduleDefinition,
        occurrence: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let refreshed = self.materializer.for_schedule(schedule, now);
        let commit = prepare_firing(schedule, occurrence, refreshed, now);
        self.store.commit_firing(&commit).map(|_| ())
    }

    async fn dispatch(&self, schedule: &ScheduleDefinition, occurrence: DateTime<Utc>) -> bool {
        let request = DispatchRequest {
            tenant_id: schedule.tenant_id.clone(),
            task_type: schedule.kind.clone(),
            target_record_id: Some(schedule.id.clone()),
            payload: serde_json::json!({
                "scheduleId": schedule.id,
                "occurrence": occurrence,
            }),
        };
        match self.dispatcher.dispatch(request).await {
            Ok(succeeded) => succeeded,
            Err(e) => {
                warn!(schedule_id = %schedule.id, error = %e, "Dispatch failed");
                false
            }
        }
    }
}

/// Wrap a tenant-level failure for reporting.
pub(crate) fn tenant_error(tenant_id: &str, reason: impl Into<String>) -> CadenceError {
    CadenceError::TenantLoop {
        tenant_id: tenant_id.to_string(),
        reason: reason.into(),
    }
}
