//! Tenant fan-out: one trigger-loop pass per tenant, with failures confined
//! to the tenant that produced them.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use cadence_core::{describe_panic, Result, ScheduleStore};
use cadence_logging::{AutomationEvent, EventLogger};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tracing::{error, info};

use crate::trigger::{tenant_error, TenantPass, TriggerLoop};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantFailure {
    pub tenant_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanOutReport {
    pub tenants: usize,
    pub passes: Vec<TenantPass>,
    pub failures: Vec<TenantFailure>,
}

impl FanOutReport {
    pub fn fired(&self) -> usize {
        self.passes.iter().map(|p| p.fired.len()).sum()
    }
}

pub struct FanOutDriver {
    store: Arc<dyn ScheduleStore>,
    trigger: Arc<TriggerLoop>,
}

impl FanOutDriver {
    pub fn new(trigger: Arc<TriggerLoop>) -> Self {
        Self {
            store: trigger.store().clone(),
            trigger,
        }
    }

    pub fn trigger(&self) -> &Arc<TriggerLoop> {
        &self.trigger
    }

    /// Run the trigger loop for every tenant owning a schedule, in order.
    ///
    /// Only the tenant enumeration can fail the whole pass.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<FanOutReport> {
        let tenants = self.store.tenant_ids()?;
        let mut report = FanOutReport {
            tenants: tenants.len(),
            ..Default::default()
        };

        for tenant_id in tenants {
            let outcome = AssertUnwindSafe(self.trigger.run_tenant(&tenant_id, now))
                .catch_unwind()
                .await;

            let failure = match outcome {
                Ok(Ok(pass)) => {
                    report.passes.push(pass);
                    continue;
                }
                Ok(Err(e)) => tenant_error(&tenant_id, e.to_string()),
                Err(panic) => tenant_error(&tenant_id, describe_panic(panic.as_ref())),
            };

            error!(tenant_id = %tenant_id, error = %failure, "Tenant pass failed");
            EventLogger::log_event(
                &tenant_id,
                AutomationEvent::TenantPassFailed {
                    error: failure.to_string(),
                },
            );
            report.failures.push(TenantFailure {
                tenant_id,
                error: failure.to_string(),
            });
        }

        info!(
            tenants = report.tenants,
            fired = report.fired(),
            failures = report.failures.len(),
            "Fan-out pass complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use cadence_core::{CadenceError, FiringCommit, ScheduleDefinition};

    use crate::materializer::Materializer;
    use crate::schedule_store::SqliteScheduleStore;
    use crate::trigger::tests::{at, fixed_schedule, RecordingDispatcher};

    /// Store that errors or panics while listing one tenant's schedules.
    struct FlakyStore {
        inner: SqliteScheduleStore,
        erroring_tenant: &'static str,
        panicking_tenant: &'static str,
    }

    impl ScheduleStore for FlakyStore {
        fn save(&self, schedule: &ScheduleDefinition) -> Result<u64> {
            self.inner.save(schedule)
        }
        fn get(&self, id: &str) -> Result<Option<ScheduleDefinition>> {
            self.inner.get(id)
        }
        fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<ScheduleDefinition>> {
            if tenant_id == self.erroring_tenant {
                return Err(CadenceError::Storage("disk I/O error".into()));
            }
            if tenant_id == self.panicking_tenant {
                panic!("corrupt row for {tenant_id}");
            }
            self.inner.list_for_tenant(tenant_id)
        }
        fn tenant_ids(&self) -> Result<Vec<String>> {
            self.inner.tenant_ids()
        }
        fn commit_firing(&self, commit: &FiringCommit) -> Result<u64> {
            self.inner.commit_firing(commit)
        }
        fn set_active(&self, id: &str, active: bool) -> Result<bool> {
            self.inner.set_active(id, active)
        }
        fn delete(&self, id: &str) -> Result<bool> {
            self.inner.delete(id)
        }
    }

    fn driver(store: Arc<dyn ScheduleStore>) -> (FanOutDriver, Arc<RecordingDispatcher>) {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let trigger = Arc::new(TriggerLoop::new(store, dispatcher.clone(), Materializer::default()));
        (FanOutDriver::new(trigger), dispatcher)
    }

    #[tokio::test]
    async fn failing_tenants_do_not_block_siblings() {
        let store = Arc::new(FlakyStore {
            inner: SqliteScheduleStore::in_memory().unwrap(),
            erroring_tenant: "tenant-a",
            panicking_tenant: "tenant-b",
        });
        for tenant in ["tenant-a", "tenant-b", "tenant-c"] {
            store.save(&fixed_schedule(tenant, "2024-06-01T10:00:00")).unwrap();
        }
        let (driver, dispatcher) = driver(store);

        let report = driver.run(at("2024-06-01T11:00:00Z")).await.unwrap();
        assert_eq!(report.tenants, 3);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].tenant_id, "tenant-a");
        assert!(report.failures[0].error.contains("disk I/O error"));
        assert_eq!(report.failures[1].tenant_id, "tenant-b");
        assert!(report.failures[1].error.contains("panicked"));

        assert_eq!(report.passes.len(), 1);
        assert_eq!(report.passes[0].tenant_id, "tenant-c");
        assert_eq!(report.fired(), 1);

        let requests = dispatcher.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tenant_id, "tenant-c");
    }

    #[tokio::test]
    async fn repeated_fan_out_in_same_second_fires_once() {
        let store = Arc::new(SqliteScheduleStore::in_memory().unwrap());
        store.save(&fixed_schedule("tenant-a", "2024-06-01T10:00:00")).unwrap();
        let mut cron = ScheduleDefinition::new("tenant-b", "notes_summary".into());
        cron.cron_expressions = vec!["*/5 * * * *".into()];
        cron.occurrences = Materializer::default().for_schedule(&cron, at("2024-06-01T09:00:00Z"));
        store.save(&cron).unwrap();
        let (driver, dispatcher) = driver(store);

        let now = at("2024-06-01T10:00:02Z");
        let first = driver.run(now).await.unwrap();
        let second = driver.run(now).await.unwrap();
        assert_eq!(first.fired(), 2);
        assert_eq!(second.fired(), 0);
        assert_eq!(dispatcher.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn no_tenants_is_an_empty_report() {
        let (driver, _) = driver(Arc::new(SqliteScheduleStore::in_memory().unwrap()));
        let report = driver.run(at("2024-06-01T10:00:00Z")).await.unwrap();
        assert_eq!(report.tenants, 0);
        assert!(report.passes.is_empty());
        assert!(report.failures.is_empty());
    }
}
