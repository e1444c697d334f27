//! Dispatch gateway: the only path from a task to its handler.
//!
//! Every attempt is claimed by id while the task is still `pending`, timed,
//! and written back through a guarded update. Handler errors, panics and
//! unknown task types all become an ordinary failed attempt.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use cadence_core::{
    describe_panic, AttemptRecord, CadenceError, DispatchRequest, Dispatcher, PendingTask, Result,
    TaskStatus, TaskStore,
};
use cadence_logging::{AutomationEvent, EventLogger};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, warn};

use crate::registry::HandlerRegistry;
use crate::retry::RetryPolicy;

/// Result of one attempt as written to the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptOutcome {
    pub task_id: String,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub time_taken_ms: u64,
    pub error: Option<String>,
    /// False when another attempt finalized the task first.
    pub recorded: bool,
}

impl AttemptOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

pub struct DispatchGateway {
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    policy: RetryPolicy,
}

impl DispatchGateway {
    pub fn new(store: Arc<dyn TaskStore>, registry: Arc<HandlerRegistry>, policy: RetryPolicy) -> Self {
        Self {
            store,
            registry,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Persist a fresh pending task for `request`.
    pub fn enqueue(&self, request: DispatchRequest, now: DateTime<Utc>) -> Result<PendingTask> {
        let task = PendingTask::new(
            request.tenant_id,
            request.task_type,
            request.target_record_id,
            request.payload,
            now,
        );
        self.store.insert(&task)?;
        Ok(task)
    }

    /// Run one attempt of `task_id`. Returns `None` when the task is not
    /// claimable (missing, terminal or archived).
    pub async fn attempt(&self, task_id: &str, now: DateTime<Utc>) -> Result<Option<AttemptOutcome>> {
        let Some(task) = self.store.claim(task_id)? else {
            debug!(task_id = %task_id, "Task not claimable, skipping attempt");
            return Ok(None);
        };

        let started = Instant::now();
        let result = self.invoke(&task).await;
        let time_taken_ms = started.elapsed().as_millis() as u64;

        let record = match &result {
            Ok(()) => AttemptRecord {
                task_id: task.id.clone(),
                expected_retry_count: task.retry_count,
                status: TaskStatus::Success,
                retry_count: task.retry_count,
                time_taken_ms,
                last_error: None,
                next_attempt_at: None,
                updated_at: now,
            },
            Err(reason) => {
                let next = self.policy.after_failure(task.retry_count, now);
                AttemptRecord {
                    task_id: task.id.clone(),
                    expected_retry_count: task.retry_count,
                    status: next.status,
                    retry_count: next.retry_count,
                    time_taken_ms,
                    last_error: Some(reason.clone()),
                    next_attempt_at: next.next_attempt_at,
                    updated_at: now,
                }
            }
        };

        let recorded = self.store.finish_attempt(&record)?;
        if !recorded {
            warn!(task_id = %task.id, "Attempt result discarded, task was finalized concurrently");
        }

        let outcome = AttemptOutcome {
            task_id: task.id.clone(),
            status: record.status,
            retry_count: record.retry_count,
            time_taken_ms,
            error: record.last_error.clone(),
            recorded,
        };
        if recorded {
            self.log_attempt(&task, &outcome);
        }
        Ok(Some(outcome))
    }

    /// Look up and run the handler, folding every failure into an error
    /// message.
    async fn invoke(&self, task: &PendingTask) -> std::result::Result<(), String> {
        let Some(handler) = self.registry.get(&task.task_type) else {
            let err = CadenceError::UnknownTaskType(task.task_type.to_string());
            warn!(task_id = %task.id, error = %err, "No handler registered");
            return Err(err.to_string());
        };

        let outcome = AssertUnwindSafe(handler.handle(task.target_record_id.as_deref()))
            .catch_unwind()
            .await;
        let reason = match outcome {
            Ok(Ok(true)) => return Ok(()),
            Ok(Ok(false)) => "handler reported failure".to_string(),
            Ok(Err(e)) => format!("{e:#}"),
            Err(panic) => describe_panic(panic.as_ref()),
        };
        Err(CadenceError::HandlerFailure {
            task_type: task.task_type.to_string(),
            reason,
        }
        .to_string())
    }

    fn log_attempt(&self, task: &PendingTask, outcome: &AttemptOutcome) {
        EventLogger::log_event(
            &task.tenant_id,
            AutomationEvent::AttemptFinished {
                task_id: task.id.clone(),
                task_type: task.task_type.to_string(),
                attempt: task.retry_count + 1,
                success: outcome.succeeded(),
                time_taken_ms: outcome.time_taken_ms,
                error: outcome.error.clone(),
            },
        );
        if outcome.status == TaskStatus::Failed {
            EventLogger::log_event(
                &task.tenant_id,
                AutomationEvent::TaskExhausted {
                    task_id: task.id.clone(),
                    task_type: task.task_type.to_string(),
                    attempts: outcome.retry_count,
                    last_error: outcome.error.clone(),
                },
            );
        }
    }
}

#[async_trait]
impl Dispatcher for DispatchGateway {
    async fn dispatch(&self, request: DispatchRequest) -> Result<bool> {
        let now = Utc::now();
        let task = self.enqueue(request, now)?;
        let outcome = self.attempt(&task.id, now).await?;
        Ok(outcome.is_some_and(|o| o.succeeded()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use cadence_core::{TaskHandler, TaskType};

    use crate::task_store::SqliteTaskStore;

    pub(crate) fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    /// Handler with a scripted result and a call counter.
    pub(crate) struct Scripted {
        pub(crate) calls: AtomicU32,
        pub(crate) behaviour: Behaviour,
    }

    #[derive(Clone, Copy)]
    pub(crate) enum Behaviour {
        Succeed,
        Fail,
        Error,
        Panic,
    }

    impl Scripted {
        pub(crate) fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                behaviour,
            })
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TaskHandler for Scripted {
        async fn handle(&self, _target_record_id: Option<&str>) -> anyhow::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Succeed => Ok(true),
                Behaviour::Fail => Ok(false),
                Behaviour::Error => anyhow::bail!("smtp relay refused connection"),
                Behaviour::Panic => panic!("template missing"),
            }
        }
    }

    pub(crate) fn gateway_with(task_type: &str, handler: Arc<Scripted>) -> DispatchGateway {
        let registry = HandlerRegistry::builder().register(task_type, handler).build();
        DispatchGateway::new(
            Arc::new(SqliteTaskStore::in_memory().unwrap()),
            Arc::new(registry),
            RetryPolicy::default(),
        )
    }

    fn request(task_type: &str) -> DispatchRequest {
        DispatchRequest {
            tenant_id: "tenant-a".into(),
            task_type: TaskType::new(task_type),
            target_record_id: Some("sched-1".into()),
            payload: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn always_failing_handler_gets_exactly_three_attempts() {
        let handler = Scripted::new(Behaviour::Fail);
        let gateway = gateway_with("email_tasks", handler.clone());
        let now = at("2024-01-01T00:00:00Z");
        let task = gateway.enqueue(request("email_tasks"), now).unwrap();

        let first = gateway.attempt(&task.id, now).await.unwrap().unwrap();
        assert_eq!((first.status, first.retry_count), (TaskStatus::Pending, 1));
        let second = gateway.attempt(&task.id, now).await.unwrap().unwrap();
        assert_eq!((second.status, second.retry_count), (TaskStatus::Pending, 2));
        let third = gateway.attempt(&task.id, now).await.unwrap().unwrap();
        assert_eq!((third.status, third.retry_count), (TaskStatus::Failed, 3));

        assert!(gateway.attempt(&task.id, now).await.unwrap().is_none());
        assert_eq!(handler.calls(), 3);

        let stored = gateway.store().get(&task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.retry_count, 3);
        assert_eq!(stored.next_attempt_at, None);
        assert!(stored.last_error.unwrap().contains("handler reported failure"));
    }

    #[tokio::test]
    async fn failed_attempt_schedules_backoff() {
        let gateway = gateway_with("email_tasks", Scripted::new(Behaviour::Fail));
        let now = at("2024-01-01T00:00:00Z");
        let task = gateway.enqueue(request("email_tasks"), now).unwrap();
        gateway.attempt(&task.id, now).await.unwrap();

        let stored = gateway.store().get(&task.id).unwrap().unwrap();
        assert_eq!(stored.next_attempt_at, Some(at("2024-01-01T00:00:30Z")));
        assert!(stored.time_taken_ms.is_some());
    }

    #[tokio::test]
    async fn success_is_terminal() {
        let handler = Scripted::new(Behaviour::Succeed);
        let gateway = gateway_with("weekly_digest", handler.clone());

        assert!(gateway.dispatch(request("weekly_digest")).await.unwrap());
        let tasks = gateway
            .store()
            .list_for_tenant("tenant-a", Some(TaskStatus::Success))
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].retry_count, 0);
        assert_eq!(tasks[0].last_error, None);
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_task_type_is_a_failed_attempt() {
        let gateway = gateway_with("email_tasks", Scripted::new(Behaviour::Succeed));

        let succeeded = gateway.dispatch(request("fax_tasks")).await.unwrap();
        assert!(!succeeded);

        let tasks = gateway.store().list_for_tenant("tenant-a", None).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Pending);
        assert_eq!(tasks[0].retry_count, 1);
        assert!(tasks[0].last_error.as_deref().unwrap().contains("fax_tasks"));
    }

    #[tokio::test]
    async fn handler_errors_and_panics_fold_into_failure() {
        for behaviour in [Behaviour::Error, Behaviour::Panic] {
            let gateway = gateway_with("email_tasks", Scripted::new(behaviour));
            let now = at("2024-01-01T00:00:00Z");
            let task = gateway.enqueue(request("email_tasks"), now).unwrap();

            let outcome = gateway.attempt(&task.id, now).await.unwrap().unwrap();
            assert_eq!(outcome.status, TaskStatus::Pending);
            assert_eq!(outcome.retry_count, 1);
            assert!(outcome.recorded);
            let error = outcome.error.unwrap();
            assert!(
                error.contains("smtp relay refused") || error.contains("panicked: template missing"),
                "unexpected error: {error}"
            );
        }
    }

    #[tokio::test]
    async fn archived_tasks_are_never_attempted() {
        let handler = Scripted::new(Behaviour::Succeed);
        let gateway = gateway_with("email_tasks", handler.clone());
        let now = at("2024-01-01T00:00:00Z");
        let mut task = PendingTask::new("tenant-a", "email_tasks".into(), None, serde_json::Value::Null, now);
        task.status = TaskStatus::Archived;
        gateway.store().insert(&task).unwrap();

        assert!(gateway.attempt(&task.id, now).await.unwrap().is_none());
        assert_eq!(handler.calls(), 0);
    }
}
