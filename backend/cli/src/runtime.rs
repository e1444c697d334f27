//! Wires stores, handlers, the trigger loop and the queue from config.

use std::sync::Arc;

use anyhow::{Context, Result};
use cadence_config::CadenceConfig;
use cadence_core::{ScheduleStore, TaskStore, TaskType};
use cadence_queue::{
    DispatchGateway, HandlerRegistry, QueueWorker, RetryPolicy, SqliteTaskStore, TaskQueue,
    WebhookHandler,
};
use cadence_scheduler::{
    FanOutDriver, Materializer, ScheduleService, SqliteScheduleStore, TriggerLoop,
};
use tracing::info;

/// Everything the CLI commands and HTTP routes operate on.
pub struct Runtime {
    pub schedules: ScheduleService,
    pub trigger: Arc<TriggerLoop>,
    pub fan_out: FanOutDriver,
    pub worker: QueueWorker,
    pub tasks: TaskQueue,
}

impl Runtime {
    /// Open the SQLite stores named by the config and assemble the runtime.
    pub fn open(config: &CadenceConfig) -> Result<Self> {
        let db_path = config.db_path();
        if let Some(parent) = std::path::Path::new(&db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }
        let schedule_store: Arc<dyn ScheduleStore> = Arc::new(
            SqliteScheduleStore::open(&db_path).context("Failed to open schedule store")?,
        );
        let task_store: Arc<dyn TaskStore> =
            Arc::new(SqliteTaskStore::open(&db_path).context("Failed to open task store")?);
        let registry = build_registry(config)?;
        Ok(Self::assemble(config, schedule_store, task_store, registry))
    }

    pub fn assemble(
        config: &CadenceConfig,
        schedule_store: Arc<dyn ScheduleStore>,
        task_store: Arc<dyn TaskStore>,
        registry: HandlerRegistry,
    ) -> Self {
        let scheduler = config.scheduler();
        let queue = config.queue();
        let materializer = Materializer::new(scheduler.horizon.unwrap_or_default());

        let defaults = RetryPolicy::default();
        let policy = RetryPolicy {
            max_attempts: queue.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay_ms: queue.base_delay_ms.unwrap_or(defaults.base_delay_ms),
            backoff_factor: queue.backoff_factor.unwrap_or(defaults.backoff_factor),
            max_delay_ms: queue.max_delay_ms.unwrap_or(defaults.max_delay_ms),
            jitter: queue.jitter.unwrap_or(defaults.jitter),
        };

        let gateway = Arc::new(DispatchGateway::new(
            task_store.clone(),
            Arc::new(registry),
            policy,
        ));
        let trigger = Arc::new(
            TriggerLoop::new(schedule_store.clone(), gateway.clone(), materializer.clone())
                .with_grace_window(scheduler.grace_window()),
        );

        Self {
            schedules: ScheduleService::new(schedule_store, materializer),
            fan_out: FanOutDriver::new(trigger.clone()),
            trigger,
            worker: QueueWorker::new(gateway, queue.drain_batch_size.unwrap_or_default()),
            tasks: TaskQueue::new(task_store),
        }
    }
}

/// One webhook handler per configured task type.
pub fn build_registry(config: &CadenceConfig) -> Result<HandlerRegistry> {
    let mut builder = HandlerRegistry::builder();
    for (task_type, handler) in &config.handlers {
        let webhook = WebhookHandler::new(
            TaskType::new(task_type.as_str()),
            handler.url.clone(),
            handler.timeout(),
            handler.headers.clone(),
        )
        .with_context(|| format!("Failed to build handler for '{task_type}'"))?;
        info!(task_type = %task_type, url = %handler.url, "Registered webhook handler");
        builder = builder.register(task_type.as_str(), Arc::new(webhook));
    }
    Ok(builder.build())
}
