pub mod gateway;
pub mod registry;
pub mod retry;
pub mod task_queue;
pub mod task_store;
pub mod webhook;
pub mod worker;

pub use gateway::{AttemptOutcome, DispatchGateway};
pub use registry::{HandlerRegistry, HandlerRegistryBuilder};
pub use retry::{FailureTransition, RetryPolicy};
pub use task_queue::TaskQueue;
pub use task_store::SqliteTaskStore;
pub use webhook::{WebhookHandler, DEFAULT_WEBHOOK_TIMEOUT};
pub use worker::{DrainReport, QueueWorker, DEFAULT_DRAIN_BATCH};
