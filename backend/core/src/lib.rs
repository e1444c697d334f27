pub mod error;
pub mod traits;
pub mod types;

pub use error::{describe_panic, CadenceError, Result};
pub use traits::{Dispatcher, ScheduleStore, TaskHandler, TaskStore};
pub use types::{
    AttemptRecord, DispatchRequest, FiringCommit, PendingTask, ScheduleDefinition, TaskStatus,
    TaskType, MAX_OCCURRENCES,
};
