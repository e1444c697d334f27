use thiserror::Error;

/// Top-level error type for the Cadence scheduler.
#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("invalid recurrence '{expression}': {reason}")]
    RecurrenceParse { expression: String, reason: String },

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("handler for '{task_type}' failed: {reason}")]
    HandlerFailure { task_type: String, reason: String },

    #[error("no handler registered for task type '{0}'")]
    UnknownTaskType(String),

    #[error("loop for tenant '{tenant_id}' failed: {reason}")]
    TenantLoop { tenant_id: String, reason: String },

    #[error("version conflict on {entity} '{id}' (expected version {expected})")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: u64,
    },

    #[error("task '{id}' is still {status}")]
    TaskNotTerminal { id: String, status: String },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CadenceError {
    /// Wrap a backend failure with the operation that produced it.
    pub fn storage(op: &str, err: impl std::fmt::Display) -> Self {
        CadenceError::Storage(format!("{op}: {err}"))
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, CadenceError::VersionConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, CadenceError>;

/// Render a caught panic payload as an error message.
pub fn describe_panic(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
