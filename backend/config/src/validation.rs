//! Config validation: deep schema checks with user-friendly error messages.

use crate::defaults::DEFAULT_HORIZON;
use crate::schema::CadenceConfig;
use thiserror::Error;

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &CadenceConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_scheduler(config, &mut report);
    validate_queue(config, &mut report);
    validate_storage(config, &mut report);
    validate_logging(config, &mut report);
    validate_server(config, &mut report);
    validate_handlers(config, &mut report);
    report
}

fn validate_scheduler(config: &CadenceConfig, report: &mut ValidationReport) {
    let Some(scheduler) = &config.scheduler else { return };
    if let Some(horizon) = scheduler.horizon {
        if horizon == 0 || horizon > DEFAULT_HORIZON {
            report.warn(
                "scheduler.horizon",
                format!("horizon {horizon} is outside 1..={DEFAULT_HORIZON}; it will be clamped"),
            );
        }
    }
    if scheduler.poll_interval_secs == Some(0) {
        report.error("scheduler.pollIntervalSecs", "pollIntervalSecs must be >= 1");
    }
}

fn validate_queue(config: &CadenceConfig, report: &mut ValidationReport) {
    let Some(queue) = &config.queue else { return };
    if queue.max_attempts == Some(0) {
        report.error("queue.maxAttempts", "maxAttempts must be >= 1");
    }
    if let Some(factor) = queue.backoff_factor {
        if !factor.is_finite() || factor < 1.0 {
            report.error("queue.backoffFactor", "backoffFactor must be a number >= 1.0");
        }
    }
    if queue.base_delay_ms == Some(0) {
        report.warn(
            "queue.baseDelayMs",
            "baseDelayMs of 0 retries failed tasks on the very next drain",
        );
    }
    if let (Some(base), Some(max)) = (queue.base_delay_ms, queue.max_delay_ms) {
        if max < base {
            report.error("queue.maxDelayMs", "maxDelayMs must be >= baseDelayMs");
        }
    }
    if queue.drain_batch_size == Some(0) {
        report.error("queue.drainBatchSize", "drainBatchSize must be >= 1");
    }
}

fn validate_storage(config: &CadenceConfig, report: &mut ValidationReport) {
    let Some(storage) = &config.storage else { return };
    if storage.db_path.as_deref().is_some_and(|p| p.trim().is_empty()) {
        report.error("storage.dbPath", "dbPath cannot be empty");
    }
}

fn validate_logging(config: &CadenceConfig, report: &mut ValidationReport) {
    let Some(logging) = &config.logging else { return };
    if let Some(level) = &logging.level {
        if !matches!(
            level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            report.error(
                "logging.level",
                format!("Unknown log level '{level}'. Use trace, debug, info, warn or error"),
            );
        }
    }
}

fn validate_server(config: &CadenceConfig, report: &mut ValidationReport) {
    let Some(server) = &config.server else { return };
    if let Some(port) = server.port {
        if port < 1024 && port != 80 && port != 443 {
            report.warn(
                "server.port",
                format!("Port {port} requires elevated privileges; consider using a port >= 1024"),
            );
        }
    }
}

fn validate_handlers(config: &CadenceConfig, report: &mut ValidationReport) {
    for (task_type, handler) in &config.handlers {
        let path = format!("handlers.{task_type}");
        if task_type.trim().is_empty() {
            report.error("handlers", "Task type cannot be empty");
        }
        if !(handler.url.starts_with("http://") || handler.url.starts_with("https://")) {
            report.error(
                format!("{path}.url"),
                format!("'{}' is not an http(s) URL", handler.url),
            );
        }
        if handler.timeout_secs == Some(0) {
            report.error(format!("{path}.timeoutSecs"), "timeoutSecs must be >= 1");
        }
    }
}
