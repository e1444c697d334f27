//! Config defaults: applies default values to parsed config.

use crate::io::config_dir;
use crate::schema::{
    CadenceConfig, LoggingConfig, QueueConfig, SchedulerConfig, ServerConfig, StorageConfig,
};

/// Minimum age of an occurrence before it fires.
pub const DEFAULT_GRACE_WINDOW_MS: u64 = 1_000;

/// Materialized occurrences per schedule.
pub const DEFAULT_HORIZON: usize = 101;

/// Interval of the in-process ticker.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 30_000;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_MAX_DELAY_MS: u64 = 600_000;
pub const DEFAULT_DRAIN_BATCH_SIZE: usize = 50;

/// Database file name inside the config directory.
pub const DEFAULT_DB_FILE: &str = "cadence.db";

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8420;
pub const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 30;

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: CadenceConfig) -> CadenceConfig {
    let config = apply_scheduler_defaults(config);
    let config = apply_queue_defaults(config);
    let config = apply_storage_defaults(config);
    let config = apply_logging_defaults(config);
    apply_server_defaults(config)
}

fn apply_scheduler_defaults(mut config: CadenceConfig) -> CadenceConfig {
    let scheduler = config.scheduler.get_or_insert_with(SchedulerConfig::default);
    scheduler.grace_window_ms.get_or_insert(DEFAULT_GRACE_WINDOW_MS);
    scheduler.horizon.get_or_insert(DEFAULT_HORIZON);
    scheduler
        .poll_interval_secs
        .get_or_insert(DEFAULT_POLL_INTERVAL_SECS);
    config
}

fn apply_queue_defaults(mut config: CadenceConfig) -> CadenceConfig {
    let queue = config.queue.get_or_insert_with(QueueConfig::default);
    queue.max_attempts.get_or_insert(DEFAULT_MAX_ATTEMPTS);
    queue.base_delay_ms.get_or_insert(DEFAULT_BASE_DELAY_MS);
    queue.backoff_factor.get_or_insert(DEFAULT_BACKOFF_FACTOR);
    queue.max_delay_ms.get_or_insert(DEFAULT_MAX_DELAY_MS);
    queue.jitter.get_or_insert(false);
    queue.drain_batch_size.get_or_insert(DEFAULT_DRAIN_BATCH_SIZE);
    config
}

/// Database lives next to the config file unless set explicitly.
fn apply_storage_defaults(mut config: CadenceConfig) -> CadenceConfig {
    let storage = config.storage.get_or_insert_with(StorageConfig::default);
    if storage.db_path.is_none() {
        storage.db_path = Some(
            config_dir()
                .join(DEFAULT_DB_FILE)
                .to_string_lossy()
                .into_owned(),
        );
    }
    config
}

fn apply_logging_defaults(mut config: CadenceConfig) -> CadenceConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    if logging.level.is_none() {
        logging.level = Some(DEFAULT_LOG_LEVEL.to_string());
    }
    if logging.dir.is_none() {
        logging.dir = Some(config_dir().join("logs").to_string_lossy().into_owned());
    }
    config
}

fn apply_server_defaults(mut config: CadenceConfig) -> CadenceConfig {
    let server = config.server.get_or_insert_with(ServerConfig::default);
    if server.bind.is_none() {
        server.bind = Some(DEFAULT_BIND.to_string());
    }
    server.port.get_or_insert(DEFAULT_PORT);
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_retry_budget() {
        let cfg = apply_all_defaults(CadenceConfig::default());
        let queue = cfg.queue.unwrap();
        assert_eq!(queue.max_attempts, Some(DEFAULT_MAX_ATTEMPTS));
        assert_eq!(queue.drain_batch_size, Some(DEFAULT_DRAIN_BATCH_SIZE));
        assert_eq!(queue.jitter, Some(false));
    }

    #[test]
    fn applies_grace_window_and_horizon() {
        let cfg = apply_all_defaults(CadenceConfig::default());
        let scheduler = cfg.scheduler.unwrap();
        assert_eq!(scheduler.grace_window_ms, Some(1_000));
        assert_eq!(scheduler.horizon, Some(101));
    }

    #[test]
    fn db_path_defaults_into_config_dir() {
        let cfg = apply_all_defaults(CadenceConfig::default());
        assert!(cfg.db_path().ends_with(DEFAULT_DB_FILE));
    }

    #[test]
    fn does_not_override_user_values() {
        let cfg = CadenceConfig {
            queue: Some(QueueConfig {
                max_attempts: Some(5),
                ..Default::default()
            }),
            server: Some(ServerConfig {
                port: Some(9000),
                ..Default::default()
            }),
            ..Default::default()
        };
        let cfg = apply_all_defaults(cfg);
        assert_eq!(cfg.queue.as_ref().unwrap().max_attempts, Some(5));
        assert_eq!(cfg.server_addr(), "127.0.0.1:9000");
    }
}
