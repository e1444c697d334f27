//! Cadence runtime configuration schema.
//!
//! Every field is optional in the file; `defaults::apply_all_defaults` fills
//! the gaps after loading.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CadenceConfig {
    /// Trigger loop timing and horizon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerConfig>,

    /// Retry budget, backoff and drain batching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueConfig>,

    /// SQLite database location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    /// Logging configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    /// HTTP API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    /// Webhook handlers keyed by task type
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub handlers: HashMap<String, HandlerConfig>,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_window_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizon: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_batch_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>, // "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Resolved accessors (valid after defaults are applied)
// ---------------------------------------------------------------------------

impl CadenceConfig {
    pub fn scheduler(&self) -> SchedulerConfig {
        self.scheduler.clone().unwrap_or_default()
    }

    pub fn queue(&self) -> QueueConfig {
        self.queue.clone().unwrap_or_default()
    }

    pub fn db_path(&self) -> String {
        self.storage
            .as_ref()
            .and_then(|s| s.db_path.clone())
            .unwrap_or_else(|| crate::defaults::DEFAULT_DB_FILE.to_string())
    }

    pub fn log_level(&self) -> String {
        self.logging
            .as_ref()
            .and_then(|l| l.level.clone())
            .unwrap_or_else(|| crate::defaults::DEFAULT_LOG_LEVEL.to_string())
    }

    pub fn log_dir(&self) -> Option<String> {
        self.logging.as_ref().and_then(|l| l.dir.clone())
    }

    /// `bind:port` for the HTTP server.
    pub fn server_addr(&self) -> String {
        let server = self.server.clone().unwrap_or_default();
        format!(
            "{}:{}",
            server.bind.as_deref().unwrap_or(crate::defaults::DEFAULT_BIND),
            server.port.unwrap_or(crate::defaults::DEFAULT_PORT)
        )
    }
}

impl SchedulerConfig {
    pub fn grace_window(&self) -> Duration {
        Duration::from_millis(
            self.grace_window_ms
                .unwrap_or(crate::defaults::DEFAULT_GRACE_WINDOW_MS),
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(
            self.poll_interval_secs
                .unwrap_or(crate::defaults::DEFAULT_POLL_INTERVAL_SECS),
        )
    }
}

impl HandlerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(
            self.timeout_secs
                .unwrap_or(crate::defaults::DEFAULT_HANDLER_TIMEOUT_SECS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_yaml() {
        let yaml = r#"
scheduler:
  graceWindowMs: 2000
  pollIntervalSecs: 15
queue:
  maxAttempts: 3
  drainBatchSize: 20
handlers:
  weekly_digest:
    url: https://hooks.example.com/digest
    timeoutSecs: 5
    headers:
      x-api-key: abc
"#;
        let cfg: CadenceConfig = serde_yaml::from_str(yaml).unwrap();
        let scheduler = cfg.scheduler();
        assert_eq!(scheduler.grace_window(), Duration::from_secs(2));
        assert_eq!(scheduler.poll_interval(), Duration::from_secs(15));
        assert_eq!(cfg.queue().drain_batch_size, Some(20));
        let handler = &cfg.handlers["weekly_digest"];
        assert_eq!(handler.timeout(), Duration::from_secs(5));
        assert_eq!(handler.headers["x-api-key"], "abc");
    }

    #[test]
    fn empty_config_has_usable_accessors() {
        let cfg = CadenceConfig::default();
        assert_eq!(cfg.server_addr(), "127.0.0.1:8420");
        assert_eq!(cfg.log_level(), "info");
        assert_eq!(cfg.scheduler().grace_window(), Duration::from_secs(1));
    }
}
