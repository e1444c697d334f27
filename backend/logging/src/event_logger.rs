//! Automation Event Logger
//!
//! Typed scheduler/queue events written through `tracing` under the
//! `automation_events` target, so the NDJSON file layer captures them as
//! one line each.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::redact::redact_sensitive_data;

/// Target used for every automation event.
pub const EVENT_TARGET: &str = "automation_events";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AutomationEvent {
    OccurrenceFired {
        schedule_id: String,
        kind: String,
        occurrence: DateTime<Utc>,
    },
    AttemptFinished {
        task_id: String,
        task_type: String,
        attempt: u32,
        success: bool,
        time_taken_ms: u64,
        error: Option<String>,
    },
    TaskExhausted {
        task_id: String,
        task_type: String,
        attempts: u32,
        last_error: Option<String>,
    },
    TenantPassFailed {
        error: String,
    },
}

impl AutomationEvent {
    fn is_failure(&self) -> bool {
        match self {
            AutomationEvent::AttemptFinished { success, .. } => !success,
            AutomationEvent::TaskExhausted { .. } | AutomationEvent::TenantPassFailed { .. } => {
                true
            }
            AutomationEvent::OccurrenceFired { .. } => false,
        }
    }

    fn redact(&mut self) {
        match self {
            AutomationEvent::AttemptFinished { error: Some(e), .. }
            | AutomationEvent::TaskExhausted {
                last_error: Some(e),
                ..
            }
            | AutomationEvent::TenantPassFailed { error: e } => {
                *e = redact_sensitive_data(e);
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventLogEntry {
    pub tenant_id: String,
    pub timestamp: DateTime<Utc>,
    pub event: AutomationEvent,
}

pub struct EventLogger;

impl EventLogger {
    /// Redact and emit an automation event. Returns the entry as logged.
    pub fn log_event(tenant_id: &str, mut event: AutomationEvent) -> EventLogEntry {
        event.redact();

        let entry = EventLogEntry {
            tenant_id: tenant_id.into(),
            timestamp: Utc::now(),
            event,
        };

        let json = serde_json::to_string(&entry).unwrap_or_default();
        if entry.event.is_failure() {
            warn!(target: EVENT_TARGET, tenant_id = %entry.tenant_id, event = %json, "Automation event");
        } else {
            info!(target: EVENT_TARGET, tenant_id = %entry.tenant_id, event = %json, "Automation event");
        }
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_are_redacted() {
        let entry = EventLogger::log_event(
            "tenant-a",
            AutomationEvent::AttemptFinished {
                task_id: "t1".into(),
                task_type: "weekly_email".into(),
                attempt: 1,
                success: false,
                time_taken_ms: 12,
                error: Some("mailbox owner@example.org unavailable".into()),
            },
        );
        match entry.event {
            AutomationEvent::AttemptFinished { error, .. } => {
                assert_eq!(error.as_deref(), Some("mailbox [REDACTED_EMAIL] unavailable"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = AutomationEvent::TenantPassFailed {
            error: "storage error".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tenant_pass_failed");
        assert!(event.is_failure());
    }
}
