//! Schedule intake: create, edit, pause and remove schedule definitions.
//!
//! Every create or edit re-materializes occurrences so the stored horizon
//! always matches the stored recurrence fields.

use std::sync::Arc;

use cadence_core::{CadenceError, Result, ScheduleDefinition, ScheduleStore, TaskType};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cron_parser::normalize_cron;
use crate::materializer::{fixed_time_to_utc, Materializer};

/// Widest real-world UTC offset, in minutes.
const MAX_OFFSET_MINUTES: u32 = 14 * 60;

/// Caller-supplied recurrence and ownership fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSpec {
    pub tenant_id: String,
    pub kind: TaskType,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub cron_expressions: Vec<String>,
    #[serde(default)]
    pub fixed_times: Vec<NaiveDateTime>,
    #[serde(default = "default_timezone")]
    pub timezone_name: String,
    #[serde(default)]
    pub timezone_offset_minutes: i32,
}

fn default_active() -> bool {
    true
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl ScheduleSpec {
    /// A schedule must be able to produce at least one occurrence.
    fn validate(&self) -> Result<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(CadenceError::InvalidSchedule("tenantId is required".into()));
        }
        if self.kind.as_str().trim().is_empty() {
            return Err(CadenceError::InvalidSchedule("kind is required".into()));
        }
        if self.timezone_offset_minutes.unsigned_abs() > MAX_OFFSET_MINUTES {
            return Err(CadenceError::InvalidSchedule(format!(
                "timezoneOffsetMinutes {} is outside ±{MAX_OFFSET_MINUTES}",
                self.timezone_offset_minutes
            )));
        }
        if let Some(bad) = self
            .fixed_times
            .iter()
            .find(|local| fixed_time_to_utc(**local, self.timezone_offset_minutes).is_none())
        {
            return Err(CadenceError::InvalidSchedule(format!(
                "fixed time {bad} is out of range"
            )));
        }
        let valid_crons = self
            .cron_expressions
            .iter()
            .filter(|expr| normalize_cron(expr).is_ok())
            .count();
        if valid_crons == 0 && self.fixed_times.is_empty() {
            return Err(CadenceError::InvalidSchedule(
                "at least one valid cron expression or fixed time is required".into(),
            ));
        }
        Ok(())
    }
}

pub struct ScheduleService {
    store: Arc<dyn ScheduleStore>,
    materializer: Materializer,
}

impl ScheduleService {
    pub fn new(store: Arc<dyn ScheduleStore>, materializer: Materializer) -> Self {
        Self {
            store,
            materializer,
        }
    }

    /// Create the schedule `id`, or replace the recurrence fields of an
    /// existing one. The execution ledger survives edits.
    pub fn save(
        &self,
        id: &str,
        spec: ScheduleSpec,
        now: DateTime<Utc>,
    ) -> Result<ScheduleDefinition> {
        spec.validate()?;

        let mut schedule = match self.store.get(id)? {
            Some(existing) => {
                if existing.tenant_id != spec.tenant_id {
                    return Err(CadenceError::InvalidSchedule(format!(
                        "schedule '{id}' belongs to another tenant"
                    )));
                }
                existing
            }
            None => {
                let mut fresh = ScheduleDefinition::new(spec.tenant_id.clone(), spec.kind.clone());
                fresh.id = id.to_string();
                fresh.created_at = now;
                fresh
            }
        };

        schedule.kind = spec.kind;
        schedule.active = spec.active;
        schedule.cron_expressions = spec.cron_expressions;
        schedule.fixed_times = spec.fixed_times;
        schedule.timezone_name = spec.timezone_name;
        schedule.timezone_offset_minutes = spec.timezone_offset_minutes;
        schedule.occurrences = self.materializer.for_schedule(&schedule, now);
        schedule.updated_at = now;

        schedule.version = self.store.save(&schedule)?;
        info!(
            schedule_id = %schedule.id,
            tenant_id = %schedule.tenant_id,
            occurrences = schedule.occurrences.len(),
            "Schedule saved"
        );
        Ok(schedule)
    }

    pub fn get(&self, id: &str) -> Result<ScheduleDefinition> {
        self.store.get(id)?.ok_or_else(|| CadenceError::NotFound {
            entity: "schedule",
            id: id.to_string(),
        })
    }

    pub fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<ScheduleDefinition>> {
        self.store.list_for_tenant(tenant_id)
    }

    pub fn set_active(&self, id: &str, active: bool) -> Result<()> {
        if !self.store.set_active(id, active)? {
            return Err(CadenceError::NotFound {
                entity: "schedule",
                id: id.to_string(),
            });
        }
        info!(schedule_id = %id, active, "Schedule activation changed");
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        if !self.store.delete(id)? {
            return Err(CadenceError::NotFound {
                entity: "schedule",
                id: id.to_string(),
            });
        }
        info!(schedule_id = %id, "Schedule deleted");
        Ok(())
    }
}
