pub mod cron_parser;
pub mod fan_out;
pub mod ledger;
pub mod materializer;
pub mod schedule_store;
pub mod service;
pub mod trigger;

pub use fan_out::{FanOutDriver, FanOutReport, TenantFailure};
pub use ledger::DEFAULT_GRACE_WINDOW;
pub use materializer::{Materializer, RecurrenceSpec};
pub use schedule_store::SqliteScheduleStore;
pub use service::{ScheduleService, ScheduleSpec};
pub use trigger::{Firing, TenantPass, TriggerLoop};
