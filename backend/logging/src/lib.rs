//! Structured logging for Cadence.
//!
//! Console + rolling NDJSON file output, redaction of personal data, and
//! typed automation events (firings, attempts, exhausted tasks).

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{AutomationEvent, EventLogEntry, EventLogger};
pub use logger::init_logger;
pub use redact::redact_sensitive_data;
