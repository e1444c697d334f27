//! Execution ledger rules: which occurrence is due, and what a firing
//! writes back.

use std::time::Duration as StdDuration;

use cadence_core::{FiringCommit, ScheduleDefinition};
use chrono::{DateTime, Duration, Utc};

/// Minimum age of an occurrence before it counts as due.
pub const DEFAULT_GRACE_WINDOW: StdDuration = StdDuration::from_secs(1);

/// First occurrence that is due at `now` and not yet in the ledger.
///
/// `occurrences` is ascending, so the scan stops at the first instant that
/// is still inside the grace window.
pub fn due_occurrence(
    schedule: &ScheduleDefinition,
    now: DateTime<Utc>,
    grace: Duration,
) -> Option<DateTime<Utc>> {
    schedule
        .occurrences
        .iter()
        .copied()
        .take_while(|occurrence| now - *occurrence >= grace)
        .find(|occurrence| !schedule.has_fired(*occurrence))
}

/// Retention for the executed list: entries older than the oldest
/// materialized occurrence can never match again and are dropped. The most
/// recent firing is always kept. An empty horizon prunes nothing.
pub fn prune_executed(executed: &mut Vec<DateTime<Utc>>, occurrences: &[DateTime<Utc>]) {
    let Some(oldest) = occurrences.first().copied() else {
        return;
    };
    let latest = executed.iter().max().copied();
    executed.retain(|e| *e >= oldest || Some(*e) == latest);
}

/// Build the compare-and-swap update recording `occurrence` as fired and
/// replacing the horizon with `refreshed`.
pub fn prepare_firing(
    schedule: &ScheduleDefinition,
    occurrence: DateTime<Utc>,
    refreshed: Vec<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> FiringCommit {
    let mut executed = schedule.executed_occurrences.clone();
    if !executed.contains(&occurrence) {
        executed.push(occurrence);
    }
    prune_executed(&mut executed, &refreshed);

    FiringCommit {
        schedule_id: schedule.id.clone(),
        expected_version: schedule.version,
        executed_occurrences: executed,
        execution_count: schedule.execution_count + 1,
        occurrences: refreshed,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::TaskType;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn schedule_with(occurrences: &[&str], executed: &[&str]) -> ScheduleDefinition {
        let mut s = ScheduleDefinition::new("tenant-a", TaskType::new("digest"));
        s.occurrences = occurrences.iter().map(|o| at(o)).collect();
        s.executed_occurrences = executed.iter().map(|o| at(o)).collect();
        s.version = 3;
        s
    }

    fn grace() -> Duration {
        Duration::from_std(DEFAULT_GRACE_WINDOW).unwrap()
    }

    #[test]
    fn occurrence_inside_grace_window_is_not_due() {
        let s = schedule_with(&["2024-01-01T09:00:00Z"], &[]);
        let now = at("2024-01-01T09:00:00.500Z");
        assert_eq!(due_occurrence(&s, now, grace()), None);
        let now = at("2024-01-01T09:00:01Z");
        assert_eq!(due_occurrence(&s, now, grace()), Some(at("2024-01-01T09:00:00Z")));
    }

    #[test]
    fn fired_occurrences_are_skipped() {
        let s = schedule_with(
            &["2024-01-01T09:00:00Z", "2024-01-02T09:00:00Z", "2024-01-09T09:00:00Z"],
            &["2024-01-01T09:00:00Z"],
        );
        let now = at("2024-01-03T00:00:00Z");
        assert_eq!(due_occurrence(&s, now, grace()), Some(at("2024-01-02T09:00:00Z")));
    }

    #[test]
    fn nothing_due_when_all_fired_or_future() {
        let s = schedule_with(
            &["2024-01-01T09:00:00Z", "2024-01-09T09:00:00Z"],
            &["2024-01-01T09:00:00Z"],
        );
        assert_eq!(due_occurrence(&s, at("2024-01-03T00:00:00Z"), grace()), None);
    }

    #[test]
    fn firing_appends_and_counts() {
        let mut s = schedule_with(&["2024-06-01T04:30:00Z"], &[]);
        s.execution_count = 4;
        let refreshed = vec![at("2024-06-01T04:30:00Z")];
        let now = at("2024-06-01T05:00:00Z");
        let commit = prepare_firing(&s, at("2024-06-01T04:30:00Z"), refreshed.clone(), now);
        assert_eq!(commit.expected_version, 3);
        assert_eq!(commit.execution_count, 5);
        assert_eq!(commit.executed_occurrences, vec![at("2024-06-01T04:30:00Z")]);
        assert_eq!(commit.occurrences, refreshed);
        assert_eq!(commit.updated_at, now);
    }

    #[test]
    fn pruning_drops_unreachable_entries_but_keeps_latest() {
        let mut executed = vec![
            at("2024-01-01T09:00:00Z"),
            at("2024-01-08T09:00:00Z"),
            at("2024-01-15T09:00:00Z"),
        ];
        let occurrences = vec![at("2024-01-10T00:00:00Z"), at("2024-01-22T09:00:00Z")];
        prune_executed(&mut executed, &occurrences);
        assert_eq!(executed, vec![at("2024-01-15T09:00:00Z")]);

        let mut executed = vec![at("2024-01-01T09:00:00Z"), at("2024-01-08T09:00:00Z")];
        prune_executed(&mut executed, &[at("2024-01-22T09:00:00Z")]);
        assert_eq!(executed, vec![at("2024-01-08T09:00:00Z")]);
    }

    #[test]
    fn empty_horizon_prunes_nothing() {
        let mut executed = vec![at("2024-01-01T09:00:00Z"), at("2024-01-08T09:00:00Z")];
        prune_executed(&mut executed, &[]);
        assert_eq!(executed.len(), 2);
    }
}
