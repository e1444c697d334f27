//! Occurrence materializer.
//!
//! Turns a schedule's recurrence fields into the sorted, deduplicated, capped
//! list of UTC instants the trigger loop scans. Pure: the result depends
//! only on the inputs and `now`.

use std::collections::BTreeSet;

use cadence_core::{ScheduleDefinition, MAX_OCCURRENCES};
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tracing::{debug, warn};

use crate::cron_parser::parse_cron;

/// Borrowed view of the fields occurrences are derived from.
#[derive(Debug, Clone, Copy)]
pub struct RecurrenceSpec<'a> {
    pub cron_expressions: &'a [String],
    pub fixed_times: &'a [NaiveDateTime],
    pub timezone_name: &'a str,
    pub timezone_offset_minutes: i32,
}

impl<'a> From<&'a ScheduleDefinition> for RecurrenceSpec<'a> {
    fn from(schedule: &'a ScheduleDefinition) -> Self {
        Self {
            cron_expressions: &schedule.cron_expressions,
            fixed_times: &schedule.fixed_times,
            timezone_name: &schedule.timezone_name,
            timezone_offset_minutes: schedule.timezone_offset_minutes,
        }
    }
}

/// Zone cron expressions are evaluated in.
#[derive(Debug, Clone, Copy)]
enum Zone {
    Named(Tz),
    Fixed(FixedOffset),
}

fn resolve_zone(name: &str, offset_minutes: i32) -> Zone {
    match name.parse::<Tz>() {
        Ok(tz) => Zone::Named(tz),
        Err(_) => {
            let offset = FixedOffset::east_opt(offset_minutes.saturating_mul(60))
                .unwrap_or_else(|| Utc.fix());
            warn!(
                timezone = %name,
                offset_minutes,
                "Unknown timezone name, falling back to fixed offset"
            );
            Zone::Fixed(offset)
        }
    }
}

fn upcoming_in<Z: TimeZone>(
    schedule: &Schedule,
    now: DateTime<Utc>,
    zone: &Z,
    limit: usize,
) -> Vec<DateTime<Utc>> {
    schedule
        .after(&now.with_timezone(zone))
        .take(limit)
        .map(|t| t.with_timezone(&Utc))
        .collect()
}

/// Convert a local wall-clock time to UTC using a fixed minute offset.
/// `None` when the result falls outside the representable range.
pub fn fixed_time_to_utc(local: NaiveDateTime, offset_minutes: i32) -> Option<DateTime<Utc>> {
    local
        .and_utc()
        .checked_sub_signed(Duration::minutes(i64::from(offset_minutes)))
}

#[derive(Debug, Clone)]
pub struct Materializer {
    horizon: usize,
}

impl Default for Materializer {
    fn default() -> Self {
        Self {
            horizon: MAX_OCCURRENCES,
        }
    }
}

impl Materializer {
    /// Horizons above [`MAX_OCCURRENCES`] are clamped; zero means the default.
    pub fn new(horizon: usize) -> Self {
        let horizon = if horizon == 0 {
            MAX_OCCURRENCES
        } else {
            horizon.min(MAX_OCCURRENCES)
        };
        Self { horizon }
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn for_schedule(&self, schedule: &ScheduleDefinition, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        self.materialize(RecurrenceSpec::from(schedule), now)
    }

    /// Compute the occurrence list.
    ///
    /// Cron expressions contribute their next `horizon` instants strictly
    /// after `now`; fixed times are always included, past ones too. A
    /// malformed expression is skipped and never aborts the rest.
    pub fn materialize(&self, spec: RecurrenceSpec<'_>, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut instants: BTreeSet<i64> = BTreeSet::new();

        if !spec.cron_expressions.is_empty() {
            let zone = resolve_zone(spec.timezone_name, spec.timezone_offset_minutes);
            for expression in spec.cron_expressions {
                let schedule = match parse_cron(expression) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(expression = %expression, error = %e, "Skipping malformed cron expression");
                        continue;
                    }
                };
                let upcoming = match zone {
                    Zone::Named(tz) => upcoming_in(&schedule, now, &tz, self.horizon),
                    Zone::Fixed(offset) => upcoming_in(&schedule, now, &offset, self.horizon),
                };
                instants.extend(upcoming.iter().map(DateTime::timestamp_millis));
            }
        }

        for local in spec.fixed_times {
            match fixed_time_to_utc(*local, spec.timezone_offset_minutes) {
                Some(instant) => {
                    instants.insert(instant.timestamp_millis());
                }
                None => warn!(
                    fixed_time = %local,
                    offset_minutes = spec.timezone_offset_minutes,
                    "Skipping fixed time outside the representable range"
                ),
            }
        }

        let occurrences: Vec<DateTime<Utc>> = instants
            .into_iter()
            .take(self.horizon)
            .filter_map(DateTime::from_timestamp_millis)
            .collect();

        debug!(count = occurrences.len(), "Materialized occurrences");
        occurrences
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, NaiveDate, Weekday};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn local(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    fn spec<'a>(crons: &'a [String], fixed: &'a [NaiveDateTime], tz: &'a str, offset: i32) -> RecurrenceSpec<'a> {
        RecurrenceSpec {
            cron_expressions: crons,
            fixed_times: fixed,
            timezone_name: tz,
            timezone_offset_minutes: offset,
        }
    }

    #[test]
    fn weekly_cron_in_kolkata() {
        let crons = vec!["0 9 * * MON".to_string()];
        let now = at("2024-01-01T00:00:00Z");
        let occ = Materializer::default().materialize(spec(&crons, &[], "Asia/Kolkata", 330), now);

        assert_eq!(occ.len(), 101);
        // 2024-01-01 is a Monday; 09:00 IST is 03:30 UTC
        assert_eq!(occ[0], at("2024-01-01T03:30:00Z"));
        assert_eq!(occ[0].weekday(), Weekday::Mon);
        for pair in occ.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::weeks(1));
        }
        assert_eq!(occ[100], at("2024-01-01T03:30:00Z") + Duration::weeks(100));
    }

    #[test]
    fn fixed_time_uses_offset() {
        let fixed = vec![local("2024-06-01T10:00:00")];
        let now = at("2024-01-01T00:00:00Z");
        let occ = Materializer::default().materialize(spec(&[], &fixed, "Asia/Kolkata", 330), now);
        assert_eq!(occ, vec![at("2024-06-01T04:30:00Z")]);
    }

    #[test]
    fn out_of_range_fixed_time_is_skipped() {
        let fixed = vec![NaiveDateTime::MAX, local("2024-06-01T10:00:00")];
        let now = at("2024-01-01T00:00:00Z");
        let occ = Materializer::default().materialize(spec(&[], &fixed, "UTC", -60), now);
        assert_eq!(occ, vec![at("2024-06-01T11:00:00Z")]);
        assert_eq!(fixed_time_to_utc(NaiveDateTime::MAX, -60), None);
    }

    #[test]
    fn past_fixed_times_are_kept() {
        let fixed = vec![local("2023-03-01T08:00:00")];
        let now = at("2024-01-01T00:00:00Z");
        let occ = Materializer::default().materialize(spec(&[], &fixed, "UTC", 0), now);
        assert_eq!(occ, vec![at("2023-03-01T08:00:00Z")]);
    }

    #[test]
    fn identical_inputs_give_identical_output() {
        let crons = vec!["*/30 * * * *".to_string(), "0 0 * * *".to_string()];
        let fixed = vec![local("2024-02-01T12:00:00")];
        let now = at("2024-01-15T10:07:13Z");
        let m = Materializer::default();
        let a = m.materialize(spec(&crons, &fixed, "Europe/Berlin", 60), now);
        let b = m.materialize(spec(&crons, &fixed, "Europe/Berlin", 60), now);
        assert_eq!(a, b);
        assert!(a.len() <= MAX_OCCURRENCES);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn duplicates_collapse() {
        // Midnight daily is a subset of every-hour
        let crons = vec!["0 * * * *".to_string(), "0 0 * * *".to_string()];
        let fixed = vec![local("2024-01-01T01:00:00")];
        let now = at("2024-01-01T00:30:00Z");
        let occ = Materializer::default().materialize(spec(&crons, &fixed, "UTC", 0), now);
        assert_eq!(occ.len(), 101);
        assert_eq!(occ[0], at("2024-01-01T01:00:00Z"));
        assert_eq!(occ[1], at("2024-01-01T02:00:00Z"));
        assert!(occ.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn malformed_expression_is_skipped() {
        let crons = vec!["not a cron".to_string(), "0 12 * * *".to_string()];
        let now = at("2024-01-01T00:00:00Z");
        let occ = Materializer::default().materialize(spec(&crons, &[], "UTC", 0), now);
        assert_eq!(occ.len(), 101);
        assert_eq!(occ[0], at("2024-01-01T12:00:00Z"));
    }

    #[test]
    fn cron_results_are_strictly_future() {
        let crons = vec!["0 12 * * *".to_string()];
        let now = at("2024-01-01T12:00:00Z");
        let occ = Materializer::new(3).materialize(spec(&crons, &[], "UTC", 0), now);
        assert_eq!(
            occ,
            vec![
                at("2024-01-02T12:00:00Z"),
                at("2024-01-03T12:00:00Z"),
                at("2024-01-04T12:00:00Z"),
            ]
        );
    }

    #[test]
    fn unknown_zone_uses_fixed_offset() {
        let crons = vec!["0 9 * * *".to_string()];
        let now = at("2024-01-01T00:00:00Z");
        let occ = Materializer::new(1).materialize(spec(&crons, &[], "Mars/Olympus", -300), now);
        // 09:00 at UTC-5 is 14:00 UTC
        assert_eq!(occ, vec![at("2024-01-01T14:00:00Z")]);
    }

    #[test]
    fn dst_transition_follows_wall_clock() {
        let crons = vec!["0 9 * * *".to_string()];
        let now = at("2024-03-09T00:00:00Z");
        let occ = Materializer::new(3).materialize(spec(&crons, &[], "America/New_York", -300), now);
        // EST (UTC-5) until 2024-03-10 02:00, then EDT (UTC-4)
        assert_eq!(occ[0], at("2024-03-09T14:00:00Z"));
        assert_eq!(occ[1], at("2024-03-10T13:00:00Z"));
        assert_eq!(occ[2], at("2024-03-11T13:00:00Z"));
    }

    #[test]
    fn horizon_is_clamped() {
        assert_eq!(Materializer::new(500).horizon(), MAX_OCCURRENCES);
        assert_eq!(Materializer::new(0).horizon(), MAX_OCCURRENCES);
        assert_eq!(Materializer::new(10).horizon(), 10);
    }

    #[test]
    fn fixed_and_cron_union_is_capped() {
        let crons = vec!["0 * * * *".to_string()];
        let fixed: Vec<NaiveDateTime> = (1..=5)
            .map(|d| NaiveDate::from_ymd_opt(2023, 12, d).unwrap().and_hms_opt(8, 0, 0).unwrap())
            .collect();
        let now = at("2024-01-01T00:00:00Z");
        let occ = Materializer::default().materialize(spec(&crons, &fixed, "UTC", 0), now);
        assert_eq!(occ.len(), 101);
        assert_eq!(occ[0], at("2023-12-01T08:00:00Z"));
        assert_eq!(occ[5], at("2024-01-01T01:00:00Z"));
    }
}
