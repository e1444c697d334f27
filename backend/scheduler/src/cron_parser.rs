/// Cron expression validation and normalization.
///
/// Accepts classic 5-field (min hour dom mon dow) syntax and the 6/7-field
/// seconds-first syntax of the `cron` crate. 5-field expressions are
/// validated, get a `0` seconds field, and have numeric weekdays rewritten
/// to names (classic cron counts Sunday as 0 or 7, the `cron` crate as 1).
use std::str::FromStr;

use cadence_core::{CadenceError, Result};
use cron::Schedule;

const VALID_RANGES: &[(u32, u32)] = &[
    (0, 59), // minute
    (0, 23), // hour
    (1, 31), // day of month
    (1, 12), // month
    (0, 7),  // day of week (0 and 7 both = Sunday)
];

const WEEKDAYS: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

fn parse_error(expr: &str, reason: impl Into<String>) -> CadenceError {
    CadenceError::RecurrenceParse {
        expression: expr.to_string(),
        reason: reason.into(),
    }
}

/// Normalize an expression into the seconds-first form.
pub fn normalize_cron(expr: &str) -> Result<String> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    match parts.len() {
        5 => {
            for (i, part) in parts.iter().enumerate() {
                validate_field(part, VALID_RANGES[i].0, VALID_RANGES[i].1).map_err(|reason| {
                    parse_error(expr, format!("field {} ('{}') invalid: {}", i + 1, part, reason))
                })?;
            }
            Ok(format!(
                "0 {} {} {} {} {}",
                parts[0],
                parts[1],
                parts[2],
                parts[3],
                rewrite_weekdays(parts[4])
            ))
        }
        6 | 7 => Ok(parts.join(" ")),
        n => Err(parse_error(expr, format!("expected 5, 6 or 7 fields, got {n}"))),
    }
}

/// Parse an expression into a `cron::Schedule`.
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let normalized = normalize_cron(expr)?;
    Schedule::from_str(&normalized).map_err(|e| parse_error(expr, e.to_string()))
}

/// Check whether a cron field is syntactically valid within [min, max].
/// Named values (`MON`, `JAN`) are left for the `cron` crate to judge.
fn validate_field(field: &str, min: u32, max: u32) -> std::result::Result<(), String> {
    if field == "*" || field == "?" {
        return Ok(());
    }
    let range_part = if let Some((r, s)) = field.split_once('/') {
        let step: u32 = s.parse().map_err(|_| format!("step '{s}' not numeric"))?;
        if step == 0 {
            return Err("step must be > 0".to_string());
        }
        r
    } else {
        field
    };

    for part in range_part.split(',') {
        if part == "*" {
            continue;
        }
        if let Some((lo, hi)) = part.split_once('-') {
            let (Some(lo), Some(hi)) = (numeric(lo)?, numeric(hi)?) else {
                continue;
            };
            if lo > hi || lo < min || hi > max {
                return Err(format!("range {lo}-{hi} out of [{min}, {max}]"));
            }
        } else if let Some(v) = numeric(part)? {
            if v < min || v > max {
                return Err(format!("value {v} out of [{min}, {max}]"));
            }
        }
    }
    Ok(())
}

/// `Ok(None)` for alphabetic names, `Err` for anything else non-numeric.
fn numeric(token: &str) -> std::result::Result<Option<u32>, String> {
    if !token.is_empty() && token.chars().all(|c| c.is_ascii_alphabetic()) {
        return Ok(None);
    }
    token
        .parse()
        .map(Some)
        .map_err(|_| format!("'{token}' not numeric"))
}

fn weekday_name(token: &str) -> String {
    match token.parse::<usize>() {
        Ok(n) if n < WEEKDAYS.len() => WEEKDAYS[n].to_string(),
        _ => token.to_string(),
    }
}

/// Rewrite classic numeric weekdays (`1-5`, `0`, `6,0`) to names.
fn rewrite_weekdays(field: &str) -> String {
    field
        .split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((r, s)) => (r, Some(s)),
                None => (part, None),
            };
            let rewritten = if range == "*" || range == "?" {
                range.to_string()
            } else if let Some((lo, hi)) = range.split_once('-') {
                match (lo.parse::<usize>(), hi.parse::<usize>(), step) {
                    // A range ending on 7 wraps past Saturday in the named form
                    (Ok(0), Ok(7), None) => "SUN-SAT".to_string(),
                    (Ok(7), Ok(7), None) => "SUN".to_string(),
                    (Ok(lo), Ok(7), None) => format!("{}-SAT,SUN", weekday_name(&lo.to_string())),
                    _ => format!("{}-{}", weekday_name(lo), weekday_name(hi)),
                }
            } else {
                weekday_name(range)
            };
            match step {
                Some(s) => format!("{rewritten}/{s}"),
                None => rewritten,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
