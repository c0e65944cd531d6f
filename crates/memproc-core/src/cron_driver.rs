//! Cron Driver (spec.md §4.7 scheduled resets, §6 cron format).
//!
//! Accepts a standard five-field cron expression (minute, hour,
//! day-of-month, month, day-of-week) in UTC and evaluates the next
//! occurrence. The `cron` crate parses six/seven-field expressions with
//! seconds leading, so a fixed `0` seconds field is prefixed before
//! delegating.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

use crate::error::MemprocError;

pub struct CronDriver {
    schedule: Schedule,
}

impl CronDriver {
    /// Parses a standard five-field cron expression.
    pub fn parse(expr: &str) -> Result<Self, MemprocError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(MemprocError::Configuration(format!(
                "cron expression '{expr}' must have exactly 5 fields (minute hour dom month dow), got {}",
                fields.len()
            )));
        }
        let with_seconds = format!("0 {expr}");
        let schedule = Schedule::from_str(&with_seconds)
            .map_err(|e| MemprocError::Configuration(format!("invalid cron expression '{expr}': {e}")))?;
        Ok(Self { schedule })
    }

    /// Returns the next fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Whether a scheduled reset is due: the next occurrence after
    /// `last_reset` is at or before `now`.
    pub fn is_due(&self, last_reset: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let baseline = last_reset.unwrap_or_else(|| now - chrono::Duration::days(1));
        match self.next_after(baseline) {
            Some(next) => next <= now,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rejects_non_five_field_expression() {
        assert!(CronDriver::parse("* * * *").is_err());
        assert!(CronDriver::parse("0 * * * * *").is_err());
    }

    #[test]
    fn computes_next_midnight() {
        let driver = CronDriver::parse("0 0 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        let next = driver.next_after(after).unwrap();
        assert_eq!(next.time().to_string(), "00:00:00");
        assert!(next > after);
    }

    #[test]
    fn is_due_without_prior_reset() {
        let driver = CronDriver::parse("0 0 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 7, 29, 0, 0, 1).unwrap();
        assert!(driver.is_due(None, now));
    }
}
