//! Five-field cron expressions, evaluated in UTC.
//!
//! ```text
//! minute (0-59)  hour (0-23)  day-of-month (1-31)  month (1-12)  day-of-week (0-6, 0 = Sunday)
//! ```
//!
//! Each field accepts `*`, single values, ranges (`9-17`), steps (`*/15`,
//! `0-30/10`), and comma lists. When both day fields are restricted a day
//! matches if either does, as in classic cron.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use modelgrid_core::Timestamp;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("expected 5 fields, got {0}")]
    FieldCount(usize),

    #[error("{field}: cannot parse '{part}'")]
    Syntax { field: &'static str, part: String },

    #[error("{field}: {value} outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("{field}: step must be positive")]
    ZeroStep { field: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    values: BTreeSet<u32>,
    /// Written as `*` (possibly with a step); matters for the day fields.
    wildcard: bool,
}

impl Field {
    fn parse(expr: &str, name: &'static str, min: u32, max: u32) -> Result<Self, CronError> {
        let syntax = |part: &str| CronError::Syntax {
            field: name,
            part: part.to_string(),
        };
        let mut values = BTreeSet::new();
        let mut wildcard = false;

        for part in expr.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step.parse().map_err(|_| syntax(part))?;
                    if step == 0 {
                        return Err(CronError::ZeroStep { field: name });
                    }
                    (range, step)
                }
                None => (part, 1),
            };
            let (start, end) = if range == "*" {
                wildcard = true;
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                let a: u32 = a.parse().map_err(|_| syntax(part))?;
                let b: u32 = b.parse().map_err(|_| syntax(part))?;
                if a > b {
                    return Err(syntax(part));
                }
                (a, b)
            } else {
                let v: u32 = range.parse().map_err(|_| syntax(part))?;
                // `5/10` means "from 5 every 10".
                if step > 1 { (v, max) } else { (v, v) }
            };
            for value in [start, end] {
                if value < min || value > max {
                    return Err(CronError::OutOfRange {
                        field: name,
                        value,
                        min,
                        max,
                    });
                }
            }
            values.extend((start..=end).step_by(step as usize));
        }

        Ok(Self { values, wildcard })
    }

    fn contains(&self, value: u32) -> bool {
        self.values.contains(&value)
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    source: String,
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

/// Upper bound on the search for the next run; covers leap days.
const SEARCH_YEARS: i64 = 5;

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let &[minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(CronError::FieldCount(fields.len()));
        };
        Ok(Self {
            source: fields.join(" "),
            minute: Field::parse(minute, "minute", 0, 59)?,
            hour: Field::parse(hour, "hour", 0, 23)?,
            day_of_month: Field::parse(dom, "day-of-month", 1, 31)?,
            month: Field::parse(month, "month", 1, 12)?,
            day_of_week: Field::parse(dow, "day-of-week", 0, 6)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn day_matches(&self, dt: &DateTime<Utc>) -> bool {
        let dom = self.day_of_month.contains(dt.day());
        let dow = self.day_of_week.contains(dt.weekday().num_days_from_sunday());
        match (self.day_of_month.wildcard, self.day_of_week.wildcard) {
            (false, false) => dom || dow,
            _ => dom && dow,
        }
    }

    pub fn matches(&self, dt: &DateTime<Utc>) -> bool {
        self.month.contains(dt.month())
            && self.day_matches(dt)
            && self.hour.contains(dt.hour())
            && self.minute.contains(dt.minute())
    }

    /// First matching minute strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit = start + Duration::days(366 * SEARCH_YEARS);
        let mut t = start;

        while t < limit {
            if !self.month.contains(t.month()) || !self.day_matches(&t) {
                t = midnight(t)? + Duration::days(1);
                continue;
            }
            if !self.hour.contains(t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minute.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }

    /// [`next_after`](Self::next_after) on unix seconds.
    pub fn next_run(&self, after: Timestamp) -> Option<Timestamp> {
        let after = DateTime::<Utc>::from_timestamp(i64::try_from(after).ok()?, 0)?;
        self.next_after(&after)
            .and_then(|t| u64::try_from(t.timestamp()).ok())
    }
}

fn midnight(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    t.with_hour(0)?.with_minute(0)
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for CronSchedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for CronSchedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn parses_lists_ranges_and_steps() {
        let c = CronSchedule::parse("*/15 9-17 * * 1-5").unwrap();
        assert_eq!(c.minute.values.iter().copied().collect::<Vec<_>>(), [0, 15, 30, 45]);
        assert!(c.hour.contains(9) && c.hour.contains(17) && !c.hour.contains(18));
        assert!(!c.day_of_week.contains(0));

        let c = CronSchedule::parse("0,30 0-6/3 1 * *").unwrap();
        assert_eq!(c.hour.values.iter().copied().collect::<Vec<_>>(), [0, 3, 6]);
        assert_eq!(c.minute.values.len(), 2);
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert_eq!(CronSchedule::parse("* *"), Err(CronError::FieldCount(2)));
        assert!(matches!(
            CronSchedule::parse("60 * * * *"),
            Err(CronError::OutOfRange { value: 60, .. })
        ));
        assert!(matches!(
            CronSchedule::parse("*/0 * * * *"),
            Err(CronError::ZeroStep { .. })
        ));
        assert!(matches!(
            CronSchedule::parse("5-1 * * * *"),
            Err(CronError::Syntax { .. })
        ));
        assert!(CronSchedule::parse("* * * * 7").is_err());
    }

    #[test]
    fn next_run_is_strictly_later() {
        let hourly = CronSchedule::parse("0 * * * *").unwrap();
        assert_eq!(hourly.next_after(&at(2024, 1, 15, 14, 30)), Some(at(2024, 1, 15, 15, 0)));
        assert_eq!(hourly.next_after(&at(2024, 1, 15, 15, 0)), Some(at(2024, 1, 15, 16, 0)));

        let nightly = CronSchedule::parse("0 3 * * *").unwrap();
        assert_eq!(nightly.next_after(&at(2024, 1, 15, 14, 30)), Some(at(2024, 1, 16, 3, 0)));
    }

    #[test]
    fn crosses_month_and_year_boundaries() {
        let c = CronSchedule::parse("30 2 1 * *").unwrap();
        assert_eq!(c.next_after(&at(2024, 12, 20, 0, 0)), Some(at(2025, 1, 1, 2, 30)));

        let leap = CronSchedule::parse("0 0 29 2 *").unwrap();
        assert_eq!(leap.next_after(&at(2024, 3, 1, 0, 0)), Some(at(2028, 2, 29, 0, 0)));

        let never = CronSchedule::parse("0 0 31 2 *").unwrap();
        assert_eq!(never.next_after(&at(2024, 1, 1, 0, 0)), None);
    }

    #[test]
    fn restricted_day_fields_are_either_or() {
        // The 13th of the month, or any Friday.
        let c = CronSchedule::parse("0 12 13 * 5").unwrap();
        // 2024-09-06 is a Friday.
        assert_eq!(c.next_after(&at(2024, 9, 1, 0, 0)), Some(at(2024, 9, 6, 12, 0)));
        assert!(c.matches(&at(2024, 9, 13, 12, 0)));
        assert!(!c.matches(&at(2024, 9, 12, 12, 0)));
    }

    #[test]
    fn unix_seconds_round_trip_through_next_run() {
        let c = CronSchedule::parse("*/5 * * * *").unwrap();
        let base = at(2024, 1, 1, 0, 2).timestamp() as u64;
        assert_eq!(c.next_run(base), Some(at(2024, 1, 1, 0, 5).timestamp() as u64));
    }

    #[test]
    fn serializes_as_its_expression() {
        let c: CronSchedule = "0 3 * * 1".parse().unwrap();
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"0 3 * * 1\"");
        let back: CronSchedule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
        assert!(serde_json::from_str::<CronSchedule>("\"bogus\"").is_err());
    }
}
