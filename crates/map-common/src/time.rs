//! Time handling utilities for product timestamps.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Parse a timestamp as written in products and on the command line.
///
/// Supports, in order:
/// - RFC 3339: "2024-01-15T12:00:00Z"
/// - Without timezone (assumed UTC): "2024-01-15T12:00:00"
/// - Compact: "202401151200" and "20240115T120000"
/// - Date only: "2024-01-15"
pub fn parse_time(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y%m%d%H%M", "%Y%m%dT%H%M%S"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    Err(TimeParseError::InvalidFormat(s.to_string()))
}

/// Compact ISO form used in output nodes: "20240115T120000".
pub fn to_iso_string(t: &DateTime<Utc>) -> String {
    t.format("%Y%m%dT%H%M%S").to_string()
}

/// A closed time interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimePeriod {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The interval `[t - before, t + after]`, both in minutes.
    pub fn around(t: DateTime<Utc>, before_minutes: i64, after_minutes: i64) -> Self {
        Self {
            start: t - Duration::minutes(before_minutes),
            end: t + Duration::minutes(after_minutes),
        }
    }

    pub fn contains(&self, dt: &DateTime<Utc>) -> bool {
        dt >= &self.start && dt <= &self.end
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimeParseError {
    #[error("Invalid time format: {0}")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(parse_time("2024-01-15T12:00:00Z").unwrap(), expected);
        assert_eq!(parse_time("2024-01-15T12:00:00").unwrap(), expected);
        assert_eq!(parse_time("202401151200").unwrap(), expected);
        assert_eq!(parse_time("20240115T120000").unwrap(), expected);

        let date = parse_time("2024-01-15").unwrap();
        assert_eq!(date.day(), 15);
        assert_eq!(date.hour(), 0);

        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn test_period_around() {
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let period = TimePeriod::around(t, 60, 30);
        assert_eq!(to_iso_string(&period.start), "20240115T110000");
        assert_eq!(to_iso_string(&period.end), "20240115T123000");
        assert!(period.contains(&t));
    }
}
