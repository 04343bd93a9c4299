use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::errors::{AgentError, AgentResult};

const QUERY_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// A date as the Panchang API expects it: a wall-clock reading with whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryDate(NaiveDateTime);

impl QueryDate {
    /// Parse whatever the model supplied as a date.
    ///
    /// Accepts RFC 3339 instants, naive date-times and plain dates. The reading is
    /// kept as written: an offset is dropped rather than converted, so the calendar
    /// date never shifts.
    pub fn parse(input: &str) -> AgentResult<Self> {
        let input = input.trim();

        if let Ok(instant) = DateTime::parse_from_rfc3339(input) {
            return Ok(Self(instant.naive_local()));
        }
        for format in NAIVE_FORMATS {
            if let Ok(datetime) = NaiveDateTime::parse_from_str(input, format) {
                return Ok(Self(datetime));
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
            return Ok(Self(date.and_time(chrono::NaiveTime::MIN)));
        }

        Err(AgentError::InvalidParameters(format!(
            "Could not interpret '{}' as a date, expected an ISO 8601 date such as 2024-01-15",
            input
        )))
    }

    /// `YYYY-MM-DDTHH:MM:SS`, sub-second precision truncated
    pub fn to_query(&self) -> String {
        self.0.format(QUERY_FORMAT).to_string()
    }

    /// `YYYY-MM-DD`
    pub fn calendar_date(&self) -> String {
        self.0.date().format("%Y-%m-%d").to_string()
    }
}

impl From<NaiveDateTime> for QueryDate {
    fn from(value: NaiveDateTime) -> Self {
        Self(value)
    }
}

/// Result of the `today` tool
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayInfo {
    pub date: String,
    pub full_date: String,
    pub day: u32,
    pub month: u32,
    pub year: i32,
    pub day_of_week: String,
}

impl TodayInfo {
    /// Describe the UTC calendar day containing `now`
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            date: now.format("%Y-%m-%d").to_string(),
            full_date: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            day: now.day(),
            month: now.month(),
            year: now.year(),
            day_of_week: now.format("%A").to_string(),
        }
    }

    pub fn now() -> Self {
        Self::at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_parse_plain_date() {
        let date = QueryDate::parse("2024-01-15").unwrap();
        assert_eq!(date.to_query(), "2024-01-15T00:00:00");
        assert_eq!(date.calendar_date(), "2024-01-15");
    }

    #[test]
    fn test_parse_truncates_fractional_seconds() {
        let date = QueryDate::parse("2024-03-10T05:06:07.891Z").unwrap();
        assert_eq!(date.to_query(), "2024-03-10T05:06:07");

        let date = QueryDate::parse("2024-03-10T05:06:07.123456").unwrap();
        assert_eq!(date.to_query(), "2024-03-10T05:06:07");
    }

    #[test]
    fn test_parse_keeps_wall_clock_of_offsets() {
        let date = QueryDate::parse("2024-01-15T02:30:00+05:30").unwrap();
        assert_eq!(date.to_query(), "2024-01-15T02:30:00");
        assert_eq!(date.calendar_date(), "2024-01-15");
    }

    #[test]
    fn test_parse_other_layouts() {
        assert_eq!(
            QueryDate::parse(" 2024-01-15 18:45:00 ").unwrap().to_query(),
            "2024-01-15T18:45:00"
        );
        assert_eq!(
            QueryDate::parse("2024-01-15T18:45").unwrap().to_query(),
            "2024-01-15T18:45:00"
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for input in ["", "tomorrow", "2024-13-01", "15/01/2024"] {
            let error = QueryDate::parse(input).unwrap_err();
            assert!(matches!(error, AgentError::InvalidParameters(_)), "{input}");
        }
    }

    #[test]
    fn test_calendar_date_ignores_time_of_day() {
        for time in ["00:00:00", "06:15:00", "12:00:00.5", "23:59:59.999"] {
            let date = QueryDate::parse(&format!("2023-11-05T{}", time)).unwrap();
            assert_eq!(date.calendar_date(), "2023-11-05");
        }
    }

    #[test]
    fn test_today_at_known_instant() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 10, 20, 30).unwrap();
        let today = TodayInfo::at(now);

        assert_eq!(today.date, "2024-01-15");
        assert_eq!(today.full_date, "2024-01-15T10:20:30.000Z");
        assert_eq!(today.day, 15);
        assert_eq!(today.month, 1);
        assert_eq!(today.year, 2024);
        assert_eq!(today.day_of_week, "Monday");
    }

    #[test]
    fn test_today_fields_agree_across_a_leap_year() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 23, 0, 0).unwrap();
        let weekdays = [
            "Monday",
            "Tuesday",
            "Wednesday",
            "Thursday",
            "Friday",
            "Saturday",
            "Sunday",
        ];

        for offset in 0..366 {
            let now = start + Duration::days(offset);
            let today = TodayInfo::at(now);

            assert!((1..=12).contains(&today.month));
            assert_eq!(
                today.date,
                format!("{:04}-{:02}-{:02}", today.year, today.month, today.day)
            );
            // 2024-01-01 was a Monday
            assert_eq!(today.day_of_week, weekdays[(offset % 7) as usize]);
        }
    }
}
