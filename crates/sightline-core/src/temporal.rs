//! Human-readable relative timestamps for feed entries.

use chrono::{DateTime, Utc};

/// Format `ts` relative to `now`.
///
/// - under a minute: `just now`
/// - under an hour: `5m ago`
/// - same day (less than 24h): `1hr ago` / `3hrs ago`
/// - one day: `yesterday at 02:30 PM`
/// - older: `Jan 15, 2024, 09:45 AM`
///
/// Timestamps in the future count as `just now`.
pub fn format_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(ts);
    let seconds = diff.num_seconds();

    if seconds < 60 {
        return "just now".to_string();
    }
    if seconds < 3600 {
        return format!("{}m ago", seconds / 60);
    }
    match diff.num_days() {
        0 => {
            let hours = seconds / 3600;
            if hours == 1 {
                "1hr ago".to_string()
            } else {
                format!("{}hrs ago", hours)
            }
        }
        1 => format!("yesterday at {}", ts.format("%I:%M %p")),
        _ => ts.format("%b %d, %Y, %I:%M %p").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 18, 0, 0).unwrap()
    }

    #[test]
    fn test_just_now() {
        assert_eq!(format_relative(now() - Duration::seconds(59), now()), "just now");
        assert_eq!(format_relative(now() + Duration::minutes(5), now()), "just now");
    }

    #[test]
    fn test_minutes() {
        assert_eq!(format_relative(now() - Duration::minutes(5), now()), "5m ago");
        assert_eq!(format_relative(now() - Duration::seconds(3599), now()), "59m ago");
    }

    #[test]
    fn test_hours() {
        assert_eq!(format_relative(now() - Duration::minutes(61), now()), "1hr ago");
        assert_eq!(format_relative(now() - Duration::hours(23), now()), "23hrs ago");
    }

    #[test]
    fn test_yesterday() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 0).unwrap();
        assert_eq!(format_relative(ts, now()), "yesterday at 02:30 PM");
    }

    #[test]
    fn test_older_dates() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 9, 45, 0).unwrap();
        assert_eq!(format_relative(ts, now()), "Jan 15, 2024, 09:45 AM");
    }
}
