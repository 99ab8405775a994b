//! Timestamp utilities

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Format a duration as fractional seconds with the given precision
///
/// Used for diagnostics values such as `overallVerificationDuration`.
pub fn format_secs(duration: Duration, precision: usize) -> String {
    format!("{:.*}", precision, duration.as_secs_f64())
}

/// Timestamp safe for use inside a file name (`:` replaced by `-`)
pub fn file_stamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%dT%H-%M-%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_millis_to_duration() {
        assert_eq!(millis_to_duration(0), Duration::ZERO);
        assert_eq!(millis_to_duration(1000), Duration::from_secs(1));
        assert_eq!(millis_to_duration(10_000), Duration::from_secs(10));
    }

    #[test]
    fn test_format_secs_precision() {
        assert_eq!(format_secs(Duration::from_millis(1234), 2), "1.23");
        assert_eq!(format_secs(Duration::from_secs(10), 1), "10.0");
    }

    #[test]
    fn test_file_stamp_has_no_colons() {
        let ts = Utc.with_ymd_and_hms(2025, 9, 1, 12, 30, 5).unwrap();
        let stamp = file_stamp(&ts);
        assert_eq!(stamp, "2025-09-01T12-30-05Z");
        assert!(!stamp.contains(':'));
    }
}
