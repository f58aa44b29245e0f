//! Wire timestamp format.
//!
//! Every timestamp crossing the wire is UTC text in `YYYY-MM-DD HH:MM:SS`.
//! Values that do not match that exact format fall back to "now" rather than
//! failing the sync.

use chrono::{DateTime, NaiveDateTime, Utc};

/// `strftime` pattern of wire timestamps.
pub const WIRE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format Unix milliseconds as a wire timestamp (sub-second precision is dropped).
pub fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_else(Utc::now)
        .format(WIRE_FORMAT)
        .to_string()
}

/// Format Unix seconds as a wire timestamp.
pub fn format_seconds(seconds: i64) -> String {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .unwrap_or_else(Utc::now)
        .format(WIRE_FORMAT)
        .to_string()
}

/// Parse a wire timestamp into Unix milliseconds.
pub fn parse_millis(value: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(value.trim(), WIRE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Parse a wire timestamp into Unix seconds.
pub fn parse_seconds(value: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(value.trim(), WIRE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc().timestamp())
}

/// Parse an optional wire timestamp, falling back to the current time.
pub fn parse_millis_or_now(value: Option<&str>) -> i64 {
    value
        .and_then(parse_millis)
        .unwrap_or_else(|| Utc::now().timestamp_millis())
}

/// Parse an optional wire timestamp in seconds, falling back to the current time.
pub fn parse_seconds_or_now(value: Option<&str>) -> i64 {
    value
        .and_then(parse_seconds)
        .unwrap_or_else(|| Utc::now().timestamp())
}

/// Current time as a wire timestamp.
pub fn now() -> String {
    Utc::now().format(WIRE_FORMAT).to_string()
}

/// Truncate Unix milliseconds to whole seconds.
pub const fn truncate_to_seconds(millis: i64) -> i64 {
    millis - millis.rem_euclid(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_and_parse_wire_timestamp() {
        // 2024-03-01 12:30:45 UTC
        let millis = 1_709_296_245_123;
        let text = format_millis(millis);
        assert_eq!(text, "2024-03-01 12:30:45");
        assert_eq!(parse_millis(&text), Some(1_709_296_245_000));
        assert_eq!(parse_seconds(&text), Some(1_709_296_245));
        assert_eq!(format_seconds(1_709_296_245), text);
    }

    #[test]
    fn rejects_other_formats() {
        assert_eq!(parse_millis("2024-03-01T12:30:45Z"), None);
        assert_eq!(parse_millis("2024-03-01"), None);
        assert_eq!(parse_millis("garbage"), None);
    }

    #[test]
    fn unparseable_values_fall_back_to_now() {
        let before = Utc::now().timestamp_millis();
        let parsed = parse_millis_or_now(Some("not a date"));
        let after = Utc::now().timestamp_millis();
        assert!(parsed >= before && parsed <= after);

        let missing = parse_millis_or_now(None);
        assert!(missing >= before);
    }

    #[test]
    fn truncates_to_whole_seconds() {
        assert_eq!(truncate_to_seconds(1_999), 1_000);
        assert_eq!(truncate_to_seconds(2_000), 2_000);
    }
}
