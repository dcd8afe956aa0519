use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub fn format_rfc3339(value: OffsetDateTime) -> String {
    value
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Converts a Unix epoch (seconds, possibly fractional) to RFC 3339 UTC.
pub fn epoch_seconds_rfc3339(seconds: f64) -> Option<String> {
    if !seconds.is_finite() {
        return None;
    }
    let nanos = (seconds * 1_000_000_000.0) as i128;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .map(format_rfc3339)
}
