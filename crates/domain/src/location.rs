use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::DomainResult;
use crate::error::DomainError;
use crate::util;

/// Fallback chains for heterogeneous client payloads (OwnTracks and
/// generic trackers). The first field that resolves to a usable value
/// wins; null and empty-string values fall through to the next field.
const DEVICE_ID_FIELDS: &[&str] = &["device_id", "tid", "topic"];
const LATITUDE_FIELDS: &[&str] = &["lat", "latitude"];
const LONGITUDE_FIELDS: &[&str] = &["lon", "longitude"];
const ACCURACY_FIELDS: &[&str] = &["accuracy", "acc"];
const PROVIDER_FIELDS: &[&str] = &["provider", "t", "source"];

const STATUS_TYPE: &str = "status";

pub const UNKNOWN_DEVICE_ID: &str = "unknown";

/// One ingested location report. Immutable once appended to the store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LocationRecord {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: String,
    pub provider: String,
    pub timestamp_iso: String,
    /// Client-supplied timestamp value as sent, kept for audit.
    pub timestamp_raw: Option<String>,
    /// Server receipt time, never client-supplied.
    pub received_at: String,
    /// Full original body serialized verbatim, for forensic replay.
    pub raw_payload: String,
}

/// Normalizer output before the caller stamps `received_at`.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedLocation {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: String,
    pub provider: String,
    pub timestamp_iso: String,
    pub timestamp_raw: Option<String>,
    pub raw_payload: String,
}

impl NormalizedLocation {
    pub fn into_record(self, received_at: String) -> LocationRecord {
        LocationRecord {
            device_id: self.device_id,
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy: self.accuracy,
            provider: self.provider,
            timestamp_iso: self.timestamp_iso,
            timestamp_raw: self.timestamp_raw,
            received_at,
            raw_payload: self.raw_payload,
        }
    }
}

/// Classification of one client payload.
#[derive(Clone, Debug, PartialEq)]
pub enum PayloadKind {
    Position(NormalizedLocation),
    /// Status/heartbeat message; acknowledged but never stored.
    Status,
}

/// A row as read back from the append-only store. Columns stay exactly
/// as stored; raw query endpoints serialize these rows as-is.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RawRecord {
    pub device_id: String,
    pub latitude: String,
    pub longitude: String,
    pub accuracy: String,
    pub provider: String,
    pub timestamp_iso: String,
    pub timestamp_raw: String,
    pub received_at: String,
    pub raw_json: String,
}

impl From<&LocationRecord> for RawRecord {
    fn from(record: &LocationRecord) -> Self {
        Self {
            device_id: record.device_id.clone(),
            latitude: record.latitude.to_string(),
            longitude: record.longitude.to_string(),
            accuracy: record.accuracy.clone(),
            provider: record.provider.clone(),
            timestamp_iso: record.timestamp_iso.clone(),
            timestamp_raw: record.timestamp_raw.clone().unwrap_or_default(),
            received_at: record.received_at.clone(),
            raw_json: record.raw_payload.clone(),
        }
    }
}

/// Maps an arbitrary decoded body onto the canonical record shape.
///
/// A body that is not a JSON object resolves no fields and is rejected
/// at coordinate validation below, not at parse time. Pure transform:
/// `now` only feeds the timestamp fallback, and `received_at` is
/// stamped by the caller.
pub fn normalize_payload(payload: &Value, now: OffsetDateTime) -> DomainResult<PayloadKind> {
    let empty = Map::new();
    let body = payload.as_object().unwrap_or(&empty);

    if body.get("_type").and_then(Value::as_str) == Some(STATUS_TYPE) {
        return Ok(PayloadKind::Status);
    }

    let device_id =
        first_string(body, DEVICE_ID_FIELDS).unwrap_or_else(|| UNKNOWN_DEVICE_ID.to_string());
    let latitude = first_f64(body, LATITUDE_FIELDS);
    let longitude = first_f64(body, LONGITUDE_FIELDS);
    let accuracy = first_string(body, ACCURACY_FIELDS).unwrap_or_default();
    let provider = first_string(body, PROVIDER_FIELDS).unwrap_or_default();
    let (timestamp_iso, timestamp_raw) = resolve_timestamp(body, now);

    let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
        tracing::debug!(device_id = %device_id, "rejected payload with bad lat/lon");
        return Err(DomainError::BadCoordinates);
    };

    Ok(PayloadKind::Position(NormalizedLocation {
        device_id,
        latitude,
        longitude,
        accuracy,
        provider,
        timestamp_iso,
        timestamp_raw,
        raw_payload: payload.to_string(),
    }))
}

/// ISO string timestamps are used verbatim; a numeric OwnTracks `tst`
/// is converted from Unix epoch; otherwise the server clock stands in.
/// The raw client value is kept untouched alongside.
fn resolve_timestamp(body: &Map<String, Value>, now: OffsetDateTime) -> (String, Option<String>) {
    if let Some(Value::String(stamp)) = body.get("timestamp") {
        return (stamp.clone(), Some(stamp.clone()));
    }

    if let Some(Value::Number(stamp)) = body.get("tst") {
        if let Some(iso) = stamp.as_f64().and_then(util::epoch_seconds_rfc3339) {
            return (iso, Some(stamp.to_string()));
        }
    }

    (util::format_rfc3339(now), None)
}

fn first_string(body: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .find_map(|field| body.get(*field).and_then(coerce_string))
}

fn first_f64(body: &Map<String, Value>, fields: &[&str]) -> Option<f64> {
    fields
        .iter()
        .find_map(|field| body.get(*field).and_then(coerce_f64))
}

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Coordinates arrive as JSON numbers or numeric strings; both must
/// come out as finite floats.
fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|parsed| parsed.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("timestamp")
    }

    fn position(payload: Value) -> NormalizedLocation {
        match normalize_payload(&payload, sample_now()).expect("normalize") {
            PayloadKind::Position(location) => location,
            PayloadKind::Status => panic!("expected position payload"),
        }
    }

    #[test]
    fn owntracks_payload_normalizes() {
        let location = position(json!({
            "_type": "location",
            "tid": "car1",
            "lat": "40.1",
            "lon": "-8.6",
            "tst": 1_700_000_000,
            "acc": 5,
            "t": "u"
        }));
        assert_eq!(location.device_id, "car1");
        assert_eq!(location.latitude, 40.1);
        assert_eq!(location.longitude, -8.6);
        assert_eq!(location.accuracy, "5");
        assert_eq!(location.provider, "u");
        assert_eq!(location.timestamp_iso, "2023-11-14T22:13:20Z");
        assert_eq!(location.timestamp_raw.as_deref(), Some("1700000000"));
    }

    #[test]
    fn explicit_device_id_wins_over_aliases() {
        let location = position(json!({
            "device_id": "bus-7",
            "tid": "xx",
            "topic": "owntracks/user/phone",
            "lat": 1.0,
            "lon": 2.0
        }));
        assert_eq!(location.device_id, "bus-7");
    }

    #[test]
    fn topic_is_used_when_ids_are_absent() {
        let location = position(json!({
            "topic": "owntracks/user/phone",
            "lat": 1.0,
            "lon": 2.0
        }));
        assert_eq!(location.device_id, "owntracks/user/phone");
    }

    #[test]
    fn empty_device_id_falls_through_the_chain() {
        let location = position(json!({
            "device_id": "",
            "tid": "t1",
            "lat": 1.0,
            "lon": 2.0
        }));
        assert_eq!(location.device_id, "t1");
    }

    #[test]
    fn device_id_defaults_to_unknown() {
        let location = position(json!({ "lat": 1.0, "lon": 2.0 }));
        assert_eq!(location.device_id, UNKNOWN_DEVICE_ID);
    }

    #[test]
    fn zero_coordinates_are_valid() {
        let location = position(json!({ "tid": "eq", "lat": 0, "lon": 0.0 }));
        assert_eq!(location.latitude, 0.0);
        assert_eq!(location.longitude, 0.0);
    }

    #[test]
    fn long_form_coordinate_fields_are_accepted() {
        let location = position(json!({ "latitude": "51.5", "longitude": "-0.1" }));
        assert_eq!(location.latitude, 51.5);
        assert_eq!(location.longitude, -0.1);
    }

    #[test]
    fn missing_latitude_is_rejected() {
        let result = normalize_payload(&json!({ "lon": "-8.6" }), sample_now());
        assert!(matches!(result, Err(DomainError::BadCoordinates)));
    }

    #[test]
    fn non_numeric_latitude_is_rejected() {
        let result = normalize_payload(&json!({ "lat": "bad", "lon": "-8.6" }), sample_now());
        assert!(matches!(result, Err(DomainError::BadCoordinates)));
    }

    #[test]
    fn non_finite_coordinates_are_rejected() {
        let result = normalize_payload(&json!({ "lat": "inf", "lon": "1" }), sample_now());
        assert!(matches!(result, Err(DomainError::BadCoordinates)));
    }

    #[test]
    fn non_object_bodies_fail_coordinate_validation() {
        for payload in [json!([1, 2]), json!("position"), json!(42), Value::Null] {
            let result = normalize_payload(&payload, sample_now());
            assert!(matches!(result, Err(DomainError::BadCoordinates)));
        }
    }

    #[test]
    fn status_messages_are_ignored() {
        let outcome = normalize_payload(&json!({ "_type": "status" }), sample_now());
        assert_eq!(outcome.expect("normalize"), PayloadKind::Status);
    }

    #[test]
    fn string_timestamp_is_used_verbatim() {
        let location = position(json!({
            "tid": "car1",
            "lat": 1.0,
            "lon": 2.0,
            "timestamp": "2024-05-01T12:00:00+02:00",
            "tst": 1_700_000_000
        }));
        assert_eq!(location.timestamp_iso, "2024-05-01T12:00:00+02:00");
        assert_eq!(
            location.timestamp_raw.as_deref(),
            Some("2024-05-01T12:00:00+02:00")
        );
    }

    #[test]
    fn server_time_stands_in_when_no_timestamp_is_sent() {
        let location = position(json!({ "tid": "car1", "lat": 1.0, "lon": 2.0 }));
        assert_eq!(location.timestamp_iso, "2023-11-14T22:13:20Z");
        assert_eq!(location.timestamp_raw, None);
    }

    #[test]
    fn accuracy_and_provider_fall_back_to_aliases() {
        let location = position(json!({
            "lat": 1.0,
            "lon": 2.0,
            "acc": "12.5",
            "source": "gps"
        }));
        assert_eq!(location.accuracy, "12.5");
        assert_eq!(location.provider, "gps");
    }

    #[test]
    fn raw_payload_round_trips_the_body() {
        let payload = json!({ "tid": "car1", "lat": 1.0, "lon": 2.0, "extra": {"nested": true} });
        let location = position(payload.clone());
        let replayed: Value = serde_json::from_str(&location.raw_payload).expect("raw payload");
        assert_eq!(replayed, payload);
    }

    #[test]
    fn raw_record_renders_missing_timestamp_as_empty() {
        let record = position(json!({ "lat": 1.0, "lon": 2.0 }))
            .into_record("2024-01-01T00:00:00Z".to_string());
        let row = RawRecord::from(&record);
        assert_eq!(row.timestamp_raw, "");
        assert_eq!(row.latitude, "1");
        assert_eq!(row.received_at, "2024-01-01T00:00:00Z");
    }
}
