use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::location::RawRecord;

/// Latest known position for one device, with coordinates coerced back
/// to numbers. `None` coordinates mean "unknown position", never
/// absence of the device.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DevicePosition {
    pub device_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: String,
    pub provider: String,
    pub timestamp_iso: String,
    pub timestamp_raw: String,
    pub received_at: String,
    pub raw_json: String,
}

impl From<&RawRecord> for DevicePosition {
    fn from(row: &RawRecord) -> Self {
        let latitude = row.latitude.parse::<f64>().ok();
        let longitude = row.longitude.parse::<f64>().ok();
        // Half a coordinate pair is still an unknown position.
        let (latitude, longitude) = match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => (Some(latitude), Some(longitude)),
            _ => (None, None),
        };
        Self {
            device_id: row.device_id.clone(),
            latitude,
            longitude,
            accuracy: row.accuracy.clone(),
            provider: row.provider.clone(),
            timestamp_iso: row.timestamp_iso.clone(),
            timestamp_raw: row.timestamp_raw.clone(),
            received_at: row.received_at.clone(),
            raw_json: row.raw_json.clone(),
        }
    }
}

/// Single forward pass in arrival order; the last row per device wins
/// regardless of embedded client timestamps. The sorted map keys give
/// API responses a deterministic device order.
pub fn latest_positions(rows: &[RawRecord]) -> BTreeMap<String, DevicePosition> {
    let mut latest = BTreeMap::new();
    for row in rows {
        latest.insert(row.device_id.clone(), DevicePosition::from(row));
    }
    latest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(device_id: &str, latitude: &str, longitude: &str) -> RawRecord {
        RawRecord {
            device_id: device_id.to_string(),
            latitude: latitude.to_string(),
            longitude: longitude.to_string(),
            ..RawRecord::default()
        }
    }

    #[test]
    fn last_row_wins_per_device() {
        let rows = vec![
            row("car1", "40.1", "-8.6"),
            row("car2", "41.0", "-8.0"),
            row("car1", "40.2", "-8.7"),
        ];
        let latest = latest_positions(&rows);
        assert_eq!(latest.len(), 2);
        let car1 = &latest["car1"];
        assert_eq!(car1.latitude, Some(40.2));
        assert_eq!(car1.longitude, Some(-8.7));
    }

    #[test]
    fn unparseable_coordinates_are_kept_as_unknown() {
        let rows = vec![row("ghost", "not-a-number", "-8.6")];
        let latest = latest_positions(&rows);
        let ghost = &latest["ghost"];
        assert_eq!(ghost.latitude, None);
        assert_eq!(ghost.longitude, None);
    }

    #[test]
    fn devices_enumerate_in_sorted_order() {
        let rows = vec![
            row("delta", "1", "1"),
            row("alpha", "2", "2"),
            row("charlie", "3", "3"),
        ];
        let ids: Vec<_> = latest_positions(&rows).into_keys().collect();
        assert_eq!(ids, ["alpha", "charlie", "delta"]);
    }

    #[test]
    fn empty_history_reduces_to_nothing() {
        assert!(latest_positions(&[]).is_empty());
    }
}
