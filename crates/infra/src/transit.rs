use std::fs;
use std::path::Path;

use serde_json::{Map, Number, Value};

/// Markers the stops table uses for a truthy `approximate` flag.
const TRUTHY_MARKERS: &[&str] = &["1", "true", "True"];

/// Passthrough of the externally managed route definitions document.
/// Absent or unreadable input serves as an empty list.
pub fn load_routes(path: &Path) -> Value {
    let Ok(text) = fs::read_to_string(path) else {
        return Value::Array(Vec::new());
    };
    serde_json::from_str(&text).unwrap_or_else(|_| Value::Array(Vec::new()))
}

/// Converts the externally managed stops table to JSON rows. Latitude
/// and longitude are coerced to numbers (rows that fail are skipped)
/// and the `approximate` marker becomes a boolean; other columns pass
/// through as strings.
pub fn load_stops(path: &Path) -> Vec<Value> {
    let mut reader = match csv::Reader::from_path(path) {
        Ok(reader) => reader,
        Err(err) => {
            tracing::warn!(error = %err, path = %path.display(), "stops table unavailable");
            return Vec::new();
        }
    };
    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(err) => {
            tracing::warn!(error = %err, "stops table has no readable header");
            return Vec::new();
        }
    };

    let mut stops = Vec::new();
    for row in reader.records() {
        let Ok(row) = row else {
            continue;
        };
        let mut stop = Map::new();
        for (name, value) in headers.iter().zip(row.iter()) {
            stop.insert(name.to_string(), Value::String(value.to_string()));
        }

        let latitude = parse_number(stop.get("lat"));
        let longitude = parse_number(stop.get("lon"));
        let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
            tracing::warn!("skipping stop row with invalid lat/lon");
            continue;
        };
        stop.insert("lat".to_string(), latitude);
        stop.insert("lon".to_string(), longitude);

        let approximate = stop
            .get("approximate")
            .and_then(Value::as_str)
            .map(|marker| TRUTHY_MARKERS.contains(&marker))
            .unwrap_or(false);
        stop.insert("approximate".to_string(), Value::Bool(approximate));

        stops.push(Value::Object(stop));
    }
    tracing::debug!(count = stops.len(), "loaded stops table");
    stops
}

fn parse_number(value: Option<&Value>) -> Option<Value> {
    let text = value.and_then(Value::as_str)?;
    let parsed = text.trim().parse::<f64>().ok()?;
    Number::from_f64(parsed).map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn routes_fall_back_to_empty_on_missing_or_invalid_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(load_routes(&dir.path().join("absent.json")), json!([]));

        let invalid = dir.path().join("routes.json");
        fs::write(&invalid, "{not json").expect("write");
        assert_eq!(load_routes(&invalid), json!([]));
    }

    #[test]
    fn routes_document_passes_through() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("routes.json");
        fs::write(&path, r#"[{"route_id":"L1","stops":["a","b"]}]"#).expect("write");
        assert_eq!(
            load_routes(&path),
            json!([{"route_id": "L1", "stops": ["a", "b"]}])
        );
    }

    #[test]
    fn stops_coerce_coordinates_and_approximate_flags() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stops.csv");
        fs::write(
            &path,
            "name,lat,lon,approximate\n\
             Praca,40.2,-8.4,1\n\
             Largo,40.3,-8.5,true\n\
             Ponte,40.4,-8.6,True\n\
             Mercado,40.5,-8.7,0\n\
             Broken,nope,-8.8,1\n",
        )
        .expect("write");

        let stops = load_stops(&path);
        assert_eq!(stops.len(), 4);
        assert_eq!(stops[0]["name"], json!("Praca"));
        assert_eq!(stops[0]["lat"], json!(40.2));
        assert_eq!(stops[0]["lon"], json!(-8.4));
        assert_eq!(stops[0]["approximate"], json!(true));
        assert_eq!(stops[1]["approximate"], json!(true));
        assert_eq!(stops[2]["approximate"], json!(true));
        assert_eq!(stops[3]["approximate"], json!(false));
        assert!(stops.iter().all(|stop| stop["name"] != json!("Broken")));
    }

    #[test]
    fn missing_stops_table_reads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_stops(&dir.path().join("absent.csv")).is_empty());
    }
}
