//! Shared parsing utilities for collision fields.
//!
//! Socrata returns every scalar as a string, and CSV snapshots round-trip
//! them as strings too, so the typed view of a record is always derived
//! from text.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::Coordinates;

/// Parses a crash date from a Socrata floating timestamp
/// (`2024-01-15T00:00:00.000`), a plain ISO date, or a US-style
/// `MM/DD/YYYY` date as found in the portal's CSV exports.
#[must_use]
pub fn parse_crash_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.date());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.date());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    NaiveDate::parse_from_str(s, "%m/%d/%Y").ok()
}

/// Parses lat/lng from string fields. Returns `None` if either is missing,
/// unparseable, out of range, or the `(0, 0)` placeholder.
#[must_use]
pub fn parse_lat_lng_str(lat: &str, lng: &str) -> Option<Coordinates> {
    let latitude = lat.trim().parse::<f64>().ok()?;
    let longitude = lng.trim().parse::<f64>().ok()?;
    Coordinates::new(latitude, longitude)
}

/// Parses coordinates out of a JSON-encoded `location` field.
///
/// Accepts a `GeoJSON` point (`{"type":"Point","coordinates":[lng,lat]}`)
/// or a Socrata location object (`{"latitude":"..","longitude":".."}`).
#[must_use]
pub fn parse_location_json(s: &str) -> Option<Coordinates> {
    let s = s.trim();
    if !s.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(s).ok()?;

    if let Some(Value::Array(coords)) = value.get("coordinates") {
        let longitude = json_f64(coords.first()?)?;
        let latitude = json_f64(coords.get(1)?)?;
        return Coordinates::new(latitude, longitude);
    }

    let latitude = json_f64(value.get("latitude")?)?;
    let longitude = json_f64(value.get("longitude")?)?;
    Coordinates::new(latitude, longitude)
}

/// Parses a person count. Empty or unparseable values count as zero;
/// float-formatted integers (`"2.0"`) are accepted.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn parse_count(s: &str) -> u64 {
    let s = s.trim();
    if let Ok(n) = s.parse::<u64>() {
        return n;
    }
    match s.parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 0.0 => f.round() as u64,
        _ => 0,
    }
}

fn json_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_socrata_timestamp() {
        let date = parse_crash_date("2024-01-15T00:00:00.000").unwrap();
        assert_eq!(date.to_string(), "2024-01-15");
    }

    #[test]
    fn parses_plain_and_us_dates() {
        assert_eq!(parse_crash_date("2024-01-15").unwrap().to_string(), "2024-01-15");
        assert_eq!(parse_crash_date("01/15/2024").unwrap().to_string(), "2024-01-15");
    }

    #[test]
    fn rejects_invalid_date() {
        assert!(parse_crash_date("not-a-date").is_none());
        assert!(parse_crash_date("").is_none());
    }

    #[test]
    fn parses_lat_lng_strings() {
        let coords = parse_lat_lng_str("40.7128", "-74.0060").unwrap();
        assert!((coords.latitude - 40.7128).abs() < f64::EPSILON);
        assert!((coords.longitude - -74.0060).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_non_numeric_and_out_of_range() {
        assert!(parse_lat_lng_str("abc", "-74.0").is_none());
        assert!(parse_lat_lng_str("91.0", "-74.0").is_none());
        assert!(parse_lat_lng_str("40.7", "-181.0").is_none());
        assert!(parse_lat_lng_str("", "").is_none());
    }

    #[test]
    fn rejects_only_the_zero_pair() {
        assert!(parse_lat_lng_str("0", "0").is_none());
        assert!(parse_lat_lng_str("0.0", "-0.0").is_none());
        assert!(parse_lat_lng_str("0.0", "-74.0").is_some());
        assert!(parse_lat_lng_str("40.7", "0").is_some());
    }

    #[test]
    fn parses_geojson_point_location() {
        let coords =
            parse_location_json(r#"{"type": "Point", "coordinates": [-73.935, 40.73]}"#).unwrap();
        assert!((coords.latitude - 40.73).abs() < f64::EPSILON);
        assert!((coords.longitude - -73.935).abs() < f64::EPSILON);
    }

    #[test]
    fn parses_socrata_location_object() {
        let coords = parse_location_json(
            r#"{"latitude": "40.73", "longitude": "-73.935", "human_address": "{}"}"#,
        )
        .unwrap();
        assert!((coords.latitude - 40.73).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_malformed_location() {
        assert!(parse_location_json("POINT (-73.9 40.7)").is_none());
        assert!(parse_location_json(r#"{"type": "Point"}"#).is_none());
        assert!(parse_location_json("{not json").is_none());
    }

    #[test]
    fn parses_counts() {
        assert_eq!(parse_count("3"), 3);
        assert_eq!(parse_count("2.0"), 2);
        assert_eq!(parse_count(""), 0);
        assert_eq!(parse_count("n/a"), 0);
        assert_eq!(parse_count("-1"), 0);
    }
}
