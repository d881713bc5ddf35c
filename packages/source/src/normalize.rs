//! Conversion of raw Socrata JSON objects into a [`CollisionTable`].
//!
//! Columns appear in first-seen key order across all records. Scalars are
//! kept as their text form; nested objects and arrays (the `location`
//! geometry) are serialized back to compact JSON so they survive a CSV
//! round trip.

use collision_digest_collision_models::CollisionTable;
use serde_json::Value;

/// Flattens raw JSON records into a table.
///
/// Records that are not JSON objects are skipped with a warning.
#[must_use]
pub fn records_to_table(records: &[Value]) -> CollisionTable {
    let mut columns: Vec<String> = Vec::new();
    let mut skipped = 0_usize;

    for record in records {
        let Value::Object(map) = record else {
            skipped += 1;
            continue;
        };
        for key in map.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }

    if skipped > 0 {
        log::warn!("Skipped {skipped} non-object records");
    }

    let rows: Vec<Vec<String>> = records
        .iter()
        .filter_map(Value::as_object)
        .map(|map| {
            columns
                .iter()
                .map(|column| map.get(column).map_or_else(String::new, value_to_text))
                .collect()
        })
        .collect();

    CollisionTable::from_rows(columns, rows)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
