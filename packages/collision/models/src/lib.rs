#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Typed collision records and the tabular batch they travel in.
//!
//! Every collision keeps its raw column values verbatim (so snapshots
//! reproduce the feed exactly) alongside a typed view of the handful of
//! fields the pipeline actually reasons about: date, borough, casualty
//! counts and coordinates.

pub mod parsing;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::parsing::{parse_count, parse_crash_date, parse_lat_lng_str, parse_location_json};

/// Column holding the Socrata row identifier.
pub const COLLISION_ID_COLUMN: &str = "collision_id";
/// Column holding the crash date.
pub const CRASH_DATE_COLUMN: &str = "crash_date";
/// Column holding the borough name.
pub const BOROUGH_COLUMN: &str = "borough";
/// Column holding the number of persons injured.
pub const INJURED_COLUMN: &str = "number_of_persons_injured";
/// Column holding the number of persons killed.
pub const KILLED_COLUMN: &str = "number_of_persons_killed";
/// Column holding the latitude.
pub const LATITUDE_COLUMN: &str = "latitude";
/// Column holding the longitude.
pub const LONGITUDE_COLUMN: &str = "longitude";
/// Column holding the JSON-encoded location geometry.
pub const LOCATION_COLUMN: &str = "location";

/// A WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees, within `[-90, 90]`.
    pub latitude: f64,
    /// Longitude in degrees, within `[-180, 180]`.
    pub longitude: f64,
}

impl Coordinates {
    /// Validates and builds a coordinate pair.
    ///
    /// Returns `None` for non-finite or out-of-range values, and for the
    /// exact `(0, 0)` pair, which the collision feed uses as a placeholder
    /// for unknown positions. A zero on only one axis is a real position.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return None;
        }
        if latitude == 0.0 && longitude == 0.0 {
            return None;
        }
        Some(Self {
            latitude,
            longitude,
        })
    }
}

/// A single collision row.
///
/// Identity is the row's position within its [`CollisionTable`]. The typed
/// fields are derived once when the row is added and never change.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionRecord {
    /// Source row identifier, if present.
    pub collision_id: Option<String>,
    /// Date of the crash.
    pub crash_date: Option<NaiveDate>,
    /// Borough name as reported (e.g. `"BROOKLYN"`).
    pub borough: Option<String>,
    /// Number of persons injured.
    pub persons_injured: u64,
    /// Number of persons killed.
    pub persons_killed: u64,
    /// Validated position. `None` when the row has no usable coordinates.
    pub coordinates: Option<Coordinates>,
    values: Vec<String>,
}

impl CollisionRecord {
    /// Raw column values, aligned with [`CollisionTable::columns`].
    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// Indices of the columns the typed view is derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ColumnLayout {
    collision_id: Option<usize>,
    crash_date: Option<usize>,
    borough: Option<usize>,
    injured: Option<usize>,
    killed: Option<usize>,
    latitude: Option<usize>,
    longitude: Option<usize>,
    location: Option<usize>,
}

impl ColumnLayout {
    fn resolve(columns: &[String]) -> Self {
        let find = |name: &str| columns.iter().position(|c| c == name);
        Self {
            collision_id: find(COLLISION_ID_COLUMN),
            crash_date: find(CRASH_DATE_COLUMN),
            borough: find(BOROUGH_COLUMN),
            injured: find(INJURED_COLUMN),
            killed: find(KILLED_COLUMN),
            latitude: find(LATITUDE_COLUMN),
            longitude: find(LONGITUDE_COLUMN),
            location: find(LOCATION_COLUMN),
        }
    }
}

/// An ordered batch of collision rows sharing one set of columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollisionTable {
    columns: Vec<String>,
    layout: ColumnLayout,
    records: Vec<CollisionRecord>,
}

impl CollisionTable {
    /// Creates an empty table with the given columns.
    #[must_use]
    pub fn new(columns: Vec<String>) -> Self {
        let layout = ColumnLayout::resolve(&columns);
        Self {
            columns,
            layout,
            records: Vec::new(),
        }
    }

    /// Creates a table and fills it with `rows`.
    #[must_use]
    pub fn from_rows(columns: Vec<String>, rows: impl IntoIterator<Item = Vec<String>>) -> Self {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    /// Appends a row of raw values. Short rows are padded with empty values
    /// and long rows truncated to the column count.
    pub fn push_row(&mut self, mut values: Vec<String>) {
        values.resize(self.columns.len(), String::new());
        let layout = self.layout;
        let get = |idx: Option<usize>| idx.map_or("", |i| values[i].as_str());
        let non_empty = |idx: Option<usize>| {
            let v = get(idx).trim();
            (!v.is_empty()).then(|| v.to_string())
        };

        let coordinates = parse_lat_lng_str(get(layout.latitude), get(layout.longitude))
            .or_else(|| parse_location_json(get(layout.location)));

        let record = CollisionRecord {
            collision_id: non_empty(layout.collision_id),
            crash_date: parse_crash_date(get(layout.crash_date)),
            borough: non_empty(layout.borough),
            persons_injured: parse_count(get(layout.injured)),
            persons_killed: parse_count(get(layout.killed)),
            coordinates,
            values,
        };
        self.records.push(record);
    }

    /// Column names in output order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in input order.
    #[must_use]
    pub fn records(&self) -> &[CollisionRecord] {
        &self.records
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Position of a column by exact name.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Whether the table carries any column coordinates can be read from:
    /// a `latitude`/`longitude` pair or a `location` geometry.
    #[must_use]
    pub const fn has_coordinate_columns(&self) -> bool {
        (self.layout.latitude.is_some() && self.layout.longitude.is_some())
            || self.layout.location.is_some()
    }
}
