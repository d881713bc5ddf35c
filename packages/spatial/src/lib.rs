#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! District assignment for collision points.
//!
//! Loads district polygons once per run, builds an R-tree over their
//! bounding boxes, and matches every collision with usable coordinates to
//! the district containing it. Rows without coordinates and rows that fall
//! outside every district are kept with empty district fields.

pub mod boundaries;
pub mod wkt_text;

use std::path::{Path, PathBuf};

use collision_digest_collision_models::{CollisionRecord, CollisionTable};
use geo::{Area, BoundingRect, Intersects, MultiPolygon};
use rstar::{AABB, RTree, RTreeObject};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

pub use boundaries::{BoundaryOptions, INTERNAL_COLUMNS};

/// Suffix appended to a district attribute column whose name is already
/// taken by a collision column.
pub const COLLIDING_COLUMN_SUFFIX: &str = "_district";

/// Errors raised when inputs cannot be turned into geometries.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    /// Boundary file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Boundary CSV is malformed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Boundary `GeoJSON` is malformed.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// No geometry column was found in the boundary file.
    #[error("No geometry column found (looked for: {candidates})")]
    MissingGeometryColumn {
        /// Column names that were probed.
        candidates: String,
    },

    /// A boundary row's geometry could not be parsed.
    #[error("Invalid geometry in boundary row {row}: {message}")]
    InvalidGeometry {
        /// 1-based data row (or feature) number.
        row: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// The configured label column is not among the district attributes.
    #[error("Label column '{column}' not found in boundary attributes")]
    UnknownLabelColumn {
        /// The configured column name.
        column: String,
    },

    /// The collision table has no column coordinates can be read from.
    #[error("Collision data has no latitude/longitude or location columns")]
    MissingCoordinateColumns,

    /// A point fell inside more than one district under
    /// [`OverlapPolicy::Reject`].
    #[error("Collision row {row} lies in more than one district: {districts:?}")]
    AmbiguousAssignment {
        /// 0-based collision row.
        row: usize,
        /// Labels of every containing district, in file order.
        districts: Vec<String>,
    },
}

/// What to do when a point lies inside more than one district.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OverlapPolicy {
    /// The first containing district in boundary file order wins.
    #[default]
    FirstMatch,
    /// The containing district with the smallest planar area wins; ties go
    /// to file order.
    SmallestArea,
    /// Fail the whole assignment.
    Reject,
}

/// A district polygon and its descriptive attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct District {
    attributes: Vec<String>,
    polygon: MultiPolygon<f64>,
    area: f64,
}

impl District {
    /// Attribute values, aligned with [`DistrictSet::attribute_columns`].
    #[must_use]
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }
}

/// A district's bounding box in the R-tree, keyed by its file position.
struct IndexEntry {
    order: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Immutable district reference data with a spatial index.
pub struct DistrictSet {
    attribute_columns: Vec<String>,
    label_index: Option<usize>,
    districts: Vec<District>,
    index: RTree<IndexEntry>,
}

impl std::fmt::Debug for DistrictSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistrictSet")
            .field("attribute_columns", &self.attribute_columns)
            .field("label_index", &self.label_index)
            .field("districts", &self.districts.len())
            .finish_non_exhaustive()
    }
}

impl DistrictSet {
    /// Builds a set from attribute columns and `(attributes, polygon)` rows
    /// in file order.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::UnknownLabelColumn`] if `label_column` is given
    /// but not among `attribute_columns`.
    pub fn new(
        attribute_columns: Vec<String>,
        rows: Vec<(Vec<String>, MultiPolygon<f64>)>,
        label_column: Option<&str>,
    ) -> Result<Self, DataError> {
        let label_index = match label_column {
            Some(column) => Some(
                attribute_columns
                    .iter()
                    .position(|c| c == column)
                    .ok_or_else(|| DataError::UnknownLabelColumn {
                        column: column.to_string(),
                    })?,
            ),
            None => (!attribute_columns.is_empty()).then_some(0),
        };

        let width = attribute_columns.len();
        let districts: Vec<District> = rows
            .into_iter()
            .map(|(mut attributes, polygon)| {
                attributes.resize(width, String::new());
                let area = polygon.unsigned_area();
                District {
                    attributes,
                    polygon,
                    area,
                }
            })
            .collect();

        let entries = districts
            .iter()
            .enumerate()
            .map(|(order, district)| IndexEntry {
                order,
                envelope: compute_envelope(&district.polygon),
            })
            .collect();

        Ok(Self {
            attribute_columns,
            label_index,
            districts,
            index: RTree::bulk_load(entries),
        })
    }

    /// Loads districts from a boundary file. `.geojson`/`.json` files are
    /// read as `GeoJSON`; everything else as CSV.
    ///
    /// # Errors
    ///
    /// Returns [`DataError`] if the file cannot be read or parsed.
    pub fn from_path(path: &Path, options: &BoundaryOptions) -> Result<Self, DataError> {
        let io_err = |source| DataError::Io {
            path: path.to_path_buf(),
            source,
        };
        let is_geojson = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("geojson") || e.eq_ignore_ascii_case("json"));

        log::info!("Loading district boundaries from {}", path.display());
        if is_geojson {
            let text = std::fs::read_to_string(path).map_err(io_err)?;
            boundaries::read_geojson(&text, options)
        } else {
            let file = std::fs::File::open(path).map_err(io_err)?;
            boundaries::read_csv(std::io::BufReader::new(file), options)
        }
    }

    /// Attribute column names, in file order.
    #[must_use]
    pub fn attribute_columns(&self) -> &[String] {
        &self.attribute_columns
    }

    /// Districts in file order.
    #[must_use]
    pub fn districts(&self) -> &[District] {
        &self.districts
    }

    /// Number of districts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.districts.len()
    }

    /// Whether the set has no districts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.districts.is_empty()
    }

    /// Display label of the district at `index`.
    #[must_use]
    pub fn label(&self, index: usize) -> Option<&str> {
        let district = self.districts.get(index)?;
        self.label_index
            .and_then(|i| district.attributes.get(i))
            .map(String::as_str)
    }

    /// Indices of every district containing the point, in file order.
    /// Points on a district edge count as inside.
    #[must_use]
    pub fn containing(&self, longitude: f64, latitude: f64) -> Vec<usize> {
        let point = geo::Point::new(longitude, latitude);
        let query_env = AABB::from_point([longitude, latitude]);

        let mut matches: Vec<usize> = self
            .index
            .locate_in_envelope_intersecting(&query_env)
            .filter(|entry| self.districts[entry.order].polygon.intersects(&point))
            .map(|entry| entry.order)
            .collect();
        matches.sort_unstable();
        matches
    }

    fn select(&self, candidates: &[usize], policy: OverlapPolicy) -> Option<usize> {
        match policy {
            OverlapPolicy::FirstMatch | OverlapPolicy::Reject => candidates.first().copied(),
            OverlapPolicy::SmallestArea => {
                let mut best: Option<usize> = None;
                for &candidate in candidates {
                    match best {
                        None => best = Some(candidate),
                        Some(current)
                            if self.districts[candidate].area < self.districts[current].area =>
                        {
                            best = Some(candidate);
                        }
                        _ => {}
                    }
                }
                best
            }
        }
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
fn compute_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    mp.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}

/// Counters describing one assignment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentStats {
    /// Rows matched to a district.
    pub matched: usize,
    /// Rows with valid coordinates outside every district.
    pub unmatched: usize,
    /// Rows skipped because their coordinates were missing or invalid.
    pub invalid_coordinates: usize,
    /// Rows inside more than one district.
    pub ambiguous: usize,
}

/// A collision row joined with its district, if any.
#[derive(Debug, Clone, Copy)]
pub struct AssignedCollision<'a> {
    /// The untouched collision row.
    pub record: &'a CollisionRecord,
    /// Index of the matched district within the [`DistrictSet`].
    pub district_index: Option<usize>,
    /// The matched district.
    pub district: Option<&'a District>,
}

/// The result of [`assign`]: one entry per collision row, in input order.
#[derive(Debug)]
pub struct Assignment<'a> {
    table: &'a CollisionTable,
    districts: &'a DistrictSet,
    matches: Vec<Option<usize>>,
    stats: AssignmentStats,
}

impl<'a> Assignment<'a> {
    /// The collision table that was assigned.
    #[must_use]
    pub const fn table(&self) -> &'a CollisionTable {
        self.table
    }

    /// The district set used.
    #[must_use]
    pub const fn districts(&self) -> &'a DistrictSet {
        self.districts
    }

    /// Matched district index per collision row.
    #[must_use]
    pub fn matches(&self) -> &[Option<usize>] {
        &self.matches
    }

    /// Counters for this pass.
    #[must_use]
    pub const fn stats(&self) -> AssignmentStats {
        self.stats
    }

    /// Output names for the district attribute columns. A name already used
    /// by a collision column gets [`COLLIDING_COLUMN_SUFFIX`].
    #[must_use]
    pub fn district_columns(&self) -> Vec<String> {
        self.districts
            .attribute_columns()
            .iter()
            .map(|column| {
                if self.table.column_index(column).is_some() {
                    format!("{column}{COLLIDING_COLUMN_SUFFIX}")
                } else {
                    column.clone()
                }
            })
            .collect()
    }

    /// Joined rows in input order.
    pub fn rows(&self) -> impl Iterator<Item = AssignedCollision<'a>> + '_ {
        let districts = self.districts;
        self.table
            .records()
            .iter()
            .zip(&self.matches)
            .map(move |(record, &district_index)| AssignedCollision {
                record,
                district_index,
                district: district_index.map(|i| &districts.districts[i]),
            })
    }

    /// Display label of the district matched to row `row`.
    #[must_use]
    pub fn label(&self, row: usize) -> Option<&'a str> {
        let districts = self.districts;
        self.matches.get(row).copied().flatten().and_then(|i| districts.label(i))
    }
}

/// Assigns every collision row to the district containing it.
///
/// Rows without valid coordinates are skipped for matching, and rows outside
/// every district stay unmatched; both are still present in the result.
/// Overlapping districts are resolved by `policy`.
///
/// # Errors
///
/// Returns [`DataError::MissingCoordinateColumns`] if the table has no
/// column coordinates could come from, and
/// [`DataError::AmbiguousAssignment`] under [`OverlapPolicy::Reject`] when a
/// point lies in more than one district.
pub fn assign<'a>(
    table: &'a CollisionTable,
    districts: &'a DistrictSet,
    policy: OverlapPolicy,
) -> Result<Assignment<'a>, DataError> {
    if !table.has_coordinate_columns() {
        return Err(DataError::MissingCoordinateColumns);
    }

    let mut stats = AssignmentStats::default();
    let mut matches = Vec::with_capacity(table.len());

    for (row, record) in table.records().iter().enumerate() {
        let Some(coords) = record.coordinates else {
            stats.invalid_coordinates += 1;
            matches.push(None);
            continue;
        };

        let candidates = districts.containing(coords.longitude, coords.latitude);
        if candidates.len() > 1 {
            stats.ambiguous += 1;
            if policy == OverlapPolicy::Reject {
                return Err(DataError::AmbiguousAssignment {
                    row,
                    districts: candidates
                        .iter()
                        .map(|&i| districts.label(i).unwrap_or_default().to_string())
                        .collect(),
                });
            }
        }

        let selected = districts.select(&candidates, policy);
        if selected.is_some() {
            stats.matched += 1;
        } else {
            stats.unmatched += 1;
            log::debug!(
                "Collision row {row} at ({}, {}) matched no district",
                coords.latitude,
                coords.longitude
            );
        }
        matches.push(selected);
    }

    if stats.ambiguous > 0 {
        log::warn!(
            "{} collisions fell inside overlapping districts (resolved by {policy})",
            stats.ambiguous
        );
    }

    Ok(Assignment {
        table,
        districts,
        matches,
        stats,
    })
}
