#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Per-run summary of a collision batch.
//!
//! The summary is computed from the un-annotated batch so it is available
//! whether or not district assignment succeeded. When an assignment exists
//! a per-district breakdown is added.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use collision_digest_collision_models::CollisionTable;
use collision_digest_spatial::Assignment;
use serde::{Deserialize, Serialize};

/// Bucket for collisions that matched no district.
pub const UNASSIGNED_LABEL: &str = "Unassigned";

/// Errors that can occur while persisting a summary.
#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    /// File system operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// JSON encoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Earliest and latest crash dates in a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// Earliest parseable crash date.
    pub earliest: Option<NaiveDate>,
    /// Latest parseable crash date.
    pub latest: Option<NaiveDate>,
}

/// Aggregate figures for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionSummary {
    /// Number of collision records retrieved.
    pub record_count: usize,
    /// Crash date span.
    pub date_range: DateRange,
    /// Sum of persons injured.
    pub total_injured: u64,
    /// Sum of persons killed.
    pub total_killed: u64,
    /// Collisions per borough. Records without a borough are not counted.
    pub boroughs: BTreeMap<String, u64>,
    /// Collisions per district label, present when districts were assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub districts: Option<BTreeMap<String, u64>>,
}

impl CollisionSummary {
    /// Boroughs ordered by count (descending), then name.
    #[must_use]
    pub fn boroughs_by_count(&self) -> Vec<(&str, u64)> {
        sorted_by_count(&self.boroughs)
    }

    /// Districts ordered by count (descending), then label.
    #[must_use]
    pub fn districts_by_count(&self) -> Option<Vec<(&str, u64)>> {
        self.districts.as_ref().map(sorted_by_count)
    }
}

fn sorted_by_count(counts: &BTreeMap<String, u64>) -> Vec<(&str, u64)> {
    let mut entries: Vec<(&str, u64)> = counts.iter().map(|(k, &v)| (k.as_str(), v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    entries
}

/// Computes the summary for `table`, adding a district breakdown when an
/// `assignment` of that table is supplied.
#[must_use]
pub fn summarize(table: &CollisionTable, assignment: Option<&Assignment<'_>>) -> CollisionSummary {
    let mut summary = CollisionSummary {
        record_count: table.len(),
        ..CollisionSummary::default()
    };

    for record in table.records() {
        summary.total_injured += record.persons_injured;
        summary.total_killed += record.persons_killed;

        if let Some(date) = record.crash_date {
            let range = &mut summary.date_range;
            range.earliest = Some(range.earliest.map_or(date, |d| d.min(date)));
            range.latest = Some(range.latest.map_or(date, |d| d.max(date)));
        }

        if let Some(borough) = &record.borough {
            *summary.boroughs.entry(borough.clone()).or_insert(0) += 1;
        }
    }

    summary.districts = assignment.map(|assignment| {
        let mut districts = BTreeMap::new();
        for (row, district_index) in assignment.matches().iter().enumerate() {
            let label = match district_index {
                None => UNASSIGNED_LABEL.to_string(),
                Some(index) => assignment
                    .label(row)
                    .map_or_else(|| format!("District #{}", index + 1), ToString::to_string),
            };
            *districts.entry(label).or_insert(0) += 1;
        }
        districts
    });

    summary
}

/// File name of the summary written for `date`.
#[must_use]
pub fn summary_filename(date: NaiveDate) -> String {
    format!("summary_{}.json", date.format("%Y-%m-%d"))
}

/// Writes the summary as pretty-printed JSON into `dir`, returning the
/// file path.
///
/// # Errors
///
/// Returns [`SummaryError`] if the directory or file cannot be written.
pub fn write_summary(
    dir: &Path,
    summary: &CollisionSummary,
    date: NaiveDate,
) -> Result<PathBuf, SummaryError> {
    let path = dir.join(summary_filename(date));
    let io_err = |source| SummaryError::Io {
        path: path.clone(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(io_err)?;
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(&path, json).map_err(io_err)?;

    log::info!("Summary saved to {}", path.display());
    Ok(path)
}
