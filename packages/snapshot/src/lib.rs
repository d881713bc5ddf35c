#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CSV snapshots of collision batches.
//!
//! A run writes exactly one snapshot: the district-annotated table when
//! assignment succeeded, the plain table otherwise. Writes land in a
//! sibling temporary file that is renamed into place, so an interrupted
//! run never leaves a half-written CSV behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use collision_digest_collision_models::CollisionTable;
use collision_digest_spatial::Assignment;

/// Errors that can occur while reading or writing snapshots.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// File system operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// CSV encoding or decoding failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Reads a snapshot (or any collision CSV with a header row) back into a
/// table.
///
/// # Errors
///
/// Returns [`SnapshotError`] if the file cannot be opened or is not valid
/// CSV.
pub fn read_table(path: &Path) -> Result<CollisionTable, SnapshotError> {
    let file = std::fs::File::open(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table = read_table_from(std::io::BufReader::new(file))?;
    log::info!(
        "Read {} collision records from {}",
        table.len(),
        path.display()
    );
    Ok(table)
}

/// Reads a collision table from any CSV reader.
///
/// # Errors
///
/// Returns [`SnapshotError::Csv`] for malformed CSV.
pub fn read_table_from<R: std::io::Read>(reader: R) -> Result<CollisionTable, SnapshotError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let columns: Vec<String> = reader.headers()?.iter().map(str::to_owned).collect();

    let mut table = CollisionTable::new(columns);
    for result in reader.records() {
        let record = result?;
        table.push_row(record.iter().map(str::to_owned).collect());
    }
    Ok(table)
}

/// Writes the plain table, leaving out `drop_columns`.
///
/// # Errors
///
/// Returns [`SnapshotError`] if the file cannot be written.
pub fn write_table(
    path: &Path,
    table: &CollisionTable,
    drop_columns: &[String],
) -> Result<(), SnapshotError> {
    write_atomically(path, |writer| write_table_to(writer, table, drop_columns))?;
    log::info!("Data saved to {}", path.display());
    Ok(())
}

/// Writes the district-annotated table, leaving out `drop_columns`.
///
/// # Errors
///
/// Returns [`SnapshotError`] if the file cannot be written.
pub fn write_assignment(
    path: &Path,
    assignment: &Assignment<'_>,
    drop_columns: &[String],
) -> Result<(), SnapshotError> {
    write_atomically(path, |writer| {
        write_assignment_to(writer, assignment, drop_columns)
    })?;
    log::info!("Data saved with districts to {}", path.display());
    Ok(())
}

/// Writes the plain table as CSV to `writer`.
///
/// # Errors
///
/// Returns [`SnapshotError::Csv`] if encoding fails.
pub fn write_table_to<W: Write>(
    writer: W,
    table: &CollisionTable,
    drop_columns: &[String],
) -> Result<(), SnapshotError> {
    let keep = kept_indices(table.columns(), drop_columns);
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer.write_record(keep.iter().map(|&i| &table.columns()[i]))?;
    for record in table.records() {
        csv_writer.write_record(keep.iter().map(|&i| &record.values()[i]))?;
    }
    csv_writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Writes the annotated table as CSV to `writer`: the collision columns
/// followed by the district attribute columns, which are empty for rows
/// without a district.
///
/// # Errors
///
/// Returns [`SnapshotError::Csv`] if encoding fails.
pub fn write_assignment_to<W: Write>(
    writer: W,
    assignment: &Assignment<'_>,
    drop_columns: &[String],
) -> Result<(), SnapshotError> {
    let table = assignment.table();
    let collision_keep = kept_indices(table.columns(), drop_columns);

    let source_columns = assignment.districts().attribute_columns();
    let output_columns = assignment.district_columns();
    let district_keep: Vec<usize> = (0..source_columns.len())
        .filter(|&i| {
            !is_dropped(&source_columns[i], drop_columns)
                && !is_dropped(&output_columns[i], drop_columns)
        })
        .collect();

    let mut csv_writer = csv::Writer::from_writer(writer);

    let header: Vec<&str> = collision_keep
        .iter()
        .map(|&i| table.columns()[i].as_str())
        .chain(district_keep.iter().map(|&i| output_columns[i].as_str()))
        .collect();
    csv_writer.write_record(&header)?;

    for row in assignment.rows() {
        let values = row.record.values();
        let fields: Vec<&str> = collision_keep
            .iter()
            .map(|&i| values[i].as_str())
            .chain(district_keep.iter().map(|&i| {
                row.district
                    .map_or("", |district| district.attributes()[i].as_str())
            }))
            .collect();
        csv_writer.write_record(&fields)?;
    }
    csv_writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

fn is_dropped(column: &str, drop_columns: &[String]) -> bool {
    drop_columns.iter().any(|d| d.eq_ignore_ascii_case(column))
}

fn kept_indices(columns: &[String], drop_columns: &[String]) -> Vec<usize> {
    columns
        .iter()
        .enumerate()
        .filter(|(_, c)| !is_dropped(c, drop_columns))
        .map(|(i, _)| i)
        .collect()
}

fn write_atomically(
    path: &Path,
    write: impl FnOnce(&mut std::fs::File) -> Result<(), SnapshotError>,
) -> Result<(), SnapshotError> {
    let io_err = |source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let result = std::fs::File::create(&tmp_path)
        .map_err(io_err)
        .and_then(|mut file| {
            write(&mut file)?;
            file.sync_all().map_err(io_err)
        })
        .and_then(|()| std::fs::rename(&tmp_path, path).map_err(io_err));

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use collision_digest_spatial::{
        BoundaryOptions, DistrictSet, INTERNAL_COLUMNS, OverlapPolicy, assign, boundaries,
    };

    use super::*;

    const COLLISIONS_CSV: &str = "\
crash_date,borough,latitude,longitude,location,geometry
2024-03-02T00:00:00.000,BROOKLYN,40.730,-73.935,,junk
2024-03-01T00:00:00.000,QUEENS,abc,,,junk
2024-03-01T00:00:00.000,,1.5,1.5,,junk
";

    const BOUNDARIES_CSV: &str = "\
the_geom,district,Shape_Leng,Shape_Area
\"POLYGON ((-73.95 40.70, -73.90 40.70, -73.90 40.75, -73.95 40.75, -73.95 40.70))\",District 2,1.0,2.0
";

    fn drop_columns() -> Vec<String> {
        INTERNAL_COLUMNS.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn reads_table_with_typed_fields() {
        let table = read_table_from(COLLISIONS_CSV.as_bytes()).unwrap();
        assert_eq!(table.len(), 3);
        assert!(table.records()[0].coordinates.is_some());
        assert!(table.records()[1].coordinates.is_none());
        assert_eq!(table.records()[1].borough.as_deref(), Some("QUEENS"));
    }

    #[test]
    fn writes_assignment_with_district_columns_and_without_internal_columns() {
        let table = read_table_from(COLLISIONS_CSV.as_bytes()).unwrap();
        let set = boundaries::read_csv(BOUNDARIES_CSV.as_bytes(), &BoundaryOptions::default())
            .unwrap();
        let assignment = assign(&table, &set, OverlapPolicy::FirstMatch).unwrap();

        let mut out = Vec::new();
        write_assignment_to(&mut out, &assignment, &drop_columns()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "crash_date,borough,latitude,longitude,location,district");
        assert_eq!(
            lines[1],
            "2024-03-02T00:00:00.000,BROOKLYN,40.730,-73.935,,District 2"
        );
        assert_eq!(lines[2], "2024-03-01T00:00:00.000,QUEENS,abc,,,");
        assert_eq!(lines[3], "2024-03-01T00:00:00.000,,1.5,1.5,,");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn writes_plain_table_without_dropped_columns() {
        let table = read_table_from(COLLISIONS_CSV.as_bytes()).unwrap();

        let mut out = Vec::new();
        write_table_to(&mut out, &table, &drop_columns()).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(
            text.lines().next(),
            Some("crash_date,borough,latitude,longitude,location")
        );
        assert!(!text.contains("junk"));
    }

    #[test]
    fn quotes_json_location_values() {
        let table = CollisionTable::from_rows(
            vec!["location".to_string()],
            [vec![r#"{"type":"Point","coordinates":[-73.9,40.7]}"#.to_string()]],
        );

        let mut out = Vec::new();
        write_table_to(&mut out, &table, &[]).unwrap();
        let reread = read_table_from(out.as_slice()).unwrap();

        assert_eq!(reread.records()[0].values(), table.records()[0].values());
        assert!(reread.records()[0].coordinates.is_some());
    }

    #[test]
    fn empty_boundaries_write_empty_district_fields() {
        let table = read_table_from(COLLISIONS_CSV.as_bytes()).unwrap();
        let set = DistrictSet::new(vec!["district".to_string()], Vec::new(), None).unwrap();
        let assignment = assign(&table, &set, OverlapPolicy::FirstMatch).unwrap();

        let mut out = Vec::new();
        write_assignment_to(&mut out, &assignment, &drop_columns()).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(text.lines().count(), 4);
        assert!(text.lines().skip(1).all(|line| line.ends_with(',')));
    }

    #[test]
    fn writes_file_atomically_and_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("latest_collisions.csv");
        let table = read_table_from(COLLISIONS_CSV.as_bytes()).unwrap();

        write_table(&path, &table, &drop_columns()).unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("nested").join("latest_collisions.csv.tmp").exists());
        let reread = read_table(&path).unwrap();
        assert_eq!(reread.len(), 3);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_table(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, SnapshotError::Io { .. }));
    }
}
