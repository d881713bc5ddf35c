//! District boundary readers.
//!
//! Two layouts are supported: a CSV export with one row per district and
//! the shape in a geometry column (WKT or `GeoJSON` text), and a `GeoJSON`
//! `FeatureCollection` whose feature properties become the district
//! attributes.

use std::io::Read;

use geo::MultiPolygon;
use geojson::GeoJson;
use serde_json::Value;

use crate::{DataError, DistrictSet, wkt_text};

/// Columns that describe the shape or the join rather than the district.
/// They never appear among district attributes or in written snapshots.
pub const INTERNAL_COLUMNS: &[&str] = &[
    "geometry",
    "index_right",
    "the_geom",
    "Shape_Leng",
    "Shape_Area",
];

/// Column names probed, in order, when no geometry column is configured.
pub const GEOMETRY_COLUMN_CANDIDATES: &[&str] = &["the_geom", "geometry", "geom", "wkt"];

/// How to interpret a boundary file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryOptions {
    /// Column holding the shape. Auto-detected from
    /// [`GEOMETRY_COLUMN_CANDIDATES`] when `None`.
    pub geometry_column: Option<String>,
    /// Attribute used as the district's display label. Defaults to the
    /// first attribute column.
    pub label_column: Option<String>,
    /// Columns left out of the attribute set.
    pub exclude_columns: Vec<String>,
}

impl Default for BoundaryOptions {
    fn default() -> Self {
        Self {
            geometry_column: None,
            label_column: None,
            exclude_columns: INTERNAL_COLUMNS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl BoundaryOptions {
    fn is_excluded(&self, column: &str) -> bool {
        self.exclude_columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column))
    }
}

/// Reads districts from CSV.
///
/// An empty input (no header row) yields an empty set.
///
/// # Errors
///
/// Returns [`DataError`] if the CSV is unreadable, has no geometry column,
/// or any row's geometry cannot be parsed.
pub fn read_csv<R: Read>(reader: R, options: &BoundaryOptions) -> Result<DistrictSet, DataError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_owned())
        .collect();

    if headers.iter().all(String::is_empty) {
        log::warn!("Boundary CSV is empty; no districts loaded");
        return DistrictSet::new(Vec::new(), Vec::new(), None);
    }

    let geometry_idx = find_geometry_column(&headers, options.geometry_column.as_deref())
        .ok_or_else(|| DataError::MissingGeometryColumn {
            candidates: options.geometry_column.as_ref().map_or_else(
                || GEOMETRY_COLUMN_CANDIDATES.join(", "),
                Clone::clone,
            ),
        })?;

    let attribute_indices: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| *i != geometry_idx && !options.is_excluded(h))
        .map(|(i, _)| i)
        .collect();
    let attribute_columns: Vec<String> = attribute_indices
        .iter()
        .map(|&i| headers[i].clone())
        .collect();

    let mut districts = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result?;
        let row = row_idx + 1;

        let geometry_text = record.get(geometry_idx).unwrap_or("").trim();
        if geometry_text.is_empty() {
            return Err(DataError::InvalidGeometry {
                row,
                message: "empty geometry".to_string(),
            });
        }
        let polygon = parse_geometry_text(geometry_text)
            .map_err(|message| DataError::InvalidGeometry { row, message })?;

        let attributes = attribute_indices
            .iter()
            .map(|&i| record.get(i).unwrap_or("").trim().to_owned())
            .collect();
        districts.push((attributes, polygon));
    }

    log::info!("Loaded {} district boundaries from CSV", districts.len());
    DistrictSet::new(attribute_columns, districts, options.label_column.as_deref())
}

/// Reads districts from a `GeoJSON` document.
///
/// A `FeatureCollection` yields one district per feature; a lone `Feature`
/// or bare geometry yields one district.
///
/// # Errors
///
/// Returns [`DataError`] if the text is not `GeoJSON` or a feature's
/// geometry is missing or not areal.
pub fn read_geojson(text: &str, options: &BoundaryOptions) -> Result<DistrictSet, DataError> {
    let features = match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(geometry) => vec![geojson::Feature::from(geometry)],
    };

    let mut attribute_columns: Vec<String> = Vec::new();
    for feature in &features {
        for key in feature.properties.iter().flat_map(|p| p.keys()) {
            if !options.is_excluded(key) && !attribute_columns.contains(key) {
                attribute_columns.push(key.clone());
            }
        }
    }

    let mut districts = Vec::with_capacity(features.len());
    for (idx, feature) in features.into_iter().enumerate() {
        let row = idx + 1;
        let geometry = feature.geometry.ok_or_else(|| DataError::InvalidGeometry {
            row,
            message: "feature has no geometry".to_string(),
        })?;
        let polygon = geometry_to_multipolygon(geometry)
            .map_err(|message| DataError::InvalidGeometry { row, message })?;

        let attributes = attribute_columns
            .iter()
            .map(|column| {
                feature
                    .properties
                    .as_ref()
                    .and_then(|p| p.get(column))
                    .map_or_else(String::new, value_to_text)
            })
            .collect();
        districts.push((attributes, polygon));
    }

    log::info!("Loaded {} district boundaries from GeoJSON", districts.len());
    DistrictSet::new(attribute_columns, districts, options.label_column.as_deref())
}

/// Parses a geometry cell: `GeoJSON` when it starts with `{`, WKT otherwise.
///
/// # Errors
///
/// Returns a description of the problem when the text is neither a valid
/// `Polygon`/`MultiPolygon` `GeoJSON` geometry nor valid WKT.
pub fn parse_geometry_text(text: &str) -> Result<MultiPolygon<f64>, String> {
    let text = text.trim();
    if text.starts_with('{') {
        let geometry = match text.parse::<GeoJson>().map_err(|e| e.to_string())? {
            GeoJson::Geometry(geometry) => geometry,
            GeoJson::Feature(geojson::Feature {
                geometry: Some(geometry),
                ..
            }) => geometry,
            _ => return Err("expected a GeoJSON geometry".to_string()),
        };
        geometry_to_multipolygon(geometry)
    } else {
        wkt_text::parse_multipolygon(text).map_err(|e| e.to_string())
    }
}

fn geometry_to_multipolygon(geometry: geojson::Geometry) -> Result<MultiPolygon<f64>, String> {
    let geo_geom: geo::Geometry<f64> = geometry
        .try_into()
        .map_err(|e: geojson::Error| e.to_string())?;
    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Ok(mp),
        geo::Geometry::Polygon(p) => Ok(MultiPolygon(vec![p])),
        _ => Err("expected a Polygon or MultiPolygon geometry".to_string()),
    }
}

fn find_geometry_column(headers: &[String], configured: Option<&str>) -> Option<usize> {
    if let Some(name) = configured {
        return headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    }
    GEOMETRY_COLUMN_CANDIDATES
        .iter()
        .find_map(|candidate| headers.iter().position(|h| h.eq_ignore_ascii_case(candidate)))
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNCIL_CSV: &str = "\
the_geom,CounDist,Shape_Leng,Shape_Area
\"MULTIPOLYGON (((-74.0 40.70, -73.95 40.70, -73.95 40.75, -74.0 40.75, -74.0 40.70)))\",1,100.5,2000.1
\"MULTIPOLYGON (((-73.95 40.70, -73.90 40.70, -73.90 40.75, -73.95 40.75, -73.95 40.70)))\",2,101.5,2001.1
";

    #[test]
    fn reads_council_style_csv() {
        let set = read_csv(COUNCIL_CSV.as_bytes(), &BoundaryOptions::default()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.attribute_columns(), &["CounDist"]);
        assert_eq!(set.districts()[1].attributes(), &["2"]);
        assert_eq!(set.label(1), Some("2"));
    }

    #[test]
    fn empty_csv_yields_empty_set() {
        let set = read_csv("".as_bytes(), &BoundaryOptions::default()).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn header_only_csv_yields_empty_set() {
        let set = read_csv("the_geom,district\n".as_bytes(), &BoundaryOptions::default()).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.attribute_columns(), &["district"]);
    }

    #[test]
    fn missing_geometry_column_is_data_error() {
        let err = read_csv("name,district\nfoo,1\n".as_bytes(), &BoundaryOptions::default())
            .unwrap_err();
        assert!(matches!(err, DataError::MissingGeometryColumn { .. }));
    }

    #[test]
    fn malformed_geometry_is_data_error() {
        let err = read_csv(
            "the_geom,district\n\"POLYGON ((0 0, 1 0\",1\n".as_bytes(),
            &BoundaryOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DataError::InvalidGeometry { row: 1, .. }));
    }

    #[test]
    fn empty_geometry_cell_is_data_error() {
        let err = read_csv(
            "the_geom,district\n,1\n".as_bytes(),
            &BoundaryOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DataError::InvalidGeometry { row: 1, .. }));
    }

    #[test]
    fn honors_configured_geometry_and_label_columns() {
        let csv = "name,shape,district\nTwo,\"POLYGON ((0 0, 1 0, 1 1, 0 0))\",District 2\n";
        let options = BoundaryOptions {
            geometry_column: Some("shape".to_string()),
            label_column: Some("district".to_string()),
            ..BoundaryOptions::default()
        };
        let set = read_csv(csv.as_bytes(), &options).unwrap();
        assert_eq!(set.attribute_columns(), &["name", "district"]);
        assert_eq!(set.label(0), Some("District 2"));
    }

    #[test]
    fn unknown_label_column_is_data_error() {
        let options = BoundaryOptions {
            label_column: Some("missing".to_string()),
            ..BoundaryOptions::default()
        };
        let err = read_csv(COUNCIL_CSV.as_bytes(), &options).unwrap_err();
        assert!(matches!(err, DataError::UnknownLabelColumn { .. }));
    }

    #[test]
    fn reads_geojson_geometry_cells() {
        let csv = "geometry,district\n\"{\"\"type\"\": \"\"Polygon\"\", \"\"coordinates\"\": [[[0,0],[1,0],[1,1],[0,0]]]}\",A\n";
        let set = read_csv(csv.as_bytes(), &BoundaryOptions::default()).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.label(0), Some("A"));
    }

    #[test]
    fn reads_feature_collection() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature",
                 "properties": {"district": "District 2", "Shape_Area": 12.5, "number": 2},
                 "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
                {"type": "Feature",
                 "properties": {"district": "District 3", "number": 3},
                 "geometry": {"type": "MultiPolygon", "coordinates": [[[[2,2],[3,2],[3,3],[2,2]]]]}}
            ]
        }"#;
        let set = read_geojson(text, &BoundaryOptions::default()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.attribute_columns(), &["district", "number"]);
        assert_eq!(set.districts()[1].attributes(), &["District 3", "3"]);
    }

    #[test]
    fn rejects_point_features() {
        let text = r#"{"type": "Feature", "properties": {},
                       "geometry": {"type": "Point", "coordinates": [1, 2]}}"#;
        let err = read_geojson(text, &BoundaryOptions::default()).unwrap_err();
        assert!(matches!(err, DataError::InvalidGeometry { row: 1, .. }));
    }
}
