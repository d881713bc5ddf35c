//! WKT geometry cells.
//!
//! Boundary exports from open-data portals carry their shapes as WKT text
//! (`MULTIPOLYGON (((-73.97 40.73, ...)))`). Parsing is delegated to the
//! `wkt` crate; this module strips an EWKT `SRID=n;` prefix and accepts
//! only the two areal types.

use geo::{Geometry, LineString, MultiPolygon};
use wkt::TryFromWkt;

/// Errors produced while reading a WKT geometry cell.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WktError {
    /// The text is not well-formed WKT.
    #[error("invalid WKT: {0}")]
    Syntax(String),
    /// Geometry type other than `POLYGON`/`MULTIPOLYGON`.
    #[error("unsupported WKT geometry type '{0}'")]
    UnsupportedType(&'static str),
    /// `EMPTY` geometry.
    #[error("empty WKT geometry")]
    Empty,
    /// A ring with fewer than three distinct positions.
    #[error("ring has {0} positions, need at least 3")]
    DegenerateRing(usize),
}

/// Parses a `POLYGON` or `MULTIPOLYGON`, optionally EWKT-prefixed, into a
/// [`MultiPolygon`].
///
/// # Errors
///
/// Returns [`WktError`] for malformed text, empty geometries, degenerate
/// rings, and any other geometry type.
pub fn parse_multipolygon(input: &str) -> Result<MultiPolygon<f64>, WktError> {
    let body = match input.split_once(';') {
        Some((prefix, rest)) if prefix.trim().to_ascii_uppercase().starts_with("SRID=") => rest,
        _ => input,
    };

    let geometry = Geometry::<f64>::try_from_wkt_str(body.trim())
        .map_err(|e| WktError::Syntax(e.to_string()))?;

    let multi = match geometry {
        Geometry::Polygon(polygon) => MultiPolygon(vec![polygon]),
        Geometry::MultiPolygon(multi) => multi,
        other => return Err(WktError::UnsupportedType(type_name(&other))),
    };

    if multi.0.is_empty() || multi.0.iter().any(|p| p.exterior().0.is_empty()) {
        return Err(WktError::Empty);
    }
    for polygon in &multi.0 {
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
            check_ring(ring)?;
        }
    }

    Ok(multi)
}

/// Rings come back closed, so a usable one has at least four positions.
fn check_ring(ring: &LineString<f64>) -> Result<(), WktError> {
    if ring.0.len() < 4 {
        return Err(WktError::DegenerateRing(ring.0.len().saturating_sub(1)));
    }
    Ok(())
}

const fn type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "POINT",
        Geometry::LineString(_) | Geometry::Line(_) => "LINESTRING",
        Geometry::MultiPoint(_) => "MULTIPOINT",
        Geometry::MultiLineString(_) => "MULTILINESTRING",
        Geometry::GeometryCollection(_) => "GEOMETRYCOLLECTION",
        Geometry::Polygon(_)
        | Geometry::MultiPolygon(_)
        | Geometry::Rect(_)
        | Geometry::Triangle(_) => "POLYGON",
    }
}
