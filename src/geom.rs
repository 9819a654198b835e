use serde::{Deserialize, Serialize};

use crate::dom::{ElemId, KmlDom};
use crate::error::{KmlError, KmlResult};

/// A single lon/lat(/alt) coordinate as written in a KML coordinates tuple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<f64>,
}

/// Parsed placemark geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point(Coordinate),
    LineString(Vec<Coordinate>),
    /// Outer ring followed by any inner rings.
    Polygon(Vec<Vec<Coordinate>>),
    Multi(Vec<Geometry>),
}

impl Geometry {
    /// First coordinate of the geometry, used to derive the convenience
    /// LAT/LON/ALTITUDE fields for point features.
    pub fn first_coordinate(&self) -> Option<Coordinate> {
        match self {
            Geometry::Point(c) => Some(*c),
            Geometry::LineString(cs) => cs.first().copied(),
            Geometry::Polygon(rings) => rings.first().and_then(|r| r.first()).copied(),
            Geometry::Multi(geoms) => geoms.first().and_then(|g| g.first_coordinate()),
        }
    }

    pub fn is_point(&self) -> bool {
        matches!(self, Geometry::Point(_))
    }
}

/// Parse a whitespace-separated list of `lon,lat[,alt]` tuples.
pub fn parse_coordinates(text: &str) -> Vec<Coordinate> {
    text.split_whitespace()
        .filter_map(|tuple| {
            let mut parts = tuple.split(',');
            let lon = parts.next()?.parse::<f64>().ok()?;
            let lat = parts.next()?.parse::<f64>().ok()?;
            let alt = parts.next().and_then(|a| a.parse::<f64>().ok());
            Some(Coordinate { lon, lat, alt })
        })
        .collect()
}

/// Read the coordinates child of a geometry element. A missing or empty
/// element yields nothing; non-empty content with no valid tuple is an
/// error so the owning node can be skipped with a diagnostic.
fn read_coordinates(dom: &KmlDom, el: ElemId) -> KmlResult<Option<Vec<Coordinate>>> {
    let text = match dom.child_text(el, "coordinates") {
        Some(text) if !text.is_empty() => text,
        _ => return Ok(None),
    };
    let coords = parse_coordinates(text);
    if coords.is_empty() {
        return Err(KmlError::NodeBuild {
            tag: dom.name(el).to_string(),
            reason: "coordinates contained no valid lon,lat tuples".to_string(),
        });
    }
    Ok(Some(coords))
}

/// Read the first supported geometry child of `el`, if any.
pub fn read_geometry(dom: &KmlDom, el: ElemId) -> KmlResult<Option<Geometry>> {
    for &child in dom.children(el) {
        if let Some(geom) = read_geometry_element(dom, child)? {
            return Ok(Some(geom));
        }
    }
    Ok(None)
}

fn read_geometry_element(dom: &KmlDom, el: ElemId) -> KmlResult<Option<Geometry>> {
    match dom.name(el) {
        "Point" => Ok(read_coordinates(dom, el)?
            .and_then(|coords| coords.first().map(|c| Geometry::Point(*c)))),
        "LineString" => Ok(read_coordinates(dom, el)?.map(Geometry::LineString)),
        "Polygon" => {
            let mut rings = Vec::new();
            if let Some(outer) = dom.child_by_name(el, "outerBoundaryIs") {
                if let Some(ring) = read_linear_ring(dom, outer)? {
                    rings.push(ring);
                }
            }
            for inner in dom.children_by_name(el, "innerBoundaryIs") {
                if let Some(ring) = read_linear_ring(dom, inner)? {
                    rings.push(ring);
                }
            }
            if rings.is_empty() {
                Ok(None)
            } else {
                Ok(Some(Geometry::Polygon(rings)))
            }
        }
        "MultiGeometry" => {
            let mut geoms = Vec::new();
            for &child in dom.children(el) {
                if let Some(geom) = read_geometry_element(dom, child)? {
                    geoms.push(geom);
                }
            }
            if geoms.is_empty() {
                Ok(None)
            } else {
                Ok(Some(Geometry::Multi(geoms)))
            }
        }
        _ => Ok(None),
    }
}

fn read_linear_ring(dom: &KmlDom, boundary: ElemId) -> KmlResult<Option<Vec<Coordinate>>> {
    match dom.child_by_name(boundary, "LinearRing") {
        Some(ring) => read_coordinates(dom, ring),
        None => Ok(None),
    }
}
