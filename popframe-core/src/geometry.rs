//! GeoJSON geometry and feature types
//!
//! Only the subset the pipeline exchanges with upstream services and
//! writes into derived layers is modelled. Geometry operations beyond
//! validation and a representative anchor point are out of scope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// A coordinate tuple: longitude, latitude and an optional elevation.
pub type Position = Vec<f64>;

/// GeoJSON geometry object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

impl Geometry {
    /// Interpret a raw JSON value as a validated geometry.
    pub fn from_json(value: &Value) -> Result<Self, ValidationError> {
        let geometry: Geometry = serde_json::from_value(value.clone()).map_err(|e| {
            ValidationError::InvalidGeometry {
                reason: e.to_string(),
            }
        })?;
        geometry.validate()?;
        Ok(geometry)
    }

    /// Structural checks: positions carry at least two finite ordinates and
    /// polygon rings are closed with at least four positions.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Geometry::Point(p) => check_position(p),
            Geometry::MultiPoint(points) => {
                non_empty(points, "MultiPoint")?;
                points.iter().try_for_each(|p| check_position(p))
            }
            Geometry::LineString(line) => check_line(line),
            Geometry::MultiLineString(lines) => {
                non_empty(lines, "MultiLineString")?;
                lines.iter().try_for_each(|l| check_line(l))
            }
            Geometry::Polygon(rings) => check_polygon(rings),
            Geometry::MultiPolygon(polygons) => {
                non_empty(polygons, "MultiPolygon")?;
                polygons.iter().try_for_each(|p| check_polygon(p))
            }
        }
    }

    /// A representative `[x, y]` point: the point itself, the first vertex of
    /// a line, or the vertex mean of the first outer ring.
    pub fn anchor(&self) -> Option<[f64; 2]> {
        match self {
            Geometry::Point(p) => xy(p),
            Geometry::MultiPoint(points) | Geometry::LineString(points) => {
                points.first().and_then(|p| xy(p))
            }
            Geometry::MultiLineString(lines) => {
                lines.first().and_then(|l| l.first()).and_then(|p| xy(p))
            }
            Geometry::Polygon(rings) => ring_mean(rings.first()?),
            Geometry::MultiPolygon(polygons) => ring_mean(polygons.first()?.first()?),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::LineString(_) => "LineString",
            Geometry::MultiLineString(_) => "MultiLineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
        }
    }
}

fn xy(p: &Position) -> Option<[f64; 2]> {
    match p.as_slice() {
        [x, y, ..] => Some([*x, *y]),
        _ => None,
    }
}

fn ring_mean(ring: &[Position]) -> Option<[f64; 2]> {
    // closing vertex repeats the first one
    let open = if ring.len() > 1 { &ring[..ring.len() - 1] } else { ring };
    if open.is_empty() {
        return None;
    }
    let (mut sx, mut sy) = (0.0, 0.0);
    for p in open {
        let [x, y] = xy(p)?;
        sx += x;
        sy += y;
    }
    let n = open.len() as f64;
    Some([sx / n, sy / n])
}

fn non_empty<T>(items: &[T], kind: &str) -> Result<(), ValidationError> {
    if items.is_empty() {
        return Err(ValidationError::InvalidGeometry {
            reason: format!("{} has no members", kind),
        });
    }
    Ok(())
}

fn check_position(p: &Position) -> Result<(), ValidationError> {
    if p.len() < 2 || p.iter().any(|v| !v.is_finite()) {
        return Err(ValidationError::InvalidGeometry {
            reason: format!("invalid position {:?}", p),
        });
    }
    Ok(())
}

fn check_line(line: &[Position]) -> Result<(), ValidationError> {
    if line.len() < 2 {
        return Err(ValidationError::InvalidGeometry {
            reason: "line needs at least two positions".to_string(),
        });
    }
    line.iter().try_for_each(|p| check_position(p))
}

fn check_polygon(rings: &[Vec<Position>]) -> Result<(), ValidationError> {
    non_empty(rings, "Polygon")?;
    for ring in rings {
        if ring.len() < 4 {
            return Err(ValidationError::InvalidGeometry {
                reason: format!("ring has {} positions, expected at least 4", ring.len()),
            });
        }
        ring.iter().try_for_each(|p| check_position(p))?;
        if ring.first() != ring.last() {
            return Err(ValidationError::InvalidGeometry {
                reason: "ring is not closed".to_string(),
            });
        }
    }
    Ok(())
}

/// GeoJSON feature with free-form properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Feature")]
pub struct Feature {
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: Geometry, properties: Map<String, Value>) -> Self {
        Self {
            geometry: Some(geometry),
            properties,
        }
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// GeoJSON feature collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "FeatureCollection")]
pub struct FeatureCollection {
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}
