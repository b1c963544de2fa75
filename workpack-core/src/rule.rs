//! Filter rules deciding whether a row belongs to a work package.

use geo::{Geometry, Intersects, MultiPolygon};
use serde::{Deserialize, Serialize};
use wkt::TryFromWkt;

use crate::types::{Row, Value};

/// A scalar filter value as written in the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Text(String),
}

impl ScalarValue {
    /// Exact match against a cell. Integers and reals compare numerically;
    /// null, geometry and mismatched kinds never match.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (ScalarValue::Integer(a), Value::Integer(b)) => a == b,
            (ScalarValue::Integer(a), Value::Real(b)) => (*a as f64) == *b,
            (ScalarValue::Real(a), Value::Integer(b)) => *a == (*b as f64),
            (ScalarValue::Real(a), Value::Real(b)) => a == b,
            (ScalarValue::Boolean(a), Value::Boolean(b)) => a == b,
            (ScalarValue::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }
}

/// A work package's filter value: one scalar, or a list of accepted scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    One(ScalarValue),
    Many(Vec<ScalarValue>),
}

impl FilterValue {
    pub fn scalars(&self) -> Vec<ScalarValue> {
        match self {
            FilterValue::One(v) => vec![v.clone()],
            FilterValue::Many(vs) => vs.clone(),
        }
    }

    /// The value as a WKT literal, when it is a single text value.
    pub fn as_wkt(&self) -> Option<&str> {
        match self {
            FilterValue::One(ScalarValue::Text(s)) => Some(s),
            _ => None,
        }
    }
}

/// Membership predicate for one filtered table and one work package.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterRule {
    /// `column` equals any of `values`.
    ColumnEquals {
        column: String,
        values: Vec<ScalarValue>,
    },
    /// The geometry in `column` intersects `boundary` (boundary inclusive).
    Intersects {
        column: String,
        boundary: MultiPolygon<f64>,
    },
}

impl FilterRule {
    pub fn belongs_to(&self, row: &Row) -> bool {
        match self {
            FilterRule::ColumnEquals { column, values } => match row.get(column) {
                None | Some(Value::Null) => false,
                Some(cell) => values.iter().any(|v| v.matches(cell)),
            },
            FilterRule::Intersects { column, boundary } => {
                let wkt = match row.get(column) {
                    Some(Value::Geometry(wkt)) | Some(Value::Text(wkt)) => wkt,
                    _ => return false,
                };
                match Geometry::<f64>::try_from_wkt_str(wkt) {
                    Ok(geometry) => geometry.intersects(boundary),
                    Err(_) => false,
                }
            }
        }
    }

    pub fn column(&self) -> &str {
        match self {
            FilterRule::ColumnEquals { column, .. } | FilterRule::Intersects { column, .. } => column,
        }
    }
}

/// Parse a WKT polygon or multipolygon into a boundary.
pub fn parse_boundary(wkt: &str) -> Result<MultiPolygon<f64>, String> {
    let geometry = Geometry::<f64>::try_from_wkt_str(wkt).map_err(|e| e.to_string())?;
    match geometry {
        Geometry::Polygon(polygon) => Ok(MultiPolygon::new(vec![polygon])),
        Geometry::MultiPolygon(multi) => Ok(multi),
        Geometry::Rect(rect) => Ok(MultiPolygon::new(vec![rect.to_polygon()])),
        _ => Err("expected a POLYGON or MULTIPOLYGON".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
