//! Signal metadata for input, measurement and forecast points.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::{BoptestError, BoptestResult};

/// Which descriptor list to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointCategory {
    Inputs,
    Measurements,
    Forecast,
}

impl PointCategory {
    /// Service path segment for this category.
    pub fn service(self) -> &'static str {
        match self {
            Self::Inputs => "inputs",
            Self::Measurements => "measurements",
            Self::Forecast => "forecast_points",
        }
    }
}

impl fmt::Display for PointCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service())
    }
}

/// Description of one named signal.
///
/// Fields the server reports as `null` (or omits) are `None`; they are
/// never replaced by zero or an empty string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointDescriptor {
    pub name: String,
    pub unit: Option<String>,
    pub description: Option<String>,
    /// Lower bound, reported for inputs only.
    pub minimum: Option<f64>,
    /// Upper bound, reported for inputs only.
    pub maximum: Option<f64>,
}

impl PointDescriptor {
    /// Creates a descriptor with every optional field missing.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: None,
            description: None,
            minimum: None,
            maximum: None,
        }
    }
}

/// Parses a `name -> {Unit, Description, Minimum, Maximum}` payload.
///
/// The result is sorted by name so descriptor order is stable across calls.
///
/// # Errors
///
/// Returns `DataShape` if the payload is not an object of objects.
pub fn parse_points(payload: &Value) -> BoptestResult<Vec<PointDescriptor>> {
    let map = payload
        .as_object()
        .ok_or_else(|| BoptestError::shape("point list is not a JSON object"))?;

    let mut points = Vec::with_capacity(map.len());
    for (name, desc) in map {
        let fields = desc
            .as_object()
            .ok_or_else(|| BoptestError::shape(format!("descriptor of `{name}` is not an object")))?;
        points.push(PointDescriptor {
            name: name.clone(),
            unit: text_field(fields.get("Unit")),
            description: text_field(fields.get("Description")),
            minimum: number_field(fields.get("Minimum")),
            maximum: number_field(fields.get("Maximum")),
        });
    }
    points.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(points)
}

/// Names of the given descriptors, in order.
pub fn names(points: &[PointDescriptor]) -> Vec<String> {
    points.iter().map(|p| p.name.clone()).collect()
}

fn text_field(v: Option<&Value>) -> Option<String> {
    match v {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

fn number_field(v: Option<&Value>) -> Option<f64> {
    match v {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}
