use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// MetadataValue – one extra column of a curve table
// ---------------------------------------------------------------------------

/// A dynamically-typed metadata cell (temperature, speed, sample name, ...).
/// Kept in `BTreeSet`s by the dataset index, so it must be `Ord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Null,
}

impl MetadataValue {
    fn rank(&self) -> u8 {
        match self {
            MetadataValue::Null => 0,
            MetadataValue::Bool(_) => 1,
            MetadataValue::Integer(_) => 2,
            MetadataValue::Float(_) => 3,
            MetadataValue::Text(_) => 4,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl Eq for MetadataValue {}

impl PartialOrd for MetadataValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetadataValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (MetadataValue::Bool(a), MetadataValue::Bool(b)) => a.cmp(b),
            (MetadataValue::Integer(a), MetadataValue::Integer(b)) => a.cmp(b),
            (MetadataValue::Float(a), MetadataValue::Float(b)) => a.total_cmp(b),
            (MetadataValue::Text(a), MetadataValue::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Text(s) => write!(f, "{s}"),
            MetadataValue::Null => write!(f, ""),
        }
    }
}

// ---------------------------------------------------------------------------
// Axis units
// ---------------------------------------------------------------------------

/// Factor converting a position unit to metres.
pub fn length_scale(unit: &str) -> Option<f64> {
    match unit.trim() {
        "m" => Some(1.0),
        "um" | "µm" | "μm" => Some(1e-6),
        "nm" => Some(1e-9),
        "pm" => Some(1e-12),
        _ => None,
    }
}

/// Factor converting a force unit to newtons.
pub fn force_scale(unit: &str) -> Option<f64> {
    match unit.trim() {
        "N" => Some(1.0),
        "nN" => Some(1e-9),
        "pN" => Some(1e-12),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Curve – one force-distance trace
// ---------------------------------------------------------------------------

/// One force curve: piezo position and cantilever deflection (as force).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    /// Identity used by the contact-point cache and in exported rows.
    pub id: String,
    pub x: Vec<f64>,
    /// Same length as `x`.
    pub y: Vec<f64>,
    pub x_unit: String,
    pub y_unit: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl Curve {
    /// A curve already in SI units.
    pub fn new(id: impl Into<String>, x: Vec<f64>, y: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            x_unit: "m".to_string(),
            y_unit: "N".to_string(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_units(mut self, x_unit: impl Into<String>, y_unit: impl Into<String>) -> Self {
        self.x_unit = x_unit.into();
        self.y_unit = y_unit.into();
        self
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Position (m) and force (N) arrays.
    pub fn to_si(&self) -> Result<(Vec<f64>, Vec<f64>)> {
        if self.x.len() != self.y.len() {
            return Err(Error::insufficient(format!(
                "curve '{}': x has {} values but y has {}",
                self.id,
                self.x.len(),
                self.y.len()
            )));
        }
        let sx = length_scale(&self.x_unit)
            .ok_or_else(|| Error::config(format!("curve '{}': unknown position unit '{}'", self.id, self.x_unit)))?;
        let sy = force_scale(&self.y_unit)
            .ok_or_else(|| Error::config(format!("curve '{}': unknown force unit '{}'", self.id, self.y_unit)))?;
        Ok((
            self.x.iter().map(|v| v * sx).collect(),
            self.y.iter().map(|v| v * sy).collect(),
        ))
    }
}

// ---------------------------------------------------------------------------
// CurveDataset – every curve of one loaded file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CurveDataset {
    pub curves: Vec<Curve>,
    /// Ordered metadata column names.
    pub column_names: Vec<String>,
    /// Sorted unique values per metadata column.
    pub unique_values: BTreeMap<String, BTreeSet<MetadataValue>>,
}

impl CurveDataset {
    /// Build column indices from the loaded curves.
    pub fn from_curves(curves: Vec<Curve>) -> Self {
        let mut unique_values: BTreeMap<String, BTreeSet<MetadataValue>> = BTreeMap::new();
        for curve in &curves {
            for (col, val) in &curve.metadata {
                unique_values.entry(col.clone()).or_default().insert(val.clone());
            }
        }
        let column_names = unique_values.keys().cloned().collect();
        CurveDataset {
            curves,
            column_names,
            unique_values,
        }
    }

    pub fn len(&self) -> usize {
        self.curves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Curve> {
        self.curves.iter().find(|c| c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_si() {
        let curve = Curve::new("c", vec![0.0, 2.0], vec![1.0, -3.0]).with_units("nm", "pN");
        let (x, y) = curve.to_si().unwrap();
        assert_eq!(x, vec![0.0, 2e-9]);
        assert_eq!(y, vec![1e-12, -3e-12]);
    }

    #[test]
    fn unknown_unit_is_configuration_error() {
        let curve = Curve::new("c", vec![0.0], vec![0.0]).with_units("nm", "V");
        assert!(matches!(curve.to_si(), Err(Error::Configuration(_))));
    }

    #[test]
    fn dataset_indexes_metadata() {
        let mut a = Curve::new("a", vec![], vec![]);
        a.metadata.insert("speed".into(), MetadataValue::Float(1.0));
        let mut b = Curve::new("b", vec![], vec![]);
        b.metadata.insert("speed".into(), MetadataValue::Float(0.5));
        b.metadata.insert("sample".into(), MetadataValue::Text("titin".into()));
        let ds = CurveDataset::from_curves(vec![a, b]);
        assert_eq!(ds.column_names, vec!["sample".to_string(), "speed".to_string()]);
        assert_eq!(ds.unique_values["speed"].len(), 2);
        assert!(ds.get("b").is_some());
        assert!(ds.get("z").is_none());
    }

    #[test]
    fn metadata_ordering_groups_by_kind() {
        let mut v = vec![
            MetadataValue::Text("x".into()),
            MetadataValue::Float(2.0),
            MetadataValue::Null,
            MetadataValue::Integer(3),
        ];
        v.sort();
        assert_eq!(v[0], MetadataValue::Null);
        assert_eq!(v[3], MetadataValue::Text("x".into()));
    }
}
