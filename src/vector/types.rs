//! Vector and metadata value types.
//!
//! These are the values exchanged with a vector store: embeddings plus
//! flat scalar metadata. Lists have no native representation and are
//! carried as JSON-encoded strings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// An embedding vector tagged with the model that produced it.
///
/// Cloning is cheap; the component data is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    data: Arc<[f32]>,
    model: String,
}

impl Serialize for Vector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Vector", 2)?;
        state.serialize_field("data", &self.data.as_ref())?;
        state.serialize_field("model", &self.model)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Vector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct VectorData {
            data: Vec<f32>,
            model: String,
        }

        let helper = VectorData::deserialize(deserializer)?;
        Ok(Vector::new(helper.data, helper.model))
    }
}

impl Vector {
    pub fn new(data: Vec<f32>, model: impl Into<String>) -> Self {
        Self {
            data: Arc::from(data.into_boxed_slice()),
            model: model.into(),
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn dimensions(&self) -> usize {
        self.data.len()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn magnitude(&self) -> f32 {
        self.data.iter().map(|&x| x * x).sum::<f32>().sqrt()
    }

    /// Cosine similarity in [-1, 1], or `None` if dimensions differ.
    ///
    /// Zero vectors are orthogonal to everything.
    pub fn cosine_similarity(&self, other: &Vector) -> Option<f32> {
        if self.dimensions() != other.dimensions() {
            return None;
        }

        let dot_product: f32 = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .sum();

        let mag_a = self.magnitude();
        let mag_b = other.magnitude();
        if mag_a == 0.0 || mag_b == 0.0 {
            return Some(0.0);
        }

        Some((dot_product / (mag_a * mag_b)).clamp(-1.0, 1.0))
    }

    /// Cosine distance in [0, 2]: `1 - cosine_similarity`.
    pub fn cosine_distance(&self, other: &Vector) -> Option<f32> {
        self.cosine_similarity(other).map(|s| 1.0 - s)
    }

    pub fn is_compatible_with(&self, other: &Vector) -> bool {
        self.dimensions() == other.dimensions()
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vector(dims={}, model={})", self.dimensions(), self.model)
    }
}

/// A scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(f) => Some(*f),
            MetadataValue::Int(i) => Some(*i as f64),
            MetadataValue::Str(s) => s.parse().ok(),
            MetadataValue::Bool(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            MetadataValue::Float(f) => Some(*f as i64),
            MetadataValue::Str(s) => s.parse().ok(),
            MetadataValue::Bool(_) => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Str(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Str(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<f32> for MetadataValue {
    fn from(value: f32) -> Self {
        MetadataValue::Float(value as f64)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<u32> for MetadataValue {
    fn from(value: u32) -> Self {
        MetadataValue::Int(value as i64)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// Flat metadata attached to a stored document.
pub type Metadata = BTreeMap<String, MetadataValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let a = Vector::new(vec![1.0, 0.0], "m");
        let b = Vector::new(vec![0.0, 1.0], "m");
        assert!((a.cosine_similarity(&a).unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(a.cosine_similarity(&b), Some(0.0));
        assert!((a.cosine_distance(&b).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite_distance_is_two() {
        let a = Vector::new(vec![1.0, 1.0], "m");
        let b = Vector::new(vec![-1.0, -1.0], "m");
        assert!((a.cosine_distance(&b).unwrap() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_dimensions() {
        let a = Vector::new(vec![1.0, 0.0], "m");
        let b = Vector::new(vec![1.0, 0.0, 0.0], "m");
        assert_eq!(a.cosine_similarity(&b), None);
        assert!(!a.is_compatible_with(&b));
    }

    #[test]
    fn test_metadata_value_untagged_json() {
        let mut meta = Metadata::new();
        meta.insert("tier".into(), "short_term".into());
        meta.insert("count".into(), 3u32.into());
        meta.insert("confidence".into(), 0.5f64.into());

        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"confidence":0.5,"count":3,"tier":"short_term"}"#);

        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get("count").and_then(MetadataValue::as_i64), Some(3));
        assert_eq!(back.get("confidence").and_then(MetadataValue::as_f64), Some(0.5));
    }
}
