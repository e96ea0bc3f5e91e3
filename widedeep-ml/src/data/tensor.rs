//! Feature values and batched feature tensors.

use crate::data::schema::{ColumnType, FeatureSpec};
use crate::error::MlError;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single transformed feature value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Int(i64),
    Float(f64),
}

impl FeatureValue {
    /// Read a JSON value as the declared dtype.
    pub fn from_json(spec: &FeatureSpec, value: &serde_json::Value) -> Result<Self, MlError> {
        match spec.dtype {
            ColumnType::Float => value.as_f64().map(FeatureValue::Float).ok_or_else(|| {
                MlError::dataset(format!("feature '{}' expects a number, got {value}", spec.name))
            }),
            ColumnType::Integer => as_integer(value).map(FeatureValue::Int).ok_or_else(|| {
                MlError::dataset(format!(
                    "feature '{}' expects an integer, got {value}",
                    spec.name
                ))
            }),
            ColumnType::String => Err(MlError::dataset(format!(
                "feature '{}' is a string feature and cannot be batched",
                spec.name
            ))),
        }
    }
}

/// Integers may arrive as `3` or `3.0`.
pub(crate) fn as_integer(value: &serde_json::Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    value
        .as_f64()
        .filter(|f| f.fract() == 0.0 && f.is_finite())
        .map(|f| f as i64)
}

/// One column of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    Float(Array1<f64>),
    Int(Array1<i64>),
}

impl Tensor {
    pub fn len(&self) -> usize {
        match self {
            Tensor::Float(a) => a.len(),
            Tensor::Int(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stack per-example values of one feature into a column.
    pub fn stack(spec: &FeatureSpec, values: &[FeatureValue]) -> Result<Self, MlError> {
        match spec.dtype {
            ColumnType::Float => Ok(Tensor::Float(
                values
                    .iter()
                    .map(|v| match v {
                        FeatureValue::Float(f) => *f,
                        FeatureValue::Int(i) => *i as f64,
                    })
                    .collect(),
            )),
            ColumnType::Integer => values
                .iter()
                .map(|v| match v {
                    FeatureValue::Int(i) => Ok(*i),
                    FeatureValue::Float(f) => Err(MlError::dataset(format!(
                        "feature '{}' expects integers, got {f}",
                        spec.name
                    ))),
                })
                .collect::<Result<Array1<i64>, _>>()
                .map(Tensor::Int),
            ColumnType::String => Err(MlError::dataset(format!(
                "feature '{}' is a string feature and cannot be batched",
                spec.name
            ))),
        }
    }

    /// Contiguous slice of rows `[start, end)`.
    pub fn slice_rows(&self, start: usize, end: usize) -> Self {
        match self {
            Tensor::Float(a) => Tensor::Float(a.slice(ndarray::s![start..end]).to_owned()),
            Tensor::Int(a) => Tensor::Int(a.slice(ndarray::s![start..end]).to_owned()),
        }
    }
}

/// Named feature columns, all of the same length.
pub type FeatureMap = BTreeMap<String, Tensor>;

/// Slice every column of a feature map.
pub fn slice_features(features: &FeatureMap, start: usize, end: usize) -> FeatureMap {
    features
        .iter()
        .map(|(name, t)| (name.clone(), t.slice_rows(start, end)))
        .collect()
}
