//! Serving function: encoded raw records in, class probabilities out.

use crate::data::schema::SchemaDefinition;
use crate::data::transform::{RawRecord, TransformArtifact, TransformFn};
use crate::error::MlError;
use crate::features::FeatureCatalog;
use crate::model::WideDeepModel;
use std::sync::Arc;

pub const SERVING_SIGNATURE: &str = "serving_default";
pub const SERVING_INPUT: &str = "examples";
pub const SERVING_OUTPUT: &str = "output_0";

/// Frozen composition of record parsing, the transform function and the
/// trained model.
#[derive(Debug, Clone)]
pub struct ServingFunction {
    model: Arc<WideDeepModel>,
    transform: TransformFn,
    raw_spec: SchemaDefinition,
    label_key: String,
}

impl ServingFunction {
    pub fn model(&self) -> &WideDeepModel {
        &self.model
    }

    pub fn label_key(&self) -> &str {
        &self.label_key
    }

    /// Raw features a serving record must carry.
    pub fn raw_feature_spec(&self) -> &SchemaDefinition {
        &self.raw_spec
    }

    fn parse(&self, example: &str) -> Result<RawRecord, MlError> {
        let mut record = match serde_json::from_str::<serde_json::Value>(example) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(other) => {
                return Err(MlError::serving(format!(
                    "serialized example must be a JSON object, got {other}"
                )));
            }
            Err(e) => return Err(MlError::serving(format!("malformed serialized example: {e}"))),
        };
        record.remove(&self.label_key);
        for spec in &self.raw_spec.features {
            if !record.contains_key(&spec.name) {
                return Err(MlError::serving(format!(
                    "serialized example is missing feature '{}'",
                    spec.name
                )));
            }
        }
        Ok(record)
    }

    /// Class probabilities for a batch of serialized raw records. The label,
    /// when present, is ignored.
    pub fn call(&self, examples: &[String]) -> Result<Vec<Vec<f64>>, MlError> {
        if examples.is_empty() {
            return Ok(Vec::new());
        }
        let records = examples
            .iter()
            .map(|e| self.parse(e))
            .collect::<Result<Vec<_>, _>>()?;
        let features = self.transform.apply_batch(&records)?;
        let probs = self.model.predict(&features)?;
        Ok(probs.rows().into_iter().map(|row| row.to_vec()).collect())
    }

    /// `{"output_0": [[...], ...]}` for a `{"examples": [...]}` request.
    pub fn call_signature(&self, request: &serde_json::Value) -> Result<serde_json::Value, MlError> {
        let examples = request
            .get(SERVING_INPUT)
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                MlError::serving(format!("request must carry an '{SERVING_INPUT}' array"))
            })?
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<String>>();
        let outputs = self.call(&examples)?;
        Ok(serde_json::json!({ SERVING_OUTPUT: outputs }))
    }
}

/// Compose the serving function for a trained model.
///
/// Raw records are parsed against the artifact's raw feature spec minus the
/// label, transformed, then fed to the model.
pub fn get_serve_tf_examples_fn(
    model: Arc<WideDeepModel>,
    artifact: &TransformArtifact,
    catalog: &FeatureCatalog,
) -> ServingFunction {
    let label_key = catalog.label_key.clone();
    ServingFunction {
        transform: artifact.transform_features_fn().without_input(&label_key),
        raw_spec: artifact.raw_feature_spec().without(&label_key),
        model,
        label_key,
    }
}
