//! Servable directory: model graph, weights and the embedded transform.
//!
//! ```text
//! <dir>/saved_model.json          signatures, architecture, weight digest
//! <dir>/variables/variables.json  trained weights
//! <dir>/assets/transform_fn.json  transform function
//! ```

use crate::data::transform::{FeatureTransform, TransformArtifact};
use crate::error::MlError;
use crate::features::FeatureCatalog;
use crate::model::{ModelArchitecture, ModelVariables, WideDeepModel};
use crate::persistence::{atomic_write, atomic_write_json, hash_bytes, read_json};
use crate::serving::function::{
    SERVING_INPUT, SERVING_OUTPUT, SERVING_SIGNATURE, ServingFunction, get_serve_tf_examples_fn,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub const SAVED_MODEL_FILE: &str = "saved_model.json";
pub const VARIABLES_DIR: &str = "variables";
pub const VARIABLES_FILE: &str = "variables.json";
pub const ASSETS_DIR: &str = "assets";
pub const TRANSFORM_ASSET_FILE: &str = "transform_fn.json";

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: String,
    /// `None` marks the batch dimension.
    pub shape: Vec<Option<usize>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureDef {
    pub inputs: BTreeMap<String, TensorSpec>,
    pub outputs: BTreeMap<String, TensorSpec>,
}

/// Contents of `saved_model.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedModel {
    pub format_version: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub signatures: BTreeMap<String, SignatureDef>,
    pub architecture: ModelArchitecture,
    pub catalog: FeatureCatalog,
    /// SHA-256 of `variables/variables.json`.
    pub variables_sha256: String,
}

fn serving_signature(num_classes: usize) -> SignatureDef {
    SignatureDef {
        inputs: BTreeMap::from([(
            SERVING_INPUT.to_string(),
            TensorSpec {
                dtype: "string".into(),
                shape: vec![None],
            },
        )]),
        outputs: BTreeMap::from([(
            SERVING_OUTPUT.to_string(),
            TensorSpec {
                dtype: "float64".into(),
                shape: vec![None, Some(num_classes)],
            },
        )]),
    }
}

/// Save the model with the `serving_default` signature.
pub fn save_servable(
    dir: &Path,
    model: &WideDeepModel,
    artifact: &TransformArtifact,
    catalog: &FeatureCatalog,
) -> Result<SavedModel, MlError> {
    let variables = serde_json::to_vec_pretty(&model.variables())?;
    atomic_write(&dir.join(VARIABLES_DIR).join(VARIABLES_FILE), &variables)?;
    atomic_write_json(
        &dir.join(ASSETS_DIR).join(TRANSFORM_ASSET_FILE),
        &artifact.transforms(),
    )?;

    let architecture = model.architecture().clone();
    let saved = SavedModel {
        format_version: FORMAT_VERSION,
        created_at: chrono::Utc::now(),
        signatures: BTreeMap::from([(
            SERVING_SIGNATURE.to_string(),
            serving_signature(architecture.num_classes),
        )]),
        architecture,
        catalog: catalog.clone(),
        variables_sha256: hash_bytes(&variables),
    };
    // Written last so a complete manifest implies complete weights.
    atomic_write_json(&dir.join(SAVED_MODEL_FILE), &saved)?;
    tracing::info!(
        dir = %dir.display(),
        signature = SERVING_SIGNATURE,
        sha256 = %saved.variables_sha256,
        "Exported servable"
    );
    Ok(saved)
}

/// Restore the serving function of a servable directory.
pub fn load_servable(dir: &Path) -> Result<ServingFunction, MlError> {
    let saved: SavedModel = read_json(&dir.join(SAVED_MODEL_FILE))?;
    if saved.format_version != FORMAT_VERSION {
        return Err(MlError::serving(format!(
            "unsupported servable format version {}",
            saved.format_version
        )));
    }
    if !saved.signatures.contains_key(SERVING_SIGNATURE) {
        return Err(MlError::serving(format!(
            "servable has no '{SERVING_SIGNATURE}' signature"
        )));
    }

    let variables_path = dir.join(VARIABLES_DIR).join(VARIABLES_FILE);
    if !variables_path.exists() {
        return Err(MlError::not_found(variables_path.display().to_string()));
    }
    let bytes = std::fs::read(&variables_path)?;
    let digest = hash_bytes(&bytes);
    if digest != saved.variables_sha256 {
        return Err(MlError::serving(format!(
            "variables digest mismatch: expected {}, found {digest}",
            saved.variables_sha256
        )));
    }
    let variables: ModelVariables = serde_json::from_slice(&bytes)?;

    let transforms: Vec<FeatureTransform> =
        read_json(&dir.join(ASSETS_DIR).join(TRANSFORM_ASSET_FILE))?;
    let artifact = TransformArtifact::from_transforms(transforms)?;
    let model = WideDeepModel::from_parts(saved.architecture, variables)?;

    tracing::info!(dir = %dir.display(), "Loaded servable");
    Ok(get_serve_tf_examples_fn(Arc::new(model), &artifact, &saved.catalog))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::build_keras_model;
    use crate::tuning::HyperParameters;
    use serde_json::json;
    use tempfile::TempDir;

    fn fixture() -> (TransformArtifact, FeatureCatalog, WideDeepModel) {
        let artifact = TransformArtifact::from_transforms(vec![
            FeatureTransform::ZScore {
                input: "a".into(),
                output: "a_xf".into(),
                mean: 0.0,
                std_dev: 1.0,
            },
            FeatureTransform::Identity {
                input: "c".into(),
                output: "c_xf".into(),
                num_buckets: 4,
            },
            FeatureTransform::Identity {
                input: "y".into(),
                output: "y_xf".into(),
                num_buckets: 2,
            },
        ])
        .unwrap();
        let catalog = FeatureCatalog::new("y", &["a"], &["c"], 2);
        let model = build_keras_model(&HyperParameters::default(), &artifact, &catalog).unwrap();
        (artifact, catalog, model)
    }

    #[test]
    fn test_save_and_load_predict_the_same() {
        let dir = TempDir::new().unwrap();
        let (artifact, catalog, model) = fixture();
        let saved = save_servable(dir.path(), &model, &artifact, &catalog).unwrap();
        assert!(saved.signatures.contains_key("serving_default"));
        assert!(dir.path().join("variables/variables.json").exists());
        assert!(dir.path().join("assets/transform_fn.json").exists());

        let loaded = load_servable(dir.path()).unwrap();
        let examples = vec![json!({"a": 0.25, "c": 3}).to_string()];
        let direct = get_serve_tf_examples_fn(Arc::new(model), &artifact, &catalog)
            .call(&examples)
            .unwrap();
        assert_eq!(loaded.call(&examples).unwrap(), direct);
    }

    #[test]
    fn test_tampered_variables_rejected() {
        let dir = TempDir::new().unwrap();
        let (artifact, catalog, model) = fixture();
        save_servable(dir.path(), &model, &artifact, &catalog).unwrap();
        let path = dir.path().join(VARIABLES_DIR).join(VARIABLES_FILE);
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push('\n');
        std::fs::write(&path, content).unwrap();
        assert!(matches!(load_servable(dir.path()), Err(MlError::Serving(_))));
    }

    #[test]
    fn test_missing_servable_is_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(load_servable(dir.path()), Err(MlError::NotFound(_))));
    }
}
