//! Transform artifact: the transformed-feature schema, per-feature bucket
//! counts and the raw-to-transformed feature function.
//!
//! On disk an artifact is a directory:
//!
//! ```text
//! <path>/transformed_metadata/schema.json
//! <path>/transform_fn/transform_fn.json
//! ```

use crate::data::schema::{ColumnType, FeatureSpec, SchemaDefinition, infer_column_type};
use crate::data::tensor::{FeatureMap, FeatureValue, Tensor, as_integer};
use crate::error::MlError;
use crate::features::FeatureCatalog;
use crate::persistence::{atomic_write_json, read_json};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const TRANSFORMED_METADATA_DIR: &str = "transformed_metadata";
pub const TRANSFORM_FN_DIR: &str = "transform_fn";
const SCHEMA_FILE: &str = "schema.json";
const TRANSFORM_FN_FILE: &str = "transform_fn.json";

/// A raw record as parsed from an encoded example.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// How one raw feature becomes one transformed feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureTransform {
    /// `(x - mean) / std_dev`.
    ZScore {
        input: String,
        output: String,
        mean: f64,
        std_dev: f64,
    },
    /// String to vocabulary index; unknown values land in the OOV bucket(s),
    /// or `-1` when there are none.
    Vocabulary {
        input: String,
        output: String,
        vocabulary: Vec<String>,
        #[serde(default)]
        num_oov_buckets: usize,
    },
    /// Integer ids passed through unchanged.
    Identity {
        input: String,
        output: String,
        num_buckets: usize,
    },
}

impl FeatureTransform {
    pub fn input(&self) -> &str {
        match self {
            Self::ZScore { input, .. }
            | Self::Vocabulary { input, .. }
            | Self::Identity { input, .. } => input,
        }
    }

    pub fn output(&self) -> &str {
        match self {
            Self::ZScore { output, .. }
            | Self::Vocabulary { output, .. }
            | Self::Identity { output, .. } => output,
        }
    }

    /// Spec of the raw feature this transform reads.
    pub fn raw_spec(&self) -> FeatureSpec {
        match self {
            Self::ZScore { input, .. } => FeatureSpec::float(input),
            Self::Vocabulary { input, .. } => FeatureSpec::string(input),
            Self::Identity { input, .. } => FeatureSpec::integer(input, None),
        }
    }

    /// Spec of the transformed feature this transform writes.
    pub fn transformed_spec(&self) -> FeatureSpec {
        match self {
            Self::ZScore { output, .. } => FeatureSpec::float(output),
            Self::Vocabulary {
                output,
                vocabulary,
                num_oov_buckets,
                ..
            } => FeatureSpec::integer(output, Some(vocabulary.len() + num_oov_buckets)),
            Self::Identity {
                output,
                num_buckets,
                ..
            } => FeatureSpec::integer(output, Some(*num_buckets)),
        }
    }

    fn apply(&self, value: &serde_json::Value) -> Result<FeatureValue, MlError> {
        match self {
            Self::ZScore {
                input,
                mean,
                std_dev,
                ..
            } => {
                let x = value.as_f64().ok_or_else(|| {
                    MlError::transform(format!("'{input}' expects a number, got {value}"))
                })?;
                let centered = x - mean;
                let scaled = if *std_dev > 0.0 {
                    centered / std_dev
                } else {
                    centered
                };
                Ok(FeatureValue::Float(scaled))
            }
            Self::Vocabulary {
                vocabulary,
                num_oov_buckets,
                ..
            } => {
                let token = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let id = match vocabulary.iter().position(|v| *v == token) {
                    Some(idx) => idx as i64,
                    None if *num_oov_buckets > 0 => {
                        (vocabulary.len() + oov_bucket(&token, *num_oov_buckets)) as i64
                    }
                    None => -1,
                };
                Ok(FeatureValue::Int(id))
            }
            Self::Identity { input, .. } => as_integer(value).map(FeatureValue::Int).ok_or_else(|| {
                MlError::transform(format!("'{input}' expects an integer id, got {value}"))
            }),
        }
    }
}

/// Stable OOV bucket assignment (FNV-1a).
fn oov_bucket(token: &str, num_oov_buckets: usize) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % num_oov_buckets as u64) as usize
}

/// Callable mapping raw records to transformed features.
#[derive(Debug, Clone)]
pub struct TransformFn {
    transforms: Arc<Vec<FeatureTransform>>,
}

impl TransformFn {
    /// Same function without the transform reading `input`.
    ///
    /// Serving uses this to drop the label, which raw serving records lack.
    pub fn without_input(&self, input: &str) -> Self {
        Self {
            transforms: Arc::new(
                self.transforms
                    .iter()
                    .filter(|t| t.input() != input)
                    .cloned()
                    .collect(),
            ),
        }
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.transforms.iter().map(|t| t.output()).collect()
    }

    /// Transform one record. Every raw input must be present.
    pub fn apply_record(&self, record: &RawRecord) -> Result<BTreeMap<String, FeatureValue>, MlError> {
        self.transforms
            .iter()
            .map(|t| {
                let raw = record.get(t.input()).ok_or_else(|| {
                    MlError::transform(format!("raw record is missing feature '{}'", t.input()))
                })?;
                Ok((t.output().to_string(), t.apply(raw)?))
            })
            .collect()
    }

    /// Transform a batch of records into feature columns.
    pub fn apply_batch(&self, records: &[RawRecord]) -> Result<FeatureMap, MlError> {
        let rows = records
            .iter()
            .map(|r| self.apply_record(r))
            .collect::<Result<Vec<_>, _>>()?;

        let mut columns = FeatureMap::new();
        for t in self.transforms.iter() {
            let spec = t.transformed_spec();
            let values: Vec<FeatureValue> = rows.iter().map(|row| row[t.output()]).collect();
            columns.insert(spec.name.clone(), Tensor::stack(&spec, &values)?);
        }
        Ok(columns)
    }

    /// Transform a record into a JSON object of transformed features, the
    /// format the JSON-lines accessor reads back.
    pub fn apply_to_json(&self, record: &RawRecord) -> Result<RawRecord, MlError> {
        let row = self.apply_record(record)?;
        let mut out = RawRecord::new();
        for (name, value) in row {
            out.insert(name, serde_json::to_value(value)?);
        }
        Ok(out)
    }
}

/// Handle to a loaded transform artifact. Read-only once loaded.
#[derive(Debug, Clone)]
pub struct TransformArtifact {
    path: Option<PathBuf>,
    schema: SchemaDefinition,
    transforms: Vec<FeatureTransform>,
}

impl TransformArtifact {
    /// Build an artifact from transforms; the schema is derived from them.
    pub fn from_transforms(transforms: Vec<FeatureTransform>) -> Result<Self, MlError> {
        let mut seen = std::collections::HashSet::new();
        for t in &transforms {
            if !seen.insert(t.output().to_string()) {
                return Err(MlError::transform(format!(
                    "duplicate transformed feature '{}'",
                    t.output()
                )));
            }
        }
        let schema = SchemaDefinition::new(transforms.iter().map(|t| t.transformed_spec()).collect());
        Ok(Self {
            path: None,
            schema,
            transforms,
        })
    }

    /// Load an artifact directory.
    pub fn load(path: &Path) -> Result<Self, MlError> {
        if !path.is_dir() {
            return Err(MlError::not_found(format!(
                "transform artifact {}",
                path.display()
            )));
        }
        let schema: SchemaDefinition =
            read_json(&path.join(TRANSFORMED_METADATA_DIR).join(SCHEMA_FILE))?;
        let transforms: Vec<FeatureTransform> =
            read_json(&path.join(TRANSFORM_FN_DIR).join(TRANSFORM_FN_FILE))?;

        for t in &transforms {
            let expected = t.transformed_spec();
            match schema.get(t.output()) {
                Some(spec) if spec.dtype == expected.dtype && spec.num_buckets == expected.num_buckets => {}
                Some(_) => {
                    return Err(MlError::transform(format!(
                        "schema entry for '{}' disagrees with its transform",
                        t.output()
                    )));
                }
                None => {
                    return Err(MlError::transform(format!(
                        "transform output '{}' is missing from the schema",
                        t.output()
                    )));
                }
            }
        }

        tracing::info!(
            path = %path.display(),
            features = schema.len(),
            "Loaded transform artifact"
        );
        Ok(Self {
            path: Some(path.to_path_buf()),
            schema,
            transforms,
        })
    }

    /// Write the artifact directory layout.
    pub fn write(&self, path: &Path) -> Result<(), MlError> {
        atomic_write_json(
            &path.join(TRANSFORMED_METADATA_DIR).join(SCHEMA_FILE),
            &self.schema,
        )?;
        atomic_write_json(
            &path.join(TRANSFORM_FN_DIR).join(TRANSFORM_FN_FILE),
            &self.transforms,
        )?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn transformed_schema(&self) -> &SchemaDefinition {
        &self.schema
    }

    pub fn transforms(&self) -> &[FeatureTransform] {
        &self.transforms
    }

    /// Spec of the raw features the transform function reads.
    pub fn raw_feature_spec(&self) -> SchemaDefinition {
        SchemaDefinition::new(self.transforms.iter().map(|t| t.raw_spec()).collect())
    }

    /// Vocabulary size of an integerized transformed feature.
    pub fn num_buckets_for_transformed_feature(&self, name: &str) -> Result<usize, MlError> {
        let spec = self.schema.get(name).ok_or_else(|| {
            MlError::model(format!("feature '{name}' is not in the transformed schema"))
        })?;
        spec.num_buckets.ok_or_else(|| {
            MlError::model(format!("feature '{name}' has no bucket count"))
        })
    }

    pub fn transform_features_fn(&self) -> TransformFn {
        TransformFn {
            transforms: Arc::new(self.transforms.clone()),
        }
    }

    /// Fit transform statistics from raw records: z-score statistics for
    /// numeric keys, vocabularies for string categoricals, identity buckets
    /// for integer categoricals and the label.
    pub fn analyze(catalog: &FeatureCatalog, records: &[RawRecord]) -> Result<Self, MlError> {
        if records.is_empty() {
            return Err(MlError::transform("cannot analyze an empty record set"));
        }

        let mut transforms = Vec::new();
        for key in &catalog.numeric_feature_keys {
            let values = column(records, key)?
                .iter()
                .map(|v| {
                    v.as_f64().ok_or_else(|| {
                        MlError::transform(format!("numeric feature '{key}' has value {v}"))
                    })
                })
                .collect::<Result<Vec<f64>, _>>()?;
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
            transforms.push(FeatureTransform::ZScore {
                input: key.clone(),
                output: catalog.transformed_name(key),
                mean,
                std_dev: variance.sqrt(),
            });
        }

        for key in &catalog.categorical_feature_keys {
            transforms.push(categorical_transform(catalog, records, key, 1)?);
        }

        let label = categorical_transform(catalog, records, &catalog.label_key, 0)?;
        let label_buckets = label.transformed_spec().num_buckets.unwrap_or(0);
        if label_buckets > catalog.num_classes {
            return Err(MlError::transform(format!(
                "label '{}' has {label_buckets} values but the catalog declares {} classes",
                catalog.label_key, catalog.num_classes
            )));
        }
        transforms.push(label);

        Self::from_transforms(transforms)
    }
}

fn column<'a>(records: &'a [RawRecord], key: &str) -> Result<Vec<&'a serde_json::Value>, MlError> {
    records
        .iter()
        .map(|r| {
            r.get(key)
                .ok_or_else(|| MlError::transform(format!("raw record is missing feature '{key}'")))
        })
        .collect()
}

fn categorical_transform(
    catalog: &FeatureCatalog,
    records: &[RawRecord],
    key: &str,
    num_oov_buckets: usize,
) -> Result<FeatureTransform, MlError> {
    let values: Vec<serde_json::Value> = column(records, key)?.into_iter().cloned().collect();
    let output = catalog.transformed_name(key);

    match infer_column_type(&values) {
        Some(ColumnType::String) => {
            let mut counts: HashMap<String, usize> = HashMap::new();
            for v in &values {
                let token = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                *counts.entry(token).or_default() += 1;
            }
            let mut vocabulary: Vec<(String, usize)> = counts.into_iter().collect();
            vocabulary.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            Ok(FeatureTransform::Vocabulary {
                input: key.to_string(),
                output,
                vocabulary: vocabulary.into_iter().map(|(token, _)| token).collect(),
                num_oov_buckets,
            })
        }
        Some(ColumnType::Integer) => {
            let mut max_id = 0i64;
            for v in &values {
                let id = as_integer(v).ok_or_else(|| {
                    MlError::transform(format!("categorical feature '{key}' has value {v}"))
                })?;
                if id < 0 {
                    return Err(MlError::transform(format!(
                        "categorical feature '{key}' has negative id {id}"
                    )));
                }
                max_id = max_id.max(id);
            }
            Ok(FeatureTransform::Identity {
                input: key.to_string(),
                output,
                num_buckets: max_id as usize + 1,
            })
        }
        _ => Err(MlError::transform(format!(
            "categorical feature '{key}' must hold strings or integer ids"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(value: serde_json::Value) -> RawRecord {
        value.as_object().unwrap().clone()
    }

    fn small_catalog() -> FeatureCatalog {
        FeatureCatalog::new("label", &["x"], &["area"], 3)
    }

    fn small_records() -> Vec<RawRecord> {
        vec![
            record(json!({"x": 1.0, "area": "north", "label": 0})),
            record(json!({"x": 3.0, "area": "south", "label": 2})),
            record(json!({"x": 5.0, "area": "north", "label": 1})),
        ]
    }

    #[test]
    fn test_analyze_builds_schema() {
        let artifact = TransformArtifact::analyze(&small_catalog(), &small_records()).unwrap();
        let schema = artifact.transformed_schema();
        assert_eq!(schema.names(), vec!["x_xf", "area_xf", "label_xf"]);
        // two tokens plus one OOV bucket
        assert_eq!(artifact.num_buckets_for_transformed_feature("area_xf").unwrap(), 3);
        assert_eq!(artifact.num_buckets_for_transformed_feature("label_xf").unwrap(), 3);
        assert!(artifact.num_buckets_for_transformed_feature("x_xf").is_err());
    }

    #[test]
    fn test_vocabulary_orders_by_frequency() {
        let artifact = TransformArtifact::analyze(&small_catalog(), &small_records()).unwrap();
        let f = artifact.transform_features_fn();
        let row = f
            .apply_record(&record(json!({"x": 3.0, "area": "north", "label": 1})))
            .unwrap();
        assert_eq!(row["area_xf"], FeatureValue::Int(0));
        assert_eq!(row["x_xf"], FeatureValue::Float(0.0));
    }

    #[test]
    fn test_unknown_token_goes_to_oov_bucket() {
        let artifact = TransformArtifact::analyze(&small_catalog(), &small_records()).unwrap();
        let f = artifact.transform_features_fn();
        let row = f
            .apply_record(&record(json!({"x": 0.0, "area": "east", "label": 0})))
            .unwrap();
        assert_eq!(row["area_xf"], FeatureValue::Int(2));
    }

    #[test]
    fn test_without_input_skips_label() {
        let artifact = TransformArtifact::analyze(&small_catalog(), &small_records()).unwrap();
        let f = artifact.transform_features_fn().without_input("label");
        let batch = f
            .apply_batch(&[record(json!({"x": 1.0, "area": "south"}))])
            .unwrap();
        assert!(!batch.contains_key("label_xf"));
        assert_eq!(batch["x_xf"].len(), 1);
    }

    #[test]
    fn test_missing_raw_feature_fails() {
        let artifact = TransformArtifact::analyze(&small_catalog(), &small_records()).unwrap();
        let f = artifact.transform_features_fn();
        assert!(f.apply_record(&record(json!({"x": 1.0}))).is_err());
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let artifact = TransformArtifact::analyze(&small_catalog(), &small_records()).unwrap();
        artifact.write(dir.path()).unwrap();

        let loaded = TransformArtifact::load(dir.path()).unwrap();
        assert_eq!(loaded.transformed_schema(), artifact.transformed_schema());
        assert_eq!(loaded.path(), Some(dir.path()));
    }

    #[test]
    fn test_load_missing_path() {
        let err = TransformArtifact::load(Path::new("/nonexistent/transform")).unwrap_err();
        assert!(matches!(err, MlError::NotFound(_)));
    }

    #[test]
    fn test_load_malformed_schema() {
        let dir = TempDir::new().unwrap();
        let meta = dir.path().join(TRANSFORMED_METADATA_DIR);
        std::fs::create_dir_all(&meta).unwrap();
        std::fs::write(meta.join(SCHEMA_FILE), "not json").unwrap();
        let err = TransformArtifact::load(dir.path()).unwrap_err();
        assert!(matches!(err, MlError::Serde(_)));
    }

    #[test]
    fn test_label_with_too_many_classes_rejected() {
        let catalog = FeatureCatalog::new("label", &["x"], &[], 2);
        let records = vec![
            record(json!({"x": 1.0, "label": 0})),
            record(json!({"x": 2.0, "label": 4})),
        ];
        assert!(TransformArtifact::analyze(&catalog, &records).is_err());
    }
}
