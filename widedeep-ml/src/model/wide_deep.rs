//! Wide-and-deep multi-class classifier.
//!
//! Numeric inputs feed a stack of dense layers (the deep branch). Every
//! categorical input is one-hot encoded (the wide branch). Both branches are
//! concatenated into a softmax output layer.

use crate::data::dataset::Batch;
use crate::data::schema::ColumnType;
use crate::data::tensor::{FeatureMap, Tensor, slice_features};
use crate::data::transform::TransformArtifact;
use crate::error::MlError;
use crate::features::FeatureCatalog;
use crate::model::layers::{Activation, Dense, DenseGrad, indicator};
use crate::model::optimizer::Adam;
use crate::training::strategy::{StrategyScope, shard_ranges};
use crate::tuning::HyperParameters;
use ndarray::{Array2, Axis, concatenate, s};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Probabilities are clipped to `[EPSILON, 1 - EPSILON]` before the log.
const EPSILON: f64 = 1e-7;

/// A categorical input slot and its vocabulary size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalInput {
    pub name: String,
    pub num_buckets: usize,
}

/// Everything needed to rebuild the model graph, without weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArchitecture {
    pub numeric_inputs: Vec<String>,
    pub categorical_inputs: Vec<CategoricalInput>,
    pub deep_units: Vec<usize>,
    pub num_classes: usize,
    pub learning_rate: f64,
    pub loss: String,
    pub metrics: Vec<String>,
}

/// Trained weights of every layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVariables {
    pub deep: Vec<Dense>,
    pub output: Dense,
}

/// Loss and accuracy of one step, summed over the examples it saw.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepTotals {
    pub loss_sum: f64,
    pub correct: usize,
    pub examples: usize,
}

impl StepTotals {
    pub fn merge(&mut self, other: StepTotals) {
        self.loss_sum += other.loss_sum;
        self.correct += other.correct;
        self.examples += other.examples;
    }

    pub fn loss(&self) -> f64 {
        if self.examples == 0 {
            0.0
        } else {
            self.loss_sum / self.examples as f64
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.examples == 0 {
            0.0
        } else {
            self.correct as f64 / self.examples as f64
        }
    }
}

struct Gradients {
    deep: Vec<DenseGrad>,
    output: DenseGrad,
}

impl Gradients {
    fn add_assign(&mut self, other: &Gradients) {
        for (a, b) in self.deep.iter_mut().zip(&other.deep) {
            a.add_assign(b);
        }
        self.output.add_assign(&other.output);
    }
}

struct ForwardPass {
    deep_inputs: Vec<Array2<f64>>,
    concat: Array2<f64>,
    probs: Array2<f64>,
}

/// Compiled wide-and-deep classifier: layers, sparse categorical
/// cross-entropy loss and an Adam optimizer.
#[derive(Debug, Clone)]
pub struct WideDeepModel {
    architecture: ModelArchitecture,
    deep: Vec<Dense>,
    output: Dense,
    optimizer: Adam,
    replicas: usize,
}

impl WideDeepModel {
    /// Reassemble a model from exported parts. Weight shapes must match the
    /// architecture.
    pub fn from_parts(
        architecture: ModelArchitecture,
        variables: ModelVariables,
    ) -> Result<Self, MlError> {
        let model = Self {
            optimizer: Adam::new(architecture.learning_rate),
            deep: variables.deep,
            output: variables.output,
            architecture,
            replicas: 1,
        };
        model.check_shapes()?;
        Ok(model)
    }

    fn check_shapes(&self) -> Result<(), MlError> {
        let arch = &self.architecture;
        if self.deep.len() != arch.deep_units.len() {
            return Err(MlError::model(format!(
                "expected {} deep layers, found {}",
                arch.deep_units.len(),
                self.deep.len()
            )));
        }
        let mut width = arch.numeric_inputs.len();
        for (layer, units) in self.deep.iter().zip(&arch.deep_units) {
            if layer.inputs() != width || layer.units() != *units || layer.bias.len() != *units {
                return Err(MlError::model(format!(
                    "layer '{}' has shape {:?}, expected ({width}, {units})",
                    layer.name,
                    layer.kernel.dim()
                )));
            }
            width = *units;
        }
        let concat_width = width + self.wide_width();
        if self.output.inputs() != concat_width
            || self.output.units() != arch.num_classes
            || self.output.bias.len() != arch.num_classes
        {
            return Err(MlError::model(format!(
                "output layer has shape {:?}, expected ({concat_width}, {})",
                self.output.kernel.dim(),
                arch.num_classes
            )));
        }
        Ok(())
    }

    pub fn architecture(&self) -> &ModelArchitecture {
        &self.architecture
    }

    pub fn variables(&self) -> ModelVariables {
        ModelVariables {
            deep: self.deep.clone(),
            output: self.output.clone(),
        }
    }

    /// Names of all input slots: numeric first, then categorical.
    pub fn input_names(&self) -> Vec<&str> {
        self.architecture
            .numeric_inputs
            .iter()
            .map(String::as_str)
            .chain(
                self.architecture
                    .categorical_inputs
                    .iter()
                    .map(|c| c.name.as_str()),
            )
            .collect()
    }

    pub fn output_width(&self) -> usize {
        self.output.units()
    }

    pub fn num_replicas(&self) -> usize {
        self.replicas
    }

    pub fn optimizer(&self) -> &Adam {
        &self.optimizer
    }

    /// `(name, output width, parameter count)` per layer.
    pub fn layer_shapes(&self) -> Vec<(String, usize, usize)> {
        self.deep
            .iter()
            .chain(std::iter::once(&self.output))
            .map(|l| (l.name.clone(), l.units(), l.param_count()))
            .collect()
    }

    pub fn param_count(&self) -> usize {
        self.layer_shapes().iter().map(|(_, _, p)| p).sum()
    }

    fn wide_width(&self) -> usize {
        self.architecture
            .categorical_inputs
            .iter()
            .map(|c| c.num_buckets)
            .sum()
    }

    /// Human-readable layer table.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Model: \"wide_deep\" ({} replicas)", self.replicas),
            format!("{:<32} {:<16} {:>10}", "Layer (type)", "Output Shape", "Param #"),
        ];
        for name in &self.architecture.numeric_inputs {
            lines.push(format!("{:<32} {:<16} {:>10}", format!("{name} (Input)"), "(None, 1)", 0));
        }
        for input in &self.architecture.categorical_inputs {
            lines.push(format!(
                "{:<32} {:<16} {:>10}",
                format!("{} (Indicator)", input.name),
                format!("(None, {})", input.num_buckets),
                0
            ));
        }
        for (name, units, params) in self.layer_shapes() {
            lines.push(format!(
                "{:<32} {:<16} {:>10}",
                format!("{name} (Dense)"),
                format!("(None, {units})"),
                params
            ));
        }
        lines.push(format!("Total params: {}", self.param_count()));
        lines.join("\n")
    }

    fn numeric_matrix(&self, features: &FeatureMap, rows: usize) -> Result<Array2<f64>, MlError> {
        let names = &self.architecture.numeric_inputs;
        let mut x = Array2::zeros((rows, names.len()));
        for (col, name) in names.iter().enumerate() {
            let column = features
                .get(name)
                .ok_or_else(|| MlError::model(format!("missing numeric input '{name}'")))?;
            if column.len() != rows {
                return Err(MlError::model(format!(
                    "input '{name}' has {} rows, expected {rows}",
                    column.len()
                )));
            }
            match column {
                Tensor::Float(values) => x.column_mut(col).assign(values),
                Tensor::Int(values) => x.column_mut(col).assign(&values.mapv(|v| v as f64)),
            }
        }
        Ok(x)
    }

    fn wide_matrix(&self, features: &FeatureMap, rows: usize) -> Result<Array2<f64>, MlError> {
        let mut blocks = Vec::with_capacity(self.architecture.categorical_inputs.len());
        for input in &self.architecture.categorical_inputs {
            let column = features.get(&input.name).ok_or_else(|| {
                MlError::model(format!("missing categorical input '{}'", input.name))
            })?;
            match column {
                Tensor::Int(ids) if ids.len() == rows => {
                    blocks.push(indicator(ids, input.num_buckets))
                }
                Tensor::Int(ids) => {
                    return Err(MlError::model(format!(
                        "input '{}' has {} rows, expected {rows}",
                        input.name,
                        ids.len()
                    )));
                }
                Tensor::Float(_) => {
                    return Err(MlError::model(format!(
                        "categorical input '{}' must hold integer ids",
                        input.name
                    )));
                }
            }
        }
        if blocks.is_empty() {
            return Ok(Array2::zeros((rows, 0)));
        }
        let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
        concatenate(Axis(1), &views).map_err(|e| MlError::model(e.to_string()))
    }

    fn batch_rows(features: &FeatureMap) -> usize {
        features.values().next().map(Tensor::len).unwrap_or(0)
    }

    fn forward(&self, features: &FeatureMap) -> Result<ForwardPass, MlError> {
        let rows = Self::batch_rows(features);
        let mut h = self.numeric_matrix(features, rows)?;
        let wide = self.wide_matrix(features, rows)?;

        let mut deep_inputs = Vec::with_capacity(self.deep.len());
        for layer in &self.deep {
            let next = layer.forward(&h);
            deep_inputs.push(h);
            h = next;
        }
        let concat = concatenate(Axis(1), &[h.view(), wide.view()])
            .map_err(|e| MlError::model(e.to_string()))?;
        let probs = self.output.forward(&concat);
        Ok(ForwardPass {
            deep_inputs,
            concat,
            probs,
        })
    }

    /// Class probabilities, one row per example.
    pub fn predict(&self, features: &FeatureMap) -> Result<Array2<f64>, MlError> {
        Ok(self.forward(features)?.probs)
    }

    fn totals(&self, probs: &Array2<f64>, labels: &[usize]) -> Result<StepTotals, MlError> {
        let mut totals = StepTotals {
            examples: labels.len(),
            ..StepTotals::default()
        };
        for (row, &label) in probs.rows().into_iter().zip(labels) {
            if label >= self.architecture.num_classes {
                return Err(MlError::training(format!(
                    "label {label} is outside the valid range [0, {})",
                    self.architecture.num_classes
                )));
            }
            let p = row[label].clamp(EPSILON, 1.0 - EPSILON);
            totals.loss_sum -= p.ln();
            let predicted = row
                .iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                .0;
            if predicted == label {
                totals.correct += 1;
            }
        }
        Ok(totals)
    }

    /// Gradients of the mean loss over a global batch of `global_rows`
    /// examples, restricted to the rows in `features`.
    fn gradients(
        &self,
        features: &FeatureMap,
        labels: &[usize],
        global_rows: usize,
    ) -> Result<(Gradients, StepTotals), MlError> {
        let pass = self.forward(features)?;
        let totals = self.totals(&pass.probs, labels)?;

        let mut delta = pass.probs;
        for (mut row, &label) in delta.rows_mut().into_iter().zip(labels) {
            row[label] -= 1.0;
        }
        delta /= global_rows as f64;

        let (output, concat_delta) = self.output.backward(&pass.concat, &delta);
        let deep_width = self.deep.last().map(Dense::units).unwrap_or(0);
        let mut h_delta = concat_delta.slice(s![.., ..deep_width]).to_owned();

        let mut deep = Vec::with_capacity(self.deep.len());
        for (layer, input) in self.deep.iter().zip(&pass.deep_inputs).rev() {
            let (grad, input_delta) = layer.backward(input, &h_delta);
            deep.push(grad);
            h_delta = input_delta;
        }
        deep.reverse();
        Ok((Gradients { deep, output }, totals))
    }

    /// One optimizer step on `batch`. The batch is split across replicas;
    /// replica gradients are summed before the update.
    pub fn train_step(&mut self, batch: &Batch) -> Result<StepTotals, MlError> {
        let rows = batch.len();
        if rows == 0 {
            return Err(MlError::training("cannot train on an empty batch"));
        }

        let shards = shard_ranges(rows, self.replicas);
        let model = &*self;
        let replica_results: Vec<Result<(Gradients, StepTotals), MlError>> = shards
            .into_par_iter()
            .map(|range| {
                let features = slice_features(&batch.features, range.start, range.end);
                model.gradients(&features, &batch.labels[range], rows)
            })
            .collect();

        let mut reduced: Option<Gradients> = None;
        let mut totals = StepTotals::default();
        for result in replica_results {
            let (grads, step) = result?;
            totals.merge(step);
            match reduced.as_mut() {
                Some(sum) => sum.add_assign(&grads),
                None => reduced = Some(grads),
            }
        }
        let Some(grads) = reduced else {
            return Err(MlError::training("no replica produced gradients"));
        };

        let loss = totals.loss();
        if !loss.is_finite() {
            return Err(MlError::training(format!(
                "loss diverged to {loss} at optimizer step {}",
                self.optimizer.iterations() + 1
            )));
        }

        let mut all_grads = grads.deep;
        all_grads.push(grads.output);
        let mut layers: Vec<&mut Dense> = self
            .deep
            .iter_mut()
            .chain(std::iter::once(&mut self.output))
            .collect();
        self.optimizer.apply_gradients(&mut layers, &all_grads);
        Ok(totals)
    }

    /// Loss and accuracy on one batch without updating weights.
    pub fn test_step(&self, batch: &Batch) -> Result<StepTotals, MlError> {
        let probs = self.predict(&batch.features)?;
        self.totals(&probs, &batch.labels)
    }
}

/// Builds [`WideDeepModel`]s against one transform artifact and feature
/// catalog. Structure depends only on the hyperparameters, artifact and
/// catalog; initial weights depend on the seed.
#[derive(Debug, Clone)]
pub struct ModelBuilder<'a> {
    artifact: &'a TransformArtifact,
    catalog: &'a FeatureCatalog,
    seed: Option<u64>,
}

impl<'a> ModelBuilder<'a> {
    pub fn new(artifact: &'a TransformArtifact, catalog: &'a FeatureCatalog) -> Self {
        Self {
            artifact,
            catalog,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Input slots and layer widths for `hparams`, validated against the
    /// transformed schema.
    pub fn architecture(&self, hparams: &HyperParameters) -> Result<ModelArchitecture, MlError> {
        let schema = self.artifact.transformed_schema();

        let mut numeric_inputs = Vec::new();
        for key in self.catalog.transformed_numeric_keys() {
            match schema.get(&key) {
                Some(spec) if spec.dtype == ColumnType::Float => numeric_inputs.push(key),
                Some(_) => {
                    return Err(MlError::model(format!(
                        "numeric feature '{key}' is not a float feature in the transformed schema"
                    )));
                }
                None => {
                    return Err(MlError::model(format!(
                        "numeric feature '{key}' is not in the transformed schema"
                    )));
                }
            }
        }

        let mut categorical_inputs = Vec::new();
        for key in self.catalog.transformed_categorical_keys() {
            let num_buckets = self.artifact.num_buckets_for_transformed_feature(&key)?;
            if num_buckets == 0 {
                return Err(MlError::model(format!(
                    "categorical feature '{key}' has an empty vocabulary"
                )));
            }
            categorical_inputs.push(CategoricalInput {
                name: key,
                num_buckets,
            });
        }

        if self.catalog.num_classes == 0 {
            return Err(MlError::model("the classifier needs at least one class"));
        }

        Ok(ModelArchitecture {
            numeric_inputs,
            categorical_inputs,
            deep_units: hparams.units(),
            num_classes: self.catalog.num_classes,
            learning_rate: hparams.learning_rate(),
            loss: "sparse_categorical_crossentropy".into(),
            metrics: vec!["sparse_categorical_accuracy".into()],
        })
    }

    /// Build a single-replica model.
    pub fn build(&self, hparams: &HyperParameters) -> Result<WideDeepModel, MlError> {
        self.build_with_replicas(hparams, 1)
    }

    /// Build a model whose variables are mirrored across the replicas of an
    /// active strategy scope.
    pub fn build_in(
        &self,
        hparams: &HyperParameters,
        scope: &StrategyScope<'_>,
    ) -> Result<WideDeepModel, MlError> {
        self.build_with_replicas(hparams, scope.num_replicas_in_sync())
    }

    fn build_with_replicas(
        &self,
        hparams: &HyperParameters,
        replicas: usize,
    ) -> Result<WideDeepModel, MlError> {
        let architecture = self.architecture(hparams)?;
        let seed = self.seed.unwrap_or_else(rand::random);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);

        let mut deep = Vec::with_capacity(architecture.deep_units.len());
        let mut width = architecture.numeric_inputs.len();
        for (i, &units) in architecture.deep_units.iter().enumerate() {
            deep.push(Dense::new(
                &format!("dense_{}", i + 1),
                width,
                units,
                Activation::Linear,
                &mut rng,
            ));
            width = units;
        }
        let wide_width: usize = architecture
            .categorical_inputs
            .iter()
            .map(|c| c.num_buckets)
            .sum();
        let output = Dense::new(
            "output",
            width + wide_width,
            architecture.num_classes,
            Activation::Softmax,
            &mut rng,
        );

        let model = WideDeepModel {
            optimizer: Adam::new(architecture.learning_rate),
            architecture,
            deep,
            output,
            replicas: replicas.max(1),
        };
        tracing::info!(seed, "Built wide-and-deep model\n{}", model.summary());
        Ok(model)
    }
}

/// Build and compile the wide-and-deep classifier for `hparams`.
pub fn build_keras_model(
    hparams: &HyperParameters,
    artifact: &TransformArtifact,
    catalog: &FeatureCatalog,
) -> Result<WideDeepModel, MlError> {
    ModelBuilder::new(artifact, catalog).build(hparams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::transform::FeatureTransform;
    use crate::training::strategy::MirroredStrategy;
    use crate::tuning::DeepLayers;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    fn small_catalog() -> FeatureCatalog {
        FeatureCatalog::new("label", &["a", "b"], &["c"], 7)
    }

    fn small_artifact() -> TransformArtifact {
        TransformArtifact::from_transforms(vec![
            FeatureTransform::ZScore {
                input: "a".into(),
                output: "a_xf".into(),
                mean: 0.0,
                std_dev: 1.0,
            },
            FeatureTransform::ZScore {
                input: "b".into(),
                output: "b_xf".into(),
                mean: 0.0,
                std_dev: 1.0,
            },
            FeatureTransform::Identity {
                input: "c".into(),
                output: "c_xf".into(),
                num_buckets: 3,
            },
            FeatureTransform::Identity {
                input: "label".into(),
                output: "label_xf".into(),
                num_buckets: 7,
            },
        ])
        .unwrap()
    }

    fn batch() -> Batch {
        let mut features = FeatureMap::new();
        features.insert("a_xf".into(), Tensor::Float(array![0.5, -1.0, 2.0, 0.0]));
        features.insert("b_xf".into(), Tensor::Float(array![1.0, 0.0, -0.5, 0.3]));
        features.insert("c_xf".into(), Tensor::Int(array![0, 1, 2, 1]));
        Batch {
            features,
            labels: vec![0, 3, 6, 3],
        }
    }

    #[test]
    fn test_default_hparams_shape() {
        let artifact = small_artifact();
        let catalog = small_catalog();
        let model = build_keras_model(&HyperParameters::default(), &artifact, &catalog).unwrap();
        assert_eq!(model.input_names(), vec!["a_xf", "b_xf", "c_xf"]);
        assert_eq!(model.output_width(), 7);
        assert_eq!(model.architecture().deep_units, vec![8]);
        // dense_1: 2*8+8, output: (8+3)*7+7
        assert_eq!(model.param_count(), 24 + 84);
    }

    #[test]
    fn test_structure_is_deterministic() {
        let artifact = small_artifact();
        let catalog = small_catalog();
        let hp = HyperParameters::new(1e-2, DeepLayers::Two { units_1: 16, units_2: 24 }).unwrap();
        let first = ModelBuilder::new(&artifact, &catalog).build(&hp).unwrap();
        let second = ModelBuilder::new(&artifact, &catalog).build(&hp).unwrap();
        assert_eq!(first.architecture(), second.architecture());
        assert_eq!(first.layer_shapes(), second.layer_shapes());
    }

    #[test]
    fn test_seed_fixes_weights() {
        let artifact = small_artifact();
        let catalog = small_catalog();
        let hp = HyperParameters::default();
        let a = ModelBuilder::new(&artifact, &catalog).with_seed(Some(7)).build(&hp).unwrap();
        let b = ModelBuilder::new(&artifact, &catalog).with_seed(Some(7)).build(&hp).unwrap();
        assert_eq!(a.variables(), b.variables());
    }

    #[test]
    fn test_missing_catalog_key_fails() {
        let artifact = small_artifact();
        let catalog = FeatureCatalog::new("label", &["a", "missing"], &["c"], 7);
        let err = build_keras_model(&HyperParameters::default(), &artifact, &catalog).unwrap_err();
        assert!(matches!(err, MlError::Model(_)));

        let catalog = FeatureCatalog::new("label", &["a"], &["nope"], 7);
        let err = build_keras_model(&HyperParameters::default(), &artifact, &catalog).unwrap_err();
        assert!(matches!(err, MlError::Model(_)));
    }

    #[test]
    fn test_predict_rows_are_distributions() {
        let artifact = small_artifact();
        let catalog = small_catalog();
        let model = build_keras_model(&HyperParameters::default(), &artifact, &catalog).unwrap();
        let probs = model.predict(&batch().features).unwrap();
        assert_eq!(probs.dim(), (4, 7));
        for row in probs.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_out_of_range_ids_use_default_bucket() {
        let artifact = small_artifact();
        let catalog = small_catalog();
        let model = ModelBuilder::new(&artifact, &catalog)
            .with_seed(Some(1))
            .build(&HyperParameters::default())
            .unwrap();
        let mut features = batch().features;
        features.insert("c_xf".into(), Tensor::Int(array![0, 9, -3, 0]));
        let probs = model.predict(&features).unwrap();
        let mut explicit = features.clone();
        explicit.insert("c_xf".into(), Tensor::Int(array![0, 0, 0, 0]));
        assert_eq!(probs, model.predict(&explicit).unwrap());
    }

    #[test]
    fn test_training_reduces_loss() {
        let artifact = small_artifact();
        let catalog = small_catalog();
        let hp = HyperParameters::new(1e-2, DeepLayers::One { units_1: 8 }).unwrap();
        let mut model = ModelBuilder::new(&artifact, &catalog)
            .with_seed(Some(3))
            .build(&hp)
            .unwrap();
        let batch = batch();
        let before = model.test_step(&batch).unwrap().loss();
        for _ in 0..200 {
            model.train_step(&batch).unwrap();
        }
        let after = model.test_step(&batch).unwrap();
        assert!(after.loss() < before);
        assert_eq!(after.accuracy(), 1.0);
    }

    #[test]
    fn test_replicas_match_single_replica() {
        let artifact = small_artifact();
        let catalog = small_catalog();
        let hp = HyperParameters::default();
        let builder = ModelBuilder::new(&artifact, &catalog).with_seed(Some(11));
        let mut single = builder.build(&hp).unwrap();

        let strategy = MirroredStrategy::new(3).unwrap();
        let scope = strategy.scope();
        let mut mirrored = builder.build_in(&hp, &scope).unwrap();
        assert_eq!(mirrored.num_replicas(), 3);

        let batch = batch();
        let a = single.train_step(&batch).unwrap();
        let b = mirrored.train_step(&batch).unwrap();
        assert!((a.loss() - b.loss()).abs() < 1e-12);

        let (sv, mv) = (single.variables(), mirrored.variables());
        for (x, y) in sv.output.kernel.iter().zip(mv.output.kernel.iter()) {
            assert!((x - y).abs() < 1e-10);
        }
    }

    #[test]
    fn test_label_out_of_range_is_training_error() {
        let artifact = small_artifact();
        let catalog = small_catalog();
        let mut model = build_keras_model(&HyperParameters::default(), &artifact, &catalog).unwrap();
        let mut bad = batch();
        bad.labels[0] = 7;
        assert!(matches!(model.train_step(&bad), Err(MlError::Training(_))));
    }

    #[test]
    fn test_from_parts_roundtrip_and_shape_check() {
        let artifact = small_artifact();
        let catalog = small_catalog();
        let model = build_keras_model(&HyperParameters::default(), &artifact, &catalog).unwrap();
        let restored =
            WideDeepModel::from_parts(model.architecture().clone(), model.variables()).unwrap();
        assert_eq!(
            restored.predict(&batch().features).unwrap(),
            model.predict(&batch().features).unwrap()
        );

        let mut arch = model.architecture().clone();
        arch.deep_units = vec![16];
        assert!(WideDeepModel::from_parts(arch, model.variables()).is_err());
    }

    #[test]
    fn test_missing_input_in_batch() {
        let artifact = small_artifact();
        let catalog = small_catalog();
        let model = build_keras_model(&HyperParameters::default(), &artifact, &catalog).unwrap();
        let mut features = batch().features;
        features.remove("c_xf");
        assert!(matches!(model.predict(&features), Err(MlError::Model(_))));
    }
}
