//! Training entry point: train the classifier and export the servable.

use crate::config::TrainerConfig;
use crate::data::dataset::input_fn;
use crate::data::source::{DataAccessor, JsonlAccessor};
use crate::data::transform::TransformArtifact;
use crate::error::MlError;
use crate::model::ModelBuilder;
use crate::serving::export::save_servable;
use crate::training::callbacks::RunLogCallback;
use crate::training::fit::FitOptions;
use crate::training::metrics::History;
use crate::training::strategy::MirroredStrategy;
use crate::tuning::hyperparameters::{HyperParameters, hyperparameter_space};
use crate::tuning::space::HyperparameterSpace;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Inputs of the training entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerFnArgs {
    /// Transform artifact directory.
    pub transform_output: PathBuf,
    pub train_files: Vec<String>,
    pub eval_files: Vec<String>,
    pub train_steps: usize,
    pub eval_steps: usize,
    /// Tuned hyperparameters; the search space defaults are used when absent.
    #[serde(default)]
    pub hyperparameters: Option<serde_json::Value>,
    /// Progress logs are written here.
    pub model_run_dir: PathBuf,
    /// The servable is exported here.
    pub serving_model_dir: PathBuf,
}

/// Deserialize supplied hyperparameters against `space`, or fall back to its
/// defaults.
pub fn resolve_hyperparameters(
    supplied: Option<&serde_json::Value>,
    space: &HyperparameterSpace,
) -> Result<HyperParameters, MlError> {
    match supplied {
        Some(config) => HyperParameters::from_config_in(space, config),
        None => HyperParameters::from_space_defaults(space),
    }
}

/// Train the classifier, reading JSON-lines examples, and export it.
pub fn run_fn(fn_args: &TrainerFnArgs, config: &TrainerConfig) -> Result<History, MlError> {
    run_fn_with_accessor(fn_args, config, Arc::new(JsonlAccessor))
}

/// Train the classifier and export it with the `serving_default` signature.
///
/// Any failure aborts the run. Partially written run logs are left in place.
pub fn run_fn_with_accessor(
    fn_args: &TrainerFnArgs,
    config: &TrainerConfig,
    accessor: Arc<dyn DataAccessor>,
) -> Result<History, MlError> {
    config.validate()?;
    let artifact = TransformArtifact::load(&fn_args.transform_output)?;
    let catalog = &config.catalog;
    let label_key = catalog.transformed_label_key();

    let train_dataset = input_fn(
        &fn_args.train_files,
        accessor.clone(),
        &artifact,
        &label_key,
        config.training.train_batch_size,
    )?;
    let eval_dataset = input_fn(
        &fn_args.eval_files,
        accessor,
        &artifact,
        &label_key,
        config.training.eval_batch_size,
    )?;

    let space = hyperparameter_space(&config.tuning)?;
    let hparams = resolve_hyperparameters(fn_args.hyperparameters.as_ref(), &space)?;
    tracing::info!(
        source = if fn_args.hyperparameters.is_some() { "supplied" } else { "defaults" },
        hyperparameters = %hparams,
        "Resolved hyperparameters"
    );

    let strategy = MirroredStrategy::from_config(config.training.replicas)?;
    let mut model = {
        let scope = strategy.scope();
        ModelBuilder::new(&artifact, catalog)
            .with_seed(config.training.seed)
            .build_in(&hparams, &scope)?
    };

    let mut run_log = RunLogCallback::new(&fn_args.model_run_dir);
    let options = FitOptions::new(config.training.epochs, fn_args.train_steps)
        .with_validation(&eval_dataset, Some(fn_args.eval_steps));
    let history = model.fit(&train_dataset, &options, &mut [&mut run_log])?;

    save_servable(&fn_args.serving_model_dir, &model, &artifact, catalog)?;
    tracing::info!(
        run_log = %run_log.path().display(),
        serving_model_dir = %fn_args.serving_model_dir.display(),
        epochs = history.epochs_completed(),
        "Training run complete"
    );
    Ok(history)
}
