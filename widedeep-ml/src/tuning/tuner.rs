//! Tuner driver and the tuning entry point.

use crate::config::TrainerConfig;
use crate::data::dataset::{Dataset, input_fn};
use crate::data::source::{DataAccessor, JsonlAccessor};
use crate::data::transform::TransformArtifact;
use crate::error::MlError;
use crate::model::{ModelBuilder, WideDeepModel};
use crate::persistence::atomic_write_json;
use crate::training::fit::FitOptions;
use crate::training::metrics::{History, VAL_ACCURACY};
use crate::tuning::hyperparameters::{HyperParameters, hyperparameter_space};
use crate::tuning::oracle::{BayesianOptimizationOracle, Direction, Objective, Trial};
use crate::tuning::space::HyperparameterSpace;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const BEST_HYPERPARAMETERS_FILE: &str = "best_hyperparameters.json";
pub const ORACLE_FILE: &str = "oracle.json";
pub const TRIAL_FILE: &str = "trial.json";

/// Builds a compiled model for one hyperparameter configuration.
pub type HyperModel = Box<dyn Fn(&HyperParameters) -> Result<WideDeepModel, MlError> + Send + Sync>;

/// Inputs of the tuning entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunerFnArgs {
    /// Directory the tuner writes its project into.
    pub working_dir: PathBuf,
    pub train_files: Vec<String>,
    pub eval_files: Vec<String>,
    pub train_steps: usize,
    pub eval_steps: usize,
    /// Transform artifact directory.
    pub transform_graph_path: PathBuf,
}

/// Arguments every trial's `fit` receives.
#[derive(Debug, Clone)]
pub struct FitKwargs {
    pub x: Dataset,
    pub validation_data: Dataset,
    pub steps_per_epoch: usize,
    pub validation_steps: usize,
}

/// A configured tuner and the fit arguments for its search.
pub struct TunerFnResult {
    pub tuner: Tuner,
    pub fit_kwargs: FitKwargs,
}

/// Runs trials proposed by a [`BayesianOptimizationOracle`] and records them
/// under `<directory>/<project_name>`.
pub struct Tuner {
    hypermodel: HyperModel,
    oracle: BayesianOptimizationOracle,
    directory: PathBuf,
    project_name: String,
    epochs: usize,
}

impl std::fmt::Debug for Tuner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tuner")
            .field("oracle", &self.oracle.objective)
            .field("max_trials", &self.oracle.max_trials)
            .field("directory", &self.directory)
            .field("project_name", &self.project_name)
            .finish()
    }
}

impl Tuner {
    pub fn bayesian_optimization(
        hypermodel: HyperModel,
        space: HyperparameterSpace,
        objective: Objective,
        max_trials: usize,
        directory: &Path,
        project_name: &str,
    ) -> Self {
        Self {
            hypermodel,
            oracle: BayesianOptimizationOracle::new(space, objective, max_trials),
            directory: directory.to_path_buf(),
            project_name: project_name.to_string(),
            epochs: 1,
        }
    }

    pub fn with_oracle(mut self, f: impl FnOnce(BayesianOptimizationOracle) -> BayesianOptimizationOracle) -> Self {
        self.oracle = f(self.oracle);
        self
    }

    /// Epochs each trial trains for.
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn oracle(&self) -> &BayesianOptimizationOracle {
        &self.oracle
    }

    pub fn project_dir(&self) -> PathBuf {
        self.directory.join(&self.project_name)
    }

    pub fn search_space_summary(&self) -> String {
        let space = self.oracle.space();
        let mut lines = vec![format!("Search space summary ({} parameters)", space.names().len())];
        for p in space.params() {
            let scope = if p.conditions.is_empty() {
                String::new()
            } else {
                let conds: Vec<String> = p
                    .conditions
                    .iter()
                    .map(|c| {
                        let values: Vec<String> = c.values.iter().map(ToString::to_string).collect();
                        format!("{} in [{}]", c.parent, values.join(", "))
                    })
                    .collect();
                format!(" when {}", conds.join(" and "))
            };
            lines.push(format!("{}: {:?}, default {}{scope}", p.name, p.domain, p.default));
        }
        lines.join("\n")
    }

    /// Run trials until the oracle's budget is spent.
    ///
    /// A failing trial is recorded as failed and aborts the search.
    pub fn search(&mut self, fit_kwargs: &FitKwargs) -> Result<(), MlError> {
        if fit_kwargs.steps_per_epoch == 0 || fit_kwargs.validation_steps == 0 {
            return Err(MlError::invalid_input(
                "steps_per_epoch and validation_steps must be at least 1",
            ));
        }
        let project_dir = self.project_dir();
        std::fs::create_dir_all(&project_dir)?;
        tracing::info!(
            project = %project_dir.display(),
            max_trials = self.oracle.max_trials,
            "Starting search\n{}",
            self.search_space_summary()
        );

        while let Some(trial) = self.oracle.create_trial() {
            tracing::info!(trial = %trial.trial_id, hyperparameters = ?trial.hyperparameters, "Starting trial");
            match self.run_trial(&trial, fit_kwargs) {
                Ok(history) => {
                    let (score, metrics) = self.score(&history)?;
                    self.oracle.update_trial(&trial.trial_id, score, metrics)?;
                    tracing::info!(trial = %trial.trial_id, score, objective = %self.oracle.objective.name, "Trial complete");
                }
                Err(e) => {
                    self.oracle.fail_trial(&trial.trial_id, &e.to_string())?;
                    self.save_trial(&trial.trial_id)?;
                    self.save_oracle()?;
                    return Err(e);
                }
            }
            self.save_trial(&trial.trial_id)?;
            self.save_oracle()?;
        }

        if let Some(best) = self.get_best_hyperparameters(1)?.first() {
            atomic_write_json(&project_dir.join(BEST_HYPERPARAMETERS_FILE), &best.get_config())?;
            tracing::info!(best = %best, "Search finished");
        }
        Ok(())
    }

    fn run_trial(&self, trial: &Trial, fit_kwargs: &FitKwargs) -> Result<History, MlError> {
        let hp = HyperParameters::from_values_in(self.oracle.space(), &trial.hyperparameters)?;
        let mut model = (self.hypermodel)(&hp)?;
        let options = FitOptions::new(self.epochs, fit_kwargs.steps_per_epoch)
            .with_validation(&fit_kwargs.validation_data, Some(fit_kwargs.validation_steps));
        model.fit(&fit_kwargs.x, &options, &mut [])
    }

    /// Best objective value over the trial's epochs, plus the last epoch's
    /// metrics.
    fn score(&self, history: &History) -> Result<(f64, BTreeMap<String, f64>), MlError> {
        let objective = &self.oracle.objective;
        let values = history.metric(&objective.name);
        let score = values
            .iter()
            .copied()
            .reduce(|a, b| if objective.better(b, a) { b } else { a })
            .ok_or_else(|| {
                MlError::tuning(format!("objective '{}' was not reported", objective.name))
            })?;
        let metrics = history
            .as_map()
            .into_iter()
            .filter_map(|(name, values)| values.last().map(|v| (name, *v)))
            .collect();
        Ok((score, metrics))
    }

    fn save_trial(&self, trial_id: &str) -> Result<(), MlError> {
        let trial = self
            .oracle
            .trial(trial_id)
            .ok_or_else(|| MlError::tuning(format!("unknown trial '{trial_id}'")))?;
        let dir = self.project_dir().join(format!("trial_{trial_id}"));
        std::fs::create_dir_all(&dir)?;
        atomic_write_json(&dir.join(TRIAL_FILE), trial)
    }

    fn save_oracle(&self) -> Result<(), MlError> {
        atomic_write_json(&self.project_dir().join(ORACLE_FILE), &self.oracle)
    }

    /// Hyperparameters of the `n` best completed trials, best first.
    pub fn get_best_hyperparameters(&self, n: usize) -> Result<Vec<HyperParameters>, MlError> {
        self.oracle
            .get_best_trials(n)
            .into_iter()
            .map(|t| HyperParameters::from_values_in(self.oracle.space(), &t.hyperparameters))
            .collect()
    }

    /// Text report of the `n` best trials.
    pub fn results_summary(&self, n: usize) -> String {
        let objective = &self.oracle.objective;
        let mut lines = vec![
            "Results summary".to_string(),
            format!("Results in {}", self.project_dir().display()),
            format!(
                "Showing {n} best trials\nObjective(name=\"{}\", direction=\"{}\")",
                objective.name,
                match objective.direction {
                    Direction::Max => "max",
                    Direction::Min => "min",
                }
            ),
        ];
        for trial in self.oracle.get_best_trials(n) {
            lines.push(String::new());
            lines.push(format!("Trial {} summary", trial.trial_id));
            lines.push("Hyperparameters:".to_string());
            for (name, value) in &trial.hyperparameters {
                lines.push(format!("{name}: {value}"));
            }
            if let Some(score) = trial.score {
                lines.push(format!("Score: {score}"));
            }
        }
        lines.join("\n")
    }
}

/// Build the tuner and its fit arguments, reading JSON-lines examples.
pub fn tuner_fn(fn_args: &TunerFnArgs, config: &TrainerConfig) -> Result<TunerFnResult, MlError> {
    tuner_fn_with_accessor(fn_args, config, Arc::new(JsonlAccessor))
}

/// Build the tuner and its fit arguments. No training happens here.
pub fn tuner_fn_with_accessor(
    fn_args: &TunerFnArgs,
    config: &TrainerConfig,
    accessor: Arc<dyn DataAccessor>,
) -> Result<TunerFnResult, MlError> {
    config.validate()?;
    let artifact = Arc::new(TransformArtifact::load(&fn_args.transform_graph_path)?);
    let catalog = config.catalog.clone();
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

    let seed = config.training.seed;
    let hypermodel: HyperModel = Box::new(move |hp: &HyperParameters| {
        ModelBuilder::new(&artifact, &catalog).with_seed(seed).build(hp)
    });

    let tuning = &config.tuning;
    let tuner = Tuner::bayesian_optimization(
        hypermodel,
        space,
        Objective::new(VAL_ACCURACY, Direction::Max),
        tuning.max_trials,
        &fn_args.working_dir,
        &tuning.project_name,
    )
    .with_oracle(|oracle| {
        oracle
            .with_num_initial_points(tuning.num_initial_points)
            .with_beta(tuning.beta)
            .with_seed(seed)
    })
    .with_epochs(config.training.epochs);

    Ok(TunerFnResult {
        tuner,
        fit_kwargs: FitKwargs {
            x: train_dataset,
            validation_data: eval_dataset,
            steps_per_epoch: fn_args.train_steps,
            validation_steps: fn_args.eval_steps,
        },
    })
}
