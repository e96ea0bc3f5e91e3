//! Configuration for tuning and training runs.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. Files are
//! `~/.config/widedeep/config.toml` and `.widedeep/config.toml` in the
//! workspace directory.

use crate::error::MlError;
use crate::features::FeatureCatalog;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Directory holding the workspace-level config file.
pub const WORKSPACE_CONFIG_DIR: &str = ".widedeep";
/// Prefix of environment overrides; `__` separates nested keys.
pub const ENV_PREFIX: &str = "WIDEDEEP_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Fitting parameters.
    #[serde(default)]
    pub training: TrainingConfig,
    /// Hyperparameter search parameters.
    #[serde(default)]
    pub tuning: TuningConfig,
    /// Raw feature names, label and class count.
    #[serde(default)]
    pub catalog: FeatureCatalog,
}

/// Fitting parameters shared by tuning trials and the final training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Passes of `steps_per_epoch` batches.
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub train_batch_size: usize,
    #[serde(default = "default_batch_size")]
    pub eval_batch_size: usize,
    /// Replica count for the mirrored strategy. One per CPU when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<usize>,
    /// Weight initialisation seed. Random when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            train_batch_size: default_batch_size(),
            eval_batch_size: default_batch_size(),
            replicas: None,
            seed: None,
        }
    }
}

fn default_epochs() -> usize {
    1
}

fn default_batch_size() -> usize {
    64
}

/// Bayesian optimization search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningConfig {
    #[serde(default = "default_max_trials")]
    pub max_trials: usize,
    /// Subdirectory of the working directory holding trial records.
    #[serde(default = "default_project_name")]
    pub project_name: String,
    /// Trials drawn at random before the Gaussian process takes over.
    #[serde(default = "default_num_initial_points")]
    pub num_initial_points: usize,
    /// Exploration weight of the upper confidence bound.
    #[serde(default = "default_beta")]
    pub beta: f64,
    /// Let the model builder register parameters missing from the space.
    #[serde(default)]
    pub allow_new_entries: bool,
    /// Search over newly registered parameters instead of pinning defaults.
    #[serde(default)]
    pub tune_new_entries: bool,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            max_trials: default_max_trials(),
            project_name: default_project_name(),
            num_initial_points: default_num_initial_points(),
            beta: default_beta(),
            allow_new_entries: false,
            tune_new_entries: false,
        }
    }
}

fn default_max_trials() -> usize {
    10
}

fn default_project_name() -> String {
    "covertype_tuning".to_string()
}

fn default_num_initial_points() -> usize {
    2
}

fn default_beta() -> f64 {
    2.6
}

impl TrainerConfig {
    /// Reject values no run could use.
    pub fn validate(&self) -> Result<(), MlError> {
        let t = &self.training;
        if t.epochs == 0 {
            return Err(MlError::Config("training.epochs must be at least 1".into()));
        }
        if t.train_batch_size == 0 || t.eval_batch_size == 0 {
            return Err(MlError::Config("batch sizes must be at least 1".into()));
        }
        if t.replicas == Some(0) {
            return Err(MlError::Config("training.replicas must be at least 1".into()));
        }
        if self.tuning.max_trials == 0 {
            return Err(MlError::Config("tuning.max_trials must be at least 1".into()));
        }
        if self.tuning.project_name.trim().is_empty() {
            return Err(MlError::Config("tuning.project_name must not be empty".into()));
        }
        if !(self.tuning.beta.is_finite() && self.tuning.beta >= 0.0) {
            return Err(MlError::Config("tuning.beta must be a non-negative number".into()));
        }
        if self.catalog.num_classes == 0 {
            return Err(MlError::Config("catalog.num_classes must be at least 1".into()));
        }
        Ok(())
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `WIDEDEEP_`)
/// 3. Workspace-local config (`.widedeep/config.toml`)
/// 4. User config (`~/.config/widedeep/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&TrainerConfig>,
) -> Result<TrainerConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(TrainerConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "widedeep", "widedeep") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(WORKSPACE_CONFIG_DIR).join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // WIDEDEEP_TRAINING__EPOCHS, WIDEDEEP_TUNING__MAX_TRIALS, ...
    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = TrainerConfig::default();
        assert_eq!(config.training.epochs, 1);
        assert_eq!(config.training.train_batch_size, 64);
        assert_eq!(config.training.eval_batch_size, 64);
        assert_eq!(config.tuning.max_trials, 10);
        assert_eq!(config.tuning.project_name, "covertype_tuning");
        assert!(!config.tuning.allow_new_entries);
        assert_eq!(config.catalog, FeatureCatalog::covertype());
        config.validate().unwrap();
    }

    #[test]
    fn test_load_config_defaults() {
        let config = load_config(None, None).unwrap();
        assert_eq!(config.training.epochs, 1);
        assert_eq!(config.catalog.num_classes, 7);
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = TrainerConfig::default();
        overrides.training.train_batch_size = 32;
        overrides.tuning.max_trials = 3;

        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.training.train_batch_size, 32);
        assert_eq!(config.tuning.max_trials, 3);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(WORKSPACE_CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            r#"
[training]
eval_batch_size = 16
seed = 42

[tuning]
project_name = "small_search"
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.training.eval_batch_size, 16);
        assert_eq!(config.training.train_batch_size, 64);
        assert_eq!(config.training.seed, Some(42));
        assert_eq!(config.tuning.project_name, "small_search");
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = TrainerConfig::default();
        config.training.eval_batch_size = 0;
        assert!(matches!(config.validate(), Err(MlError::Config(_))));

        let mut config = TrainerConfig::default();
        config.tuning.max_trials = 0;
        assert!(config.validate().is_err());

        let mut config = TrainerConfig::default();
        config.training.replicas = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_catalog_from_toml() {
        let config: TrainerConfig = toml::from_str(
            r#"
[catalog]
label_key = "y"
numeric_feature_keys = ["a"]
categorical_feature_keys = []
num_classes = 2
"#,
        )
        .unwrap();
        assert_eq!(config.catalog.transformed_name("a"), "a_xf");
        assert_eq!(config.catalog.num_classes, 2);
        assert_eq!(config.training.epochs, 1);
    }
}
