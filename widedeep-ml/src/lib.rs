//! # widedeep-ml
//!
//! Tuning and training glue for a wide-and-deep classifier over
//! pre-transformed tabular data.
//!
//! - [`tuning::tuner_fn`] builds a Bayesian-optimization tuner over learning
//!   rate and deep-branch shape, plus the arguments each trial fits with.
//! - [`training::run_fn`] trains the classifier under a mirrored replica
//!   strategy and exports a servable whose serving function accepts raw
//!   records and applies the embedded transform before the model.
//!
//! Feature names come from a [`features::FeatureCatalog`]; the transform
//! artifact supplies the transformed schema and categorical cardinalities.

pub mod config;
pub mod error;
pub mod persistence;

pub mod data;
pub mod features;

pub mod model;
pub mod training;
pub mod tuning;

pub mod serving;

pub use config::{TrainerConfig, TrainingConfig, TuningConfig, load_config};
pub use error::MlError;
pub use features::FeatureCatalog;
pub use model::{ModelBuilder, WideDeepModel, build_keras_model};
pub use serving::{ServingFunction, get_serve_tf_examples_fn, load_servable, save_servable};
pub use training::{TrainerFnArgs, run_fn};
pub use tuning::{HyperParameters, TunerFnArgs, TunerFnResult, get_hyperparameters, tuner_fn};
