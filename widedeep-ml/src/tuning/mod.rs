//! Hyperparameter search: the space, typed hyperparameters, the Bayesian
//! optimization oracle and the tuning entry point.

pub mod hyperparameters;
pub mod oracle;
pub mod space;
pub mod tuner;

pub use hyperparameters::{DeepLayers, HyperParameters, get_hyperparameters, hyperparameter_space};
pub use oracle::{BayesianOptimizationOracle, Direction, Objective, Trial, TrialStatus};
pub use space::{Domain, HyperparameterSpace, ParamValue, ParamValues};
pub use tuner::{FitKwargs, HyperModel, Tuner, TunerFnArgs, TunerFnResult, tuner_fn, tuner_fn_with_accessor};
