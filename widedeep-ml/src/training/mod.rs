//! Training infrastructure: replica strategy, fitting loop, callbacks,
//! metrics and the training entry point.

pub mod callbacks;
pub mod fit;
pub mod metrics;
pub mod runner;
pub mod strategy;

pub use callbacks::{RunLogCallback, TrainingCallback};
pub use fit::FitOptions;
pub use metrics::{EpochLogs, History};
pub use runner::{TrainerFnArgs, resolve_hyperparameters, run_fn, run_fn_with_accessor};
pub use strategy::{MirroredStrategy, StrategyScope};
