//! Wide-and-deep classifier: layers, optimizer and the model builder.

pub mod layers;
pub mod optimizer;
pub mod wide_deep;

pub use layers::{Activation, Dense};
pub use optimizer::Adam;
pub use wide_deep::{
    CategoricalInput, ModelArchitecture, ModelBuilder, ModelVariables, StepTotals, WideDeepModel,
    build_keras_model,
};
