//! Serving function and servable export.

pub mod export;
pub mod function;

pub use export::{SavedModel, load_servable, save_servable};
pub use function::{ServingFunction, get_serve_tf_examples_fn};
