//! Data layer: transformed-feature schema, transform artifact, record
//! accessors and batched datasets.

pub mod dataset;
pub mod schema;
pub mod source;
pub mod tensor;
pub mod transform;

pub use dataset::{Batch, Dataset, input_fn};
pub use schema::{ColumnType, FeatureSpec, SchemaDefinition};
pub use source::{DataAccessor, JsonlAccessor, resolve_file_patterns};
pub use tensor::{FeatureMap, FeatureValue, Tensor};
pub use transform::{FeatureTransform, RawRecord, TransformArtifact, TransformFn};
