//! Feature catalog for column construction.

pub mod catalog;

pub use catalog::FeatureCatalog;
