//! Error types for the widedeep-ml crate.

use thiserror::Error;

/// Top-level error type for tuning, training and serving.
///
/// Nothing in this crate retries: every variant is fatal to the entry point
/// that raised it and is handed back to the caller unchanged.
#[derive(Debug, Error)]
pub enum MlError {
    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Hyperparameter error: {0}")]
    Hyperparameter(String),

    #[error("Tuning error: {0}")]
    Tuning(String),

    #[error("Serving error: {0}")]
    Serving(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Glob pattern error: {0}")]
    Glob(#[from] globset::Error),

    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl MlError {
    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn transform(msg: impl Into<String>) -> Self {
        Self::Transform(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn hyperparameter(msg: impl Into<String>) -> Self {
        Self::Hyperparameter(msg.into())
    }

    pub fn tuning(msg: impl Into<String>) -> Self {
        Self::Tuning(msg.into())
    }

    pub fn serving(msg: impl Into<String>) -> Self {
        Self::Serving(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helper_constructors_format() {
        assert_eq!(
            MlError::dataset("no files").to_string(),
            "Dataset error: no files"
        );
        assert_eq!(
            MlError::not_found("/tmp/x").to_string(),
            "Not found: /tmp/x"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: MlError = io.into();
        assert!(matches!(err, MlError::Io(_)));
    }
}
