//! Batched, labeled datasets of transformed examples.

use crate::data::schema::{ColumnType, SchemaDefinition};
use crate::data::source::{DataAccessor, RecordIter, resolve_file_patterns};
use crate::data::tensor::{FeatureMap, FeatureValue, Tensor, as_integer};
use crate::data::transform::{RawRecord, TransformArtifact};
use crate::error::MlError;
use std::path::PathBuf;
use std::sync::Arc;

/// One batch: feature columns plus integer class labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub features: FeatureMap,
    pub labels: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// A lazy, restartable sequence of batches over a fixed list of files.
///
/// Files are opened only while iterating; each call to [`Dataset::iter`]
/// starts a fresh pass over every file in order.
#[derive(Clone)]
pub struct Dataset {
    files: Vec<PathBuf>,
    accessor: Arc<dyn DataAccessor>,
    feature_schema: SchemaDefinition,
    label_key: String,
    batch_size: usize,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("files", &self.files)
            .field("accessor", &self.accessor.name())
            .field("features", &self.feature_schema.names())
            .field("label_key", &self.label_key)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Dataset {
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn label_key(&self) -> &str {
        &self.label_key
    }

    pub fn feature_schema(&self) -> &SchemaDefinition {
        &self.feature_schema
    }

    /// One pass over the data.
    pub fn iter(&self) -> Batches<'_> {
        Batches {
            dataset: self,
            next_file: 0,
            current: None,
            failed: false,
        }
    }

    /// Endless passes over the data, restarting after the last file.
    pub fn repeat(&self) -> RepeatedBatches<'_> {
        RepeatedBatches {
            dataset: self,
            pass: self.iter(),
            yielded_this_pass: false,
        }
    }

    fn example(&self, record: &RawRecord) -> Result<(Vec<FeatureValue>, usize), MlError> {
        let mut values = Vec::with_capacity(self.feature_schema.len());
        for spec in &self.feature_schema.features {
            let raw = record.get(&spec.name).ok_or_else(|| {
                MlError::dataset(format!("example is missing feature '{}'", spec.name))
            })?;
            values.push(FeatureValue::from_json(spec, raw)?);
        }

        let raw_label = record.get(&self.label_key).ok_or_else(|| {
            MlError::dataset(format!("example is missing label '{}'", self.label_key))
        })?;
        let label = as_integer(raw_label)
            .filter(|l| *l >= 0)
            .ok_or_else(|| {
                MlError::dataset(format!(
                    "label '{}' must be a non-negative class id, got {raw_label}",
                    self.label_key
                ))
            })?;
        Ok((values, label as usize))
    }

    fn assemble(&self, rows: Vec<(Vec<FeatureValue>, usize)>) -> Result<Batch, MlError> {
        let mut features = FeatureMap::new();
        for (col, spec) in self.feature_schema.features.iter().enumerate() {
            let values: Vec<FeatureValue> = rows.iter().map(|(v, _)| v[col]).collect();
            features.insert(spec.name.clone(), Tensor::stack(spec, &values)?);
        }
        let labels = rows.into_iter().map(|(_, l)| l).collect();
        Ok(Batch { features, labels })
    }
}

/// Iterator over one pass of a [`Dataset`].
pub struct Batches<'a> {
    dataset: &'a Dataset,
    next_file: usize,
    current: Option<RecordIter>,
    failed: bool,
}

impl Batches<'_> {
    fn next_record(&mut self) -> Option<Result<RawRecord, MlError>> {
        loop {
            if let Some(records) = self.current.as_mut() {
                if let Some(record) = records.next() {
                    return Some(record);
                }
                self.current = None;
            }
            let path = self.dataset.files.get(self.next_file)?;
            self.next_file += 1;
            match self.dataset.accessor.records(path) {
                Ok(records) => self.current = Some(records),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl Iterator for Batches<'_> {
    type Item = Result<Batch, MlError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let mut rows = Vec::with_capacity(self.dataset.batch_size);
        while rows.len() < self.dataset.batch_size {
            match self.next_record() {
                Some(Ok(record)) => match self.dataset.example(&record) {
                    Ok(row) => rows.push(row),
                    Err(e) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                },
                Some(Err(e)) => {
                    self.failed = true;
                    return Some(Err(e));
                }
                None => break,
            }
        }
        if rows.is_empty() {
            return None;
        }
        let batch = self.dataset.assemble(rows);
        self.failed = batch.is_err();
        Some(batch)
    }
}

/// Iterator cycling over a [`Dataset`] forever.
pub struct RepeatedBatches<'a> {
    dataset: &'a Dataset,
    pass: Batches<'a>,
    yielded_this_pass: bool,
}

impl Iterator for RepeatedBatches<'_> {
    type Item = Result<Batch, MlError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.pass.next() {
                Some(item) => {
                    self.yielded_this_pass = true;
                    return Some(item);
                }
                None if self.yielded_this_pass => {
                    self.pass = self.dataset.iter();
                    self.yielded_this_pass = false;
                }
                None => {
                    return Some(Err(MlError::dataset(
                        "dataset produced no examples; cannot repeat an empty dataset",
                    )));
                }
            }
        }
    }
}

/// Build a batched dataset of transformed examples.
///
/// The label feature is excluded from the feature columns and returned as the
/// batch labels. Every other feature of the transformed schema becomes a
/// column.
pub fn input_fn(
    file_patterns: &[String],
    accessor: Arc<dyn DataAccessor>,
    artifact: &TransformArtifact,
    label_key: &str,
    batch_size: usize,
) -> Result<Dataset, MlError> {
    if batch_size == 0 {
        return Err(MlError::invalid_input("batch_size must be positive"));
    }
    let schema = artifact.transformed_schema();
    let label_spec = schema.get(label_key).ok_or_else(|| {
        MlError::dataset(format!(
            "label key '{label_key}' is not in the transformed schema"
        ))
    })?;
    if label_spec.dtype != ColumnType::Integer {
        return Err(MlError::dataset(format!(
            "label key '{label_key}' must be an integer feature"
        )));
    }

    let files = resolve_file_patterns(file_patterns)?;
    tracing::info!(
        files = files.len(),
        batch_size,
        accessor = accessor.name(),
        "Built dataset"
    );

    Ok(Dataset {
        files,
        accessor,
        feature_schema: schema.without(label_key),
        label_key: label_key.to_string(),
        batch_size,
    })
}
