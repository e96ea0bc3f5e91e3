//! Shared fixtures: a small Covertype-shaped dataset written to disk, its
//! transform artifact and a record-counting accessor.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use widedeep_ml::config::TrainerConfig;
use widedeep_ml::data::source::{DataAccessor, JsonlAccessor, RecordIter};
use widedeep_ml::data::transform::{RawRecord, TransformArtifact};
use widedeep_ml::error::MlError;
use widedeep_ml::features::FeatureCatalog;

pub const NUM_CLASSES: usize = 7;

/// Two numeric keys, one categorical key of cardinality 3, seven classes.
pub fn catalog() -> FeatureCatalog {
    FeatureCatalog::new(
        "cover_type",
        &["elevation", "slope"],
        &["wilderness_area"],
        NUM_CLASSES,
    )
}

pub fn config(catalog: FeatureCatalog) -> TrainerConfig {
    let mut config = TrainerConfig {
        catalog,
        ..TrainerConfig::default()
    };
    config.training.train_batch_size = 4;
    config.training.eval_batch_size = 4;
    config.training.seed = Some(42);
    config.training.replicas = Some(2);
    config
}

pub fn raw_record(i: usize) -> RawRecord {
    let record = serde_json::json!({
        "elevation": 2000.0 + ((i * 37) % 1000) as f64,
        "slope": (i % 30) as f64,
        "wilderness_area": i % 3,
        "cover_type": i % NUM_CLASSES,
    });
    match record {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// Transform artifact and transformed train/eval files under `root`.
pub struct Workspace {
    pub artifact_dir: PathBuf,
    pub train_file: PathBuf,
    pub eval_file: PathBuf,
}

pub fn write_workspace(root: &Path, catalog: &FeatureCatalog, train_rows: usize, eval_rows: usize) -> Workspace {
    let train: Vec<RawRecord> = (0..train_rows).map(raw_record).collect();
    let eval: Vec<RawRecord> = (train_rows..train_rows + eval_rows).map(raw_record).collect();

    let artifact = TransformArtifact::analyze(catalog, &train).unwrap();
    let artifact_dir = root.join("transform_output");
    artifact.write(&artifact_dir).unwrap();

    let transform = artifact.transform_features_fn();
    let write = |name: &str, records: &[RawRecord]| -> PathBuf {
        let path = root.join("examples").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = std::fs::File::create(&path).unwrap();
        for record in records {
            let transformed = transform.apply_to_json(record).unwrap();
            writeln!(file, "{}", serde_json::Value::Object(transformed)).unwrap();
        }
        path
    };

    Workspace {
        train_file: write("train.jsonl", &train),
        eval_file: write("eval.jsonl", &eval),
        artifact_dir,
    }
}

/// Counts records handed out per file name.
#[derive(Debug, Default)]
pub struct CountingAccessor {
    counts: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl CountingAccessor {
    pub fn count(&self, file_name: &str) -> usize {
        self.counts
            .lock()
            .unwrap()
            .get(file_name)
            .copied()
            .unwrap_or(0)
    }
}

impl DataAccessor for CountingAccessor {
    fn records(&self, path: &Path) -> Result<RecordIter, MlError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let counts = self.counts.clone();
        let inner = JsonlAccessor.records(path)?;
        Ok(Box::new(inner.inspect(move |_| {
            *counts.lock().unwrap().entry(name.clone()).or_default() += 1;
        })))
    }

    fn name(&self) -> &str {
        "counting"
    }
}
