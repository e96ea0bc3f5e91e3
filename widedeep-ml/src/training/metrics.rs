//! Per-epoch training metrics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const LOSS: &str = "loss";
pub const ACCURACY: &str = "sparse_categorical_accuracy";
pub const VAL_LOSS: &str = "val_loss";
pub const VAL_ACCURACY: &str = "val_sparse_categorical_accuracy";

/// Metrics of one finished epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochLogs {
    pub loss: f64,
    pub sparse_categorical_accuracy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_sparse_categorical_accuracy: Option<f64>,
}

impl EpochLogs {
    /// Look a metric up by its logged name.
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            LOSS => Some(self.loss),
            ACCURACY => Some(self.sparse_categorical_accuracy),
            VAL_LOSS => self.val_loss,
            VAL_ACCURACY => self.val_sparse_categorical_accuracy,
            _ => None,
        }
    }
}

/// Metric history of a `fit` call, one entry per completed epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub epochs: Vec<EpochLogs>,
    pub best_epoch: Option<usize>,
    pub best_val_loss: Option<f64>,
    pub total_training_time_secs: f64,
}

impl History {
    pub fn record_epoch(&mut self, logs: EpochLogs) {
        self.epochs.push(logs);
        let check_loss = logs.val_loss.unwrap_or(logs.loss);
        if self.best_val_loss.is_none_or(|best| check_loss < best) {
            self.best_val_loss = Some(check_loss);
            self.best_epoch = Some(self.epochs.len());
        }
    }

    pub fn epochs_completed(&self) -> usize {
        self.epochs.len()
    }

    pub fn last(&self) -> Option<&EpochLogs> {
        self.epochs.last()
    }

    /// Values of one metric across epochs; epochs lacking it are skipped.
    pub fn metric(&self, name: &str) -> Vec<f64> {
        self.epochs.iter().filter_map(|e| e.get(name)).collect()
    }

    /// Keras-style `{metric: [per-epoch values]}` map.
    pub fn as_map(&self) -> BTreeMap<String, Vec<f64>> {
        [LOSS, ACCURACY, VAL_LOSS, VAL_ACCURACY]
            .into_iter()
            .map(|name| (name.to_string(), self.metric(name)))
            .filter(|(_, values)| !values.is_empty())
            .collect()
    }
}
