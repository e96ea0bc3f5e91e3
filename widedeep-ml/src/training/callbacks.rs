//! Training callbacks and the JSON-lines run log.

use crate::error::MlError;
use crate::training::metrics::EpochLogs;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Observes fitting progress.
pub trait TrainingCallback: Send {
    fn on_train_begin(&mut self) -> Result<(), MlError> {
        Ok(())
    }

    /// Called after every optimizer step with the running epoch means.
    fn on_train_batch_end(&mut self, _step: usize, _loss: f64, _accuracy: f64) -> Result<(), MlError> {
        Ok(())
    }

    /// Called at the end of each epoch (1-based) with its metrics.
    fn on_epoch_end(&mut self, _epoch: usize, _logs: &EpochLogs) -> Result<(), MlError> {
        Ok(())
    }

    fn on_train_end(&mut self) -> Result<(), MlError> {
        Ok(())
    }
}

/// One line of the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    TrainBegin {
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    Batch {
        step: usize,
        loss: f64,
        sparse_categorical_accuracy: f64,
    },
    Epoch {
        epoch: usize,
        #[serde(flatten)]
        logs: EpochLogs,
    },
    TrainEnd {
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Appends [`RunEvent`]s as JSON lines to `<run_dir>/events.jsonl`.
///
/// Batch events are written every `update_freq` steps.
#[derive(Debug)]
pub struct RunLogCallback {
    path: PathBuf,
    update_freq: usize,
    file: Option<File>,
}

impl RunLogCallback {
    pub const FILE_NAME: &'static str = "events.jsonl";

    pub fn new(run_dir: &Path) -> Self {
        Self {
            path: run_dir.join(Self::FILE_NAME),
            update_freq: 1,
            file: None,
        }
    }

    pub fn with_update_freq(mut self, update_freq: usize) -> Self {
        self.update_freq = update_freq.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_event(&mut self, event: &RunEvent) -> Result<(), MlError> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?
            }
        };
        let file = self.file.insert(file);
        let line = serde_json::to_string(event)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Read back every event of a run log.
    pub fn read_events(path: &Path) -> Result<Vec<RunEvent>, MlError> {
        std::fs::read_to_string(path)?
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(MlError::from))
            .collect()
    }
}

impl TrainingCallback for RunLogCallback {
    fn on_train_begin(&mut self) -> Result<(), MlError> {
        self.write_event(&RunEvent::TrainBegin {
            timestamp: chrono::Utc::now(),
        })
    }

    fn on_train_batch_end(&mut self, step: usize, loss: f64, accuracy: f64) -> Result<(), MlError> {
        if step % self.update_freq != 0 {
            return Ok(());
        }
        self.write_event(&RunEvent::Batch {
            step,
            loss,
            sparse_categorical_accuracy: accuracy,
        })
    }

    fn on_epoch_end(&mut self, epoch: usize, logs: &EpochLogs) -> Result<(), MlError> {
        self.write_event(&RunEvent::Epoch { epoch, logs: *logs })
    }

    fn on_train_end(&mut self) -> Result<(), MlError> {
        self.write_event(&RunEvent::TrainEnd {
            timestamp: chrono::Utc::now(),
        })?;
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn logs(loss: f64) -> EpochLogs {
        EpochLogs {
            loss,
            sparse_categorical_accuracy: 0.5,
            val_loss: None,
            val_sparse_categorical_accuracy: None,
        }
    }

    #[test]
    fn test_run_log_writes_jsonl() {
        let dir = TempDir::new().unwrap();
        let run_dir = dir.path().join("logs");
        let mut cb = RunLogCallback::new(&run_dir).with_update_freq(2);
        cb.on_train_begin().unwrap();
        for step in 1..=4 {
            cb.on_train_batch_end(step, 1.0, 0.25).unwrap();
        }
        cb.on_epoch_end(1, &logs(0.9)).unwrap();
        cb.on_train_end().unwrap();

        let events = RunLogCallback::read_events(cb.path()).unwrap();
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], RunEvent::TrainBegin { .. }));
        assert_eq!(
            events[1],
            RunEvent::Batch {
                step: 2,
                loss: 1.0,
                sparse_categorical_accuracy: 0.25
            }
        );
        assert!(matches!(events[3], RunEvent::Epoch { epoch: 1, .. }));
        assert!(matches!(events[4], RunEvent::TrainEnd { .. }));
    }
}
