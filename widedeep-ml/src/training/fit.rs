//! Fitting and evaluation loops.

use crate::data::dataset::Dataset;
use crate::error::MlError;
use crate::model::{StepTotals, WideDeepModel};
use crate::training::callbacks::TrainingCallback;
use crate::training::metrics::{EpochLogs, History};
use std::time::Instant;

/// Arguments of [`WideDeepModel::fit`].
#[derive(Debug, Clone, Copy)]
pub struct FitOptions<'a> {
    pub epochs: usize,
    /// Training batches per epoch. The training dataset repeats as needed.
    pub steps_per_epoch: usize,
    pub validation_data: Option<&'a Dataset>,
    /// Validation batches per epoch; a full pass when `None`.
    pub validation_steps: Option<usize>,
}

impl<'a> FitOptions<'a> {
    pub fn new(epochs: usize, steps_per_epoch: usize) -> Self {
        Self {
            epochs,
            steps_per_epoch,
            validation_data: None,
            validation_steps: None,
        }
    }

    pub fn with_validation(mut self, data: &'a Dataset, steps: Option<usize>) -> Self {
        self.validation_data = Some(data);
        self.validation_steps = steps;
        self
    }
}

impl WideDeepModel {
    /// Train for `options.epochs` epochs of exactly `options.steps_per_epoch`
    /// batches, validating once per epoch.
    pub fn fit(
        &mut self,
        train: &Dataset,
        options: &FitOptions<'_>,
        callbacks: &mut [&mut dyn TrainingCallback],
    ) -> Result<History, MlError> {
        if options.epochs == 0 {
            return Err(MlError::invalid_input("epochs must be at least 1"));
        }
        if options.steps_per_epoch == 0 {
            return Err(MlError::invalid_input("steps_per_epoch must be at least 1"));
        }
        if options.validation_steps == Some(0) {
            return Err(MlError::invalid_input("validation_steps must be at least 1"));
        }

        let started = Instant::now();
        let mut history = History::default();
        let mut batches = train.repeat();
        let mut global_step = 0usize;

        for cb in callbacks.iter_mut() {
            cb.on_train_begin()?;
        }

        for epoch in 1..=options.epochs {
            let mut epoch_totals = StepTotals::default();
            for _ in 0..options.steps_per_epoch {
                let batch = batches
                    .next()
                    .ok_or_else(|| MlError::training("training dataset ended unexpectedly"))??;
                let step = self.train_step(&batch)?;
                epoch_totals.merge(step);
                global_step += 1;

                tracing::debug!(
                    epoch,
                    step = global_step,
                    batch_loss = step.loss(),
                    "Finished training batch"
                );
                for cb in callbacks.iter_mut() {
                    cb.on_train_batch_end(global_step, epoch_totals.loss(), epoch_totals.accuracy())?;
                }
            }

            let validation = match options.validation_data {
                Some(data) => Some(self.evaluate(data, options.validation_steps)?),
                None => None,
            };

            let logs = EpochLogs {
                loss: epoch_totals.loss(),
                sparse_categorical_accuracy: epoch_totals.accuracy(),
                val_loss: validation.map(|v| v.loss()),
                val_sparse_categorical_accuracy: validation.map(|v| v.accuracy()),
            };
            tracing::info!(
                epoch,
                epochs = options.epochs,
                loss = logs.loss,
                accuracy = logs.sparse_categorical_accuracy,
                val_loss = ?logs.val_loss,
                val_accuracy = ?logs.val_sparse_categorical_accuracy,
                "Epoch complete"
            );
            history.record_epoch(logs);

            for cb in callbacks.iter_mut() {
                cb.on_epoch_end(epoch, &logs)?;
            }
        }

        for cb in callbacks.iter_mut() {
            cb.on_train_end()?;
        }
        history.total_training_time_secs = started.elapsed().as_secs_f64();
        Ok(history)
    }

    /// Mean loss and accuracy over `steps` batches, or one full pass of the
    /// dataset when `steps` is `None`.
    pub fn evaluate(&self, data: &Dataset, steps: Option<usize>) -> Result<StepTotals, MlError> {
        let mut totals = StepTotals::default();
        let mut seen = 0usize;
        match steps {
            Some(steps) => {
                for batch in data.repeat().take(steps) {
                    totals.merge(self.test_step(&batch?)?);
                    seen += 1;
                }
            }
            None => {
                for batch in data.iter() {
                    totals.merge(self.test_step(&batch?)?);
                    seen += 1;
                }
            }
        }
        if seen == 0 {
            return Err(MlError::training("evaluation dataset produced no batches"));
        }
        tracing::debug!(
            batches = seen,
            loss = totals.loss(),
            accuracy = totals.accuracy(),
            "Evaluated"
        );
        Ok(totals)
    }
}
