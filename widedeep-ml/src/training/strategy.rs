//! Synchronous data-parallel replica strategy.
//!
//! Every replica holds a mirror of the model variables. A global batch is
//! split into one shard per replica, per-replica gradients are computed on
//! the rayon pool and summed before a single optimizer update, so all
//! mirrors stay identical.

use crate::error::MlError;
use std::ops::Range;
use std::time::Instant;

/// Mirrors model variables across `num_replicas_in_sync` local replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirroredStrategy {
    num_replicas: usize,
}

impl Default for MirroredStrategy {
    /// One replica per available CPU.
    fn default() -> Self {
        let num_replicas = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self { num_replicas }
    }
}

impl MirroredStrategy {
    pub fn new(num_replicas: usize) -> Result<Self, MlError> {
        if num_replicas == 0 {
            return Err(MlError::invalid_input(
                "a mirrored strategy needs at least one replica",
            ));
        }
        Ok(Self { num_replicas })
    }

    /// Strategy sized from an optional configured replica count.
    pub fn from_config(replicas: Option<usize>) -> Result<Self, MlError> {
        match replicas {
            Some(n) => Self::new(n),
            None => Ok(Self::default()),
        }
    }

    pub fn num_replicas_in_sync(&self) -> usize {
        self.num_replicas
    }

    /// Enter the strategy scope. Models built through the returned guard
    /// train with mirrored variables. The scope ends when the guard drops.
    pub fn scope(&self) -> StrategyScope<'_> {
        tracing::info!(
            replicas = self.num_replicas,
            "Entered mirrored strategy scope"
        );
        StrategyScope {
            strategy: self,
            entered: Instant::now(),
        }
    }
}

/// Guard for an active [`MirroredStrategy`] scope.
#[derive(Debug)]
pub struct StrategyScope<'a> {
    strategy: &'a MirroredStrategy,
    entered: Instant,
}

impl StrategyScope<'_> {
    pub fn num_replicas_in_sync(&self) -> usize {
        self.strategy.num_replicas
    }
}

impl Drop for StrategyScope<'_> {
    fn drop(&mut self) {
        tracing::info!(
            replicas = self.strategy.num_replicas,
            elapsed_ms = self.entered.elapsed().as_millis() as u64,
            "Left mirrored strategy scope"
        );
    }
}

/// Split `len` rows into at most `replicas` contiguous, non-empty shards
/// whose sizes differ by at most one.
pub fn shard_ranges(len: usize, replicas: usize) -> Vec<Range<usize>> {
    let shards = replicas.max(1).min(len);
    if shards == 0 {
        return Vec::new();
    }
    let base = len / shards;
    let extra = len % shards;
    let mut start = 0;
    (0..shards)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}
