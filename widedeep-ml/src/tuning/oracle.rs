//! Bayesian optimization oracle.
//!
//! The first trial uses the space defaults, the next `num_initial_points`
//! are drawn at random, and later trials maximise an upper confidence bound
//! of a Gaussian process (Matern 5/2 kernel) fitted to completed trials.

use crate::error::MlError;
use crate::persistence::read_json;
use crate::tuning::space::{HyperparameterSpace, ParamValues};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Random candidates scored by the acquisition function per proposal.
const NUM_CANDIDATES: usize = 256;
/// Random draws before falling back to enumerating the unseen configurations.
const MAX_COLLISIONS: usize = 64;

/// Whether larger or smaller objective values are better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Min,
    Max,
}

/// Metric the search optimises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    pub name: String,
    pub direction: Direction,
}

impl Objective {
    pub fn new(name: &str, direction: Direction) -> Self {
        Self {
            name: name.to_string(),
            direction,
        }
    }

    /// Whether `a` is strictly better than `b`.
    pub fn better(&self, a: f64, b: f64) -> bool {
        match self.direction {
            Direction::Max => a > b,
            Direction::Min => a < b,
        }
    }

    fn signed(&self, score: f64) -> f64 {
        match self.direction {
            Direction::Max => score,
            Direction::Min => -score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrialStatus {
    Running,
    Completed,
    Failed,
}

/// One evaluated (or running) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub trial_id: String,
    pub hyperparameters: ParamValues,
    pub status: TrialStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Matern 5/2 Gaussian process over encoded configurations.
#[derive(Debug, Clone)]
struct GaussianProcess {
    length_scale: f64,
    noise: f64,
    x_train: Array2<f64>,
    l_chol: Array2<f64>,
    alpha: Array1<f64>,
    y_mean: f64,
    y_std: f64,
}

impl GaussianProcess {
    fn kernel(&self, a: &[f64], b: &[f64]) -> f64 {
        let dist = a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt();
        let r = dist / self.length_scale;
        let sqrt5 = 5.0_f64.sqrt();
        (1.0 + sqrt5 * r + 5.0 / 3.0 * r * r) * (-sqrt5 * r).exp()
    }

    fn fit(x: Array2<f64>, y: &Array1<f64>) -> Self {
        let n = y.len();
        let y_mean = y.mean().unwrap_or(0.0);
        let mut y_std = y.std(0.0);
        if y_std < 1e-10 {
            y_std = 1.0;
        }
        let y_norm = y.mapv(|v| (v - y_mean) / y_std);

        let mut gp = Self {
            length_scale: 1.0,
            noise: 1e-4,
            l_chol: Array2::zeros((n, n)),
            alpha: Array1::zeros(n),
            x_train: x,
            y_mean,
            y_std,
        };
        let mut k = Array2::zeros((n, n));
        for i in 0..n {
            for j in 0..n {
                k[[i, j]] = gp.kernel(&gp.x_train.row(i).to_vec(), &gp.x_train.row(j).to_vec());
            }
            k[[i, i]] += gp.noise;
        }
        gp.l_chol = cholesky(&k);
        let z = solve_lower(&gp.l_chol, &y_norm);
        gp.alpha = solve_upper_transposed(&gp.l_chol, &z);
        gp
    }

    /// Posterior mean and standard deviation at `x`.
    fn predict(&self, x: &[f64]) -> (f64, f64) {
        let k_star: Array1<f64> = self
            .x_train
            .rows()
            .into_iter()
            .map(|row| self.kernel(&row.to_vec(), x))
            .collect();
        let mean = k_star.dot(&self.alpha) * self.y_std + self.y_mean;
        let v = solve_lower(&self.l_chol, &k_star);
        let var = (self.kernel(x, x) - v.dot(&v)).max(1e-12);
        (mean, var.sqrt() * self.y_std)
    }
}

fn cholesky(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let mut l = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                l[[i, i]] = (a[[i, i]] - sum).max(1e-10).sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }
    l
}

/// Solve `L x = b`.
fn solve_lower(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut x = Array1::zeros(n);
    for i in 0..n {
        let sum: f64 = (0..i).map(|j| l[[i, j]] * x[j]).sum();
        x[i] = (b[i] - sum) / l[[i, i]];
    }
    x
}

/// Solve `L^T x = b`.
fn solve_upper_transposed(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|j| l[[j, i]] * x[j]).sum();
        x[i] = (b[i] - sum) / l[[i, i]];
    }
    x
}

/// Proposes trials and records their results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BayesianOptimizationOracle {
    pub objective: Objective,
    pub max_trials: usize,
    pub num_initial_points: usize,
    /// Exploration weight of the upper confidence bound.
    pub beta: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    space: HyperparameterSpace,
    trials: Vec<Trial>,
    #[serde(skip, default = "Xoshiro256PlusPlus::from_entropy")]
    rng: Xoshiro256PlusPlus,
}

impl BayesianOptimizationOracle {
    pub fn new(space: HyperparameterSpace, objective: Objective, max_trials: usize) -> Self {
        Self {
            objective,
            max_trials,
            num_initial_points: 2,
            beta: 2.6,
            seed: None,
            space,
            trials: Vec::new(),
            rng: Xoshiro256PlusPlus::from_entropy(),
        }
    }

    pub fn with_num_initial_points(mut self, n: usize) -> Self {
        self.num_initial_points = n;
        self
    }

    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    /// Restore an oracle saved as JSON.
    ///
    /// A persisted seed is reapplied, jumped once per recorded trial so the
    /// restored stream does not replay earlier proposals.
    pub fn load(path: &Path) -> Result<Self, MlError> {
        let mut oracle: Self = read_json(path)?;
        if let Some(seed) = oracle.seed {
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
            for _ in 0..oracle.trials.len() {
                rng.jump();
            }
            oracle.rng = rng;
        }
        Ok(oracle)
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        if let Some(seed) = seed {
            self.rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        }
        self
    }

    pub fn space(&self) -> &HyperparameterSpace {
        &self.space
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn trial(&self, trial_id: &str) -> Option<&Trial> {
        self.trials.iter().find(|t| t.trial_id == trial_id)
    }

    fn seen(&self, values: &ParamValues) -> bool {
        self.trials.iter().any(|t| &t.hyperparameters == values)
    }

    fn completed(&self) -> impl Iterator<Item = &Trial> {
        self.trials
            .iter()
            .filter(|t| t.status == TrialStatus::Completed && t.score.is_some_and(f64::is_finite))
    }

    fn random_unseen(&mut self) -> Option<ParamValues> {
        for _ in 0..MAX_COLLISIONS {
            let values = self.space.sample(&mut self.rng);
            if !self.seen(&values) {
                return Some(values);
            }
        }
        let unseen: Vec<ParamValues> = self
            .space
            .configurations()
            .into_iter()
            .filter(|v| !self.seen(v))
            .collect();
        if unseen.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..unseen.len());
        unseen.into_iter().nth(idx)
    }

    fn propose(&mut self) -> Option<ParamValues> {
        if self.trials.is_empty() {
            return Some(self.space.defaults());
        }

        let completed: Vec<(Vec<f64>, f64)> = self
            .completed()
            .filter_map(|t| Some((self.space.encode(&t.hyperparameters), self.objective.signed(t.score?))))
            .collect();
        if self.trials.len() <= self.num_initial_points || completed.len() < 2 {
            return self.random_unseen();
        }

        let dims = completed[0].0.len();
        let x = Array2::from_shape_fn((completed.len(), dims), |(i, j)| completed[i].0[j]);
        let y: Array1<f64> = completed.iter().map(|(_, s)| *s).collect();
        let gp = GaussianProcess::fit(x, &y);

        let mut best: Option<(f64, ParamValues)> = None;
        for _ in 0..NUM_CANDIDATES {
            let candidate = self.space.sample(&mut self.rng);
            if self.seen(&candidate) {
                continue;
            }
            let (mean, std) = gp.predict(&self.space.encode(&candidate));
            let ucb = mean + self.beta * std;
            if best.as_ref().is_none_or(|(b, _)| ucb > *b) {
                best = Some((ucb, candidate));
            }
        }
        match best {
            Some((_, values)) => Some(values),
            None => self.random_unseen(),
        }
    }

    /// Start the next trial, or `None` when the budget is spent or no unseen
    /// configuration could be found.
    pub fn create_trial(&mut self) -> Option<Trial> {
        if self.trials.len() >= self.max_trials {
            return None;
        }
        let Some(values) = self.propose() else {
            tracing::info!(
                trials = self.trials.len(),
                "Search space exhausted; no unseen configuration left"
            );
            return None;
        };
        let trial = Trial {
            trial_id: format!("{:02}", self.trials.len()),
            hyperparameters: values,
            status: TrialStatus::Running,
            score: None,
            metrics: BTreeMap::new(),
            started_at: chrono::Utc::now(),
            ended_at: None,
            error: None,
        };
        self.trials.push(trial.clone());
        Some(trial)
    }

    fn trial_mut(&mut self, trial_id: &str) -> Result<&mut Trial, MlError> {
        self.trials
            .iter_mut()
            .find(|t| t.trial_id == trial_id)
            .ok_or_else(|| MlError::tuning(format!("unknown trial '{trial_id}'")))
    }

    /// Record the objective value of a finished trial.
    pub fn update_trial(
        &mut self,
        trial_id: &str,
        score: f64,
        metrics: BTreeMap<String, f64>,
    ) -> Result<&Trial, MlError> {
        let trial = self.trial_mut(trial_id)?;
        if trial.status != TrialStatus::Running {
            return Err(MlError::tuning(format!("trial '{trial_id}' is not running")));
        }
        trial.score = Some(score);
        trial.metrics = metrics;
        trial.status = TrialStatus::Completed;
        trial.ended_at = Some(chrono::Utc::now());
        Ok(trial)
    }

    pub fn fail_trial(&mut self, trial_id: &str, error: &str) -> Result<&Trial, MlError> {
        let trial = self.trial_mut(trial_id)?;
        trial.status = TrialStatus::Failed;
        trial.error = Some(error.to_string());
        trial.ended_at = Some(chrono::Utc::now());
        Ok(trial)
    }

    /// Completed trials, best first.
    pub fn get_best_trials(&self, n: usize) -> Vec<&Trial> {
        let mut completed: Vec<&Trial> = self.completed().collect();
        completed.sort_by(|a, b| {
            let (sa, sb) = (
                self.objective.signed(a.score.unwrap_or(f64::NEG_INFINITY)),
                self.objective.signed(b.score.unwrap_or(f64::NEG_INFINITY)),
            );
            sb.total_cmp(&sa)
        });
        completed.truncate(n);
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::hyperparameters::{N_LAYERS, N_UNITS_2, get_hyperparameters};
    use crate::tuning::space::ParamValue;

    fn oracle(max_trials: usize) -> BayesianOptimizationOracle {
        BayesianOptimizationOracle::new(
            get_hyperparameters().unwrap(),
            Objective::new("val_sparse_categorical_accuracy", Direction::Max),
            max_trials,
        )
        .with_seed(Some(17))
    }

    fn score_of(values: &ParamValues) -> f64 {
        // Prefers two layers and wide first layers.
        let layers = values[N_LAYERS].as_f64();
        let units = values["n_units_1"].as_f64();
        0.1 * layers + units / 1280.0
    }

    #[test]
    fn test_first_trial_uses_defaults() {
        let mut oracle = oracle(3);
        let trial = oracle.create_trial().unwrap();
        assert_eq!(trial.trial_id, "00");
        assert_eq!(trial.hyperparameters, oracle.space().defaults());
        assert_eq!(trial.status, TrialStatus::Running);
    }

    #[test]
    fn test_budget_and_uniqueness() {
        let mut oracle = oracle(8);
        while let Some(trial) = oracle.create_trial() {
            let score = score_of(&trial.hyperparameters);
            oracle.update_trial(&trial.trial_id, score, BTreeMap::new()).unwrap();
        }
        assert_eq!(oracle.trials().len(), 8);
        for (i, a) in oracle.trials().iter().enumerate() {
            oracle.space().validate(&a.hyperparameters).unwrap();
            for b in &oracle.trials()[i + 1..] {
                assert_ne!(a.hyperparameters, b.hyperparameters);
            }
        }
    }

    #[test]
    fn test_best_trials_respect_direction() {
        let mut oracle = oracle(5);
        while let Some(trial) = oracle.create_trial() {
            let score = score_of(&trial.hyperparameters);
            oracle.update_trial(&trial.trial_id, score, BTreeMap::new()).unwrap();
        }
        let best = oracle.get_best_trials(2);
        assert_eq!(best.len(), 2);
        assert!(best[0].score.unwrap() >= best[1].score.unwrap());
        let max = oracle
            .trials()
            .iter()
            .filter_map(|t| t.score)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(best[0].score, Some(max));

        let mut min_oracle = oracle.clone();
        min_oracle.objective.direction = Direction::Min;
        let worst = min_oracle.get_best_trials(1);
        assert!(worst[0].score.unwrap() <= best[1].score.unwrap());
    }

    #[test]
    fn test_failed_trials_are_excluded() {
        let mut oracle = oracle(3);
        let trial = oracle.create_trial().unwrap();
        oracle.fail_trial(&trial.trial_id, "diverged").unwrap();
        assert!(oracle.get_best_trials(1).is_empty());
        assert!(oracle.update_trial(&trial.trial_id, 1.0, BTreeMap::new()).is_err());
    }

    #[test]
    fn test_exhausted_space_stops_early() {
        let mut space = HyperparameterSpace::new();
        space.int("depth", 1, 2, 1, 1).unwrap();
        let mut oracle = BayesianOptimizationOracle::new(
            space,
            Objective::new("loss", Direction::Min),
            10,
        )
        .with_seed(Some(1));
        let mut created = 0;
        while let Some(trial) = oracle.create_trial() {
            oracle.update_trial(&trial.trial_id, 1.0, BTreeMap::new()).unwrap();
            created += 1;
        }
        assert_eq!(created, 2);
    }

    #[test]
    fn test_crowded_space_still_finds_last_configuration() {
        let mut space = HyperparameterSpace::new();
        space.int("x", 0, 9, 1, 0).unwrap();
        space.int("y", 0, 9, 1, 0).unwrap();
        let mut oracle = BayesianOptimizationOracle::new(
            space,
            Objective::new("loss", Direction::Min),
            100,
        )
        .with_num_initial_points(0)
        .with_seed(Some(3));

        let configs = oracle.space().configurations();
        let (last, seen) = configs.split_last().unwrap();
        for (i, values) in seen.iter().enumerate() {
            oracle.trials.push(Trial {
                trial_id: format!("{i:02}"),
                hyperparameters: values.clone(),
                status: TrialStatus::Completed,
                score: Some(values["x"].as_f64() + values["y"].as_f64()),
                metrics: BTreeMap::new(),
                started_at: chrono::Utc::now(),
                ended_at: None,
                error: None,
            });
        }

        let trial = oracle.create_trial().unwrap();
        assert_eq!(&trial.hyperparameters, last);
        assert!(oracle.create_trial().is_none());
    }

    #[test]
    fn test_loaded_oracle_keeps_its_seed() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("oracle.json");
        let mut oracle = oracle(10);
        for _ in 0..3 {
            let trial = oracle.create_trial().unwrap();
            let score = score_of(&trial.hyperparameters);
            oracle.update_trial(&trial.trial_id, score, BTreeMap::new()).unwrap();
        }
        crate::persistence::atomic_write_json(&path, &oracle).unwrap();

        let mut a = BayesianOptimizationOracle::load(&path).unwrap();
        let mut b = BayesianOptimizationOracle::load(&path).unwrap();
        assert_eq!(a.seed, Some(17));
        assert_eq!(a.trials().len(), 3);
        for _ in 0..3 {
            let (ta, tb) = (a.create_trial().unwrap(), b.create_trial().unwrap());
            assert_eq!(ta.hyperparameters, tb.hyperparameters);
            let score = score_of(&ta.hyperparameters);
            a.update_trial(&ta.trial_id, score, BTreeMap::new()).unwrap();
            b.update_trial(&tb.trial_id, score, BTreeMap::new()).unwrap();
        }
    }

    #[test]
    fn test_single_layer_trials_never_carry_second_layer() {
        let mut oracle = oracle(10);
        while let Some(trial) = oracle.create_trial() {
            let values = &trial.hyperparameters;
            let two_layers = values[N_LAYERS] == ParamValue::Int(2);
            assert_eq!(values.contains_key(N_UNITS_2), two_layers);
            oracle
                .update_trial(&trial.trial_id, score_of(values), BTreeMap::new())
                .unwrap();
        }
    }

    #[test]
    fn test_gaussian_process_interpolates() {
        let x = Array2::from_shape_vec((3, 1), vec![0.0, 0.5, 1.0]).unwrap();
        let y = Array1::from(vec![0.0, 1.0, 0.0]);
        let gp = GaussianProcess::fit(x, &y);
        let (mean, std) = gp.predict(&[0.5]);
        assert!((mean - 1.0).abs() < 1e-2);
        assert!(std < 0.05);
        let (_, far_std) = gp.predict(&[3.0]);
        assert!(far_std > std);
    }
}
