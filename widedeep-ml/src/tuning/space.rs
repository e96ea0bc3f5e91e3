//! Declarative hyperparameter search space with conditional scopes.

use crate::error::MlError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A concrete hyperparameter value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
}

impl ParamValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            ParamValue::Int(v) => *v as f64,
            ParamValue::Float(v) => *v,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            ParamValue::Float(_) => None,
        }
    }

    fn matches(&self, other: &ParamValue) -> bool {
        match (self.as_i64(), other.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => (self.as_f64() - other.as_f64()).abs() <= f64::EPSILON * self.as_f64().abs().max(1.0),
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Values keyed by hyperparameter name.
pub type ParamValues = BTreeMap<String, ParamValue>;

/// The set a hyperparameter draws from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Domain {
    Choice { values: Vec<ParamValue> },
    Int { min: i64, max: i64, step: i64 },
}

impl Domain {
    pub fn contains(&self, value: &ParamValue) -> bool {
        match self {
            Domain::Choice { values } => values.iter().any(|v| v.matches(value)),
            Domain::Int { min, max, step } => match value.as_i64() {
                Some(v) => v >= *min && v <= *max && (v - min) % step == 0,
                None => false,
            },
        }
    }

    fn cardinality(&self) -> usize {
        match self {
            Domain::Choice { values } => values.len(),
            Domain::Int { min, max, step } => ((max - min) / step + 1) as usize,
        }
    }

    fn sample(&self, rng: &mut impl Rng) -> ParamValue {
        match self {
            Domain::Choice { values } => values[rng.gen_range(0..values.len())],
            Domain::Int { min, step, .. } => {
                ParamValue::Int(min + step * rng.gen_range(0..self.cardinality()) as i64)
            }
        }
    }

    /// Position of a value scaled to `[0, 1]`.
    fn encode(&self, value: &ParamValue) -> f64 {
        let n = self.cardinality();
        if n <= 1 {
            return 0.0;
        }
        let idx = match self {
            Domain::Choice { values } => values.iter().position(|v| v.matches(value)).unwrap_or(0),
            Domain::Int { min, step, .. } => {
                value.as_i64().map(|v| ((v - min) / step).max(0) as usize).unwrap_or(0)
            }
        };
        idx as f64 / (n - 1) as f64
    }
}

/// Active only when `parent` currently holds one of `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub parent: String,
    pub values: Vec<ParamValue>,
}

impl Condition {
    fn holds(&self, values: &ParamValues) -> bool {
        values
            .get(&self.parent)
            .is_some_and(|v| self.values.iter().any(|c| c.matches(v)))
    }
}

/// One declared hyperparameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameter {
    pub name: String,
    pub domain: Domain,
    pub default: ParamValue,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Untuned parameters always take their default.
    #[serde(default = "default_true")]
    pub tunable: bool,
}

fn default_true() -> bool {
    true
}

impl Hyperparameter {
    pub fn is_active(&self, values: &ParamValues) -> bool {
        self.conditions.iter().all(|c| c.holds(values))
    }
}

/// Ordered hyperparameter declarations.
///
/// The same name may be declared under several disjoint conditional scopes;
/// whichever declaration is active decides the value. Parents must be
/// declared before their children.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterSpace {
    params: Vec<Hyperparameter>,
    #[serde(skip)]
    scope: Vec<Condition>,
    /// Whether names unknown to the space may be registered after construction.
    #[serde(default)]
    pub allow_new_entries: bool,
    /// Whether newly registered names are searched or pinned to their default.
    #[serde(default)]
    pub tune_new_entries: bool,
}

impl HyperparameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params(&self) -> &[Hyperparameter] {
        &self.params
    }

    /// Distinct names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for p in &self.params {
            if !names.contains(&p.name.as_str()) {
                names.push(&p.name);
            }
        }
        names
    }

    /// Declare a choice among discrete values.
    pub fn choice(
        &mut self,
        name: &str,
        values: Vec<ParamValue>,
        default: ParamValue,
    ) -> Result<&mut Self, MlError> {
        self.declare(name, Domain::Choice { values }, default, true)
    }

    /// Declare an integer range `[min, max]` with `step`.
    pub fn int(
        &mut self,
        name: &str,
        min: i64,
        max: i64,
        step: i64,
        default: i64,
    ) -> Result<&mut Self, MlError> {
        if step <= 0 || min > max {
            return Err(MlError::hyperparameter(format!(
                "'{name}': invalid range [{min}, {max}] step {step}"
            )));
        }
        self.declare(name, Domain::Int { min, max, step }, ParamValue::Int(default), true)
    }

    /// Declarations made inside `body` are active only while `parent` holds
    /// one of `values`.
    pub fn conditional_scope<F>(
        &mut self,
        parent: &str,
        values: Vec<ParamValue>,
        body: F,
    ) -> Result<&mut Self, MlError>
    where
        F: FnOnce(&mut Self) -> Result<(), MlError>,
    {
        let declared = self.params.iter().any(|p| p.name == parent);
        if !declared {
            return Err(MlError::hyperparameter(format!(
                "conditional scope parent '{parent}' is not declared"
            )));
        }
        self.scope.push(Condition {
            parent: parent.to_string(),
            values,
        });
        let result = body(self);
        self.scope.pop();
        result.map(|_| self)
    }

    fn declare(
        &mut self,
        name: &str,
        domain: Domain,
        default: ParamValue,
        tunable: bool,
    ) -> Result<&mut Self, MlError> {
        match &domain {
            Domain::Choice { values } if values.is_empty() => {
                return Err(MlError::hyperparameter(format!("'{name}': empty choice")));
            }
            _ => {}
        }
        if !domain.contains(&default) {
            return Err(MlError::hyperparameter(format!(
                "'{name}': default {default} is outside its domain"
            )));
        }
        self.params.push(Hyperparameter {
            name: name.to_string(),
            domain,
            default,
            conditions: self.scope.clone(),
            tunable,
        });
        Ok(self)
    }

    /// Register a hyperparameter the space did not declare up front.
    ///
    /// Fails unless `allow_new_entries` is set; new entries are searched only
    /// when `tune_new_entries` is also set.
    pub fn register_new_entry(
        &mut self,
        name: &str,
        domain: Domain,
        default: ParamValue,
    ) -> Result<(), MlError> {
        if self.params.iter().any(|p| p.name == name) {
            return Ok(());
        }
        if !self.allow_new_entries {
            return Err(MlError::hyperparameter(format!(
                "'{name}' is not part of the search space and new entries are not allowed"
            )));
        }
        let tunable = self.tune_new_entries;
        self.declare(name, domain, default, tunable).map(|_| ())
    }

    /// Whether `name` is active under `values`.
    pub fn is_active(&self, name: &str, values: &ParamValues) -> bool {
        self.params
            .iter()
            .any(|p| p.name == name && p.is_active(values))
    }

    fn resolve<F>(&self, mut pick: F) -> ParamValues
    where
        F: FnMut(&Hyperparameter) -> ParamValue,
    {
        let mut values = ParamValues::new();
        for p in &self.params {
            if values.contains_key(&p.name) || !p.is_active(&values) {
                continue;
            }
            let value = pick(p);
            values.insert(p.name.clone(), value);
        }
        values
    }

    /// Every active hyperparameter at its default.
    pub fn defaults(&self) -> ParamValues {
        self.resolve(|p| p.default)
    }

    /// Draw a value for every active hyperparameter. Inactive ones are never
    /// drawn.
    pub fn sample(&self, rng: &mut impl Rng) -> ParamValues {
        self.resolve(|p| {
            if p.tunable {
                p.domain.sample(rng)
            } else {
                p.default
            }
        })
    }

    /// Check that `values` holds exactly the active hyperparameters, each
    /// inside its domain.
    pub fn validate(&self, values: &ParamValues) -> Result<(), MlError> {
        for name in values.keys() {
            if !self.params.iter().any(|p| &p.name == name) {
                return Err(MlError::hyperparameter(format!(
                    "'{name}' is not part of the search space"
                )));
            }
            if !self.is_active(name, values) {
                return Err(MlError::hyperparameter(format!(
                    "'{name}' is set but inactive under the other values"
                )));
            }
        }
        for p in &self.params {
            if !p.is_active(values) {
                continue;
            }
            let value = values.get(&p.name).ok_or_else(|| {
                MlError::hyperparameter(format!("active hyperparameter '{}' has no value", p.name))
            })?;
            if !p.domain.contains(value) {
                return Err(MlError::hyperparameter(format!(
                    "'{}' = {value} is outside its domain",
                    p.name
                )));
            }
        }
        Ok(())
    }

    /// Numeric encoding in `[0, 1]` per distinct name; inactive names are 0.
    pub fn encode(&self, values: &ParamValues) -> Vec<f64> {
        self.names()
            .into_iter()
            .map(|name| {
                let active = self
                    .params
                    .iter()
                    .find(|p| p.name == name && p.is_active(values));
                match (active, values.get(name)) {
                    (Some(p), Some(v)) => p.domain.encode(v),
                    _ => 0.0,
                }
            })
            .collect()
    }

    /// Number of distinct configurations.
    pub fn cardinality(&self) -> usize {
        self.configurations().len()
    }

    /// Every distinct configuration, in declaration order.
    pub fn configurations(&self) -> Vec<ParamValues> {
        let mut out = Vec::new();
        self.expand(ParamValues::new(), 0, &mut out);
        out
    }

    // Each value of the first unresolved active parameter opens a branch
    // holding its own conditional children.
    fn expand(&self, values: ParamValues, from: usize, out: &mut Vec<ParamValues>) {
        for (i, p) in self.params.iter().enumerate().skip(from) {
            if values.contains_key(&p.name) || !p.is_active(&values) {
                continue;
            }
            let candidates: Vec<ParamValue> = if p.tunable {
                match &p.domain {
                    Domain::Choice { values } => values.clone(),
                    Domain::Int { min, step, .. } => (0..p.domain.cardinality())
                        .map(|k| ParamValue::Int(min + step * k as i64))
                        .collect(),
                }
            } else {
                vec![p.default]
            };
            for v in candidates {
                let mut next = values.clone();
                next.insert(p.name.clone(), v);
                self.expand(next, i + 1, out);
            }
            return;
        }
        out.push(values);
    }

    /// Serializable description of the space.
    pub fn get_config(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
