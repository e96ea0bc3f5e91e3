//! Wide-and-deep hyperparameters: the search space and the typed
//! configuration the model builder consumes.

use crate::config::TuningConfig;
use crate::error::MlError;
use crate::tuning::space::{Domain, HyperparameterSpace, ParamValue, ParamValues};
use serde::{Deserialize, Serialize};

pub const LEARNING_RATE: &str = "learning_rate";
pub const N_LAYERS: &str = "n_layers";
pub const N_UNITS_1: &str = "n_units_1";
pub const N_UNITS_2: &str = "n_units_2";

pub const LEARNING_RATE_CHOICES: [f64; 3] = [1e-2, 1e-3, 1e-4];
pub const DEFAULT_LEARNING_RATE: f64 = 1e-3;
pub const MIN_UNITS: usize = 8;
pub const MAX_UNITS: usize = 128;
pub const UNITS_STEP: usize = 8;
pub const DEFAULT_UNITS: usize = 8;

/// Search space for the wide-and-deep classifier.
///
/// `n_units_2` lives only under `n_layers == 2`, so it is never sampled for a
/// single-layer model.
pub fn get_hyperparameters() -> Result<HyperparameterSpace, MlError> {
    let mut space = HyperparameterSpace::new();
    space.choice(
        LEARNING_RATE,
        LEARNING_RATE_CHOICES.iter().map(|lr| ParamValue::Float(*lr)).collect(),
        ParamValue::Float(DEFAULT_LEARNING_RATE),
    )?;
    space.int(N_LAYERS, 1, 2, 1, 1)?;

    let (min, max, step, default) = (
        MIN_UNITS as i64,
        MAX_UNITS as i64,
        UNITS_STEP as i64,
        DEFAULT_UNITS as i64,
    );
    space.conditional_scope(N_LAYERS, vec![ParamValue::Int(1)], |s| {
        s.int(N_UNITS_1, min, max, step, default)?;
        Ok(())
    })?;
    space.conditional_scope(N_LAYERS, vec![ParamValue::Int(2)], |s| {
        s.int(N_UNITS_1, min, max, step, default)?;
        s.int(N_UNITS_2, min, max, step, default)?;
        Ok(())
    })?;
    Ok(space)
}

/// [`get_hyperparameters`] with the new-entry policy of `tuning`.
pub fn hyperparameter_space(tuning: &TuningConfig) -> Result<HyperparameterSpace, MlError> {
    let mut space = get_hyperparameters()?;
    space.allow_new_entries = tuning.allow_new_entries;
    space.tune_new_entries = tuning.tune_new_entries;
    Ok(space)
}

/// Deep-branch shape. Only layers that exist carry a unit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepLayers {
    One { units_1: usize },
    Two { units_1: usize, units_2: usize },
}

impl DeepLayers {
    pub fn n_layers(&self) -> usize {
        match self {
            DeepLayers::One { .. } => 1,
            DeepLayers::Two { .. } => 2,
        }
    }

    pub fn units(&self) -> Vec<usize> {
        match self {
            DeepLayers::One { units_1 } => vec![*units_1],
            DeepLayers::Two { units_1, units_2 } => vec![*units_1, *units_2],
        }
    }
}

/// A resolved, immutable hyperparameter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FlatValues", into = "FlatValues")]
pub struct HyperParameters {
    learning_rate: f64,
    deep_layers: DeepLayers,
}

/// Wire form: the flat name/value mapping used by tuner records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct FlatValues {
    learning_rate: f64,
    n_layers: usize,
    n_units_1: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    n_units_2: Option<usize>,
}

impl TryFrom<FlatValues> for HyperParameters {
    type Error = MlError;

    fn try_from(flat: FlatValues) -> Result<Self, Self::Error> {
        let layers = match (flat.n_layers, flat.n_units_2) {
            (1, None) => DeepLayers::One {
                units_1: flat.n_units_1,
            },
            (1, Some(_)) => {
                tracing::warn!(hyperparameter = N_UNITS_2, "Dropping inactive hyperparameter value");
                DeepLayers::One {
                    units_1: flat.n_units_1,
                }
            }
            (2, Some(units_2)) => DeepLayers::Two {
                units_1: flat.n_units_1,
                units_2,
            },
            (2, None) => {
                return Err(MlError::hyperparameter("n_layers = 2 requires n_units_2"));
            }
            (n, _) => {
                return Err(MlError::hyperparameter(format!(
                    "n_layers must be 1 or 2, got {n}"
                )));
            }
        };
        HyperParameters::new(flat.learning_rate, layers)
    }
}

impl From<HyperParameters> for FlatValues {
    fn from(hp: HyperParameters) -> Self {
        let (n_units_1, n_units_2) = match hp.deep_layers {
            DeepLayers::One { units_1 } => (units_1, None),
            DeepLayers::Two { units_1, units_2 } => (units_1, Some(units_2)),
        };
        FlatValues {
            learning_rate: hp.learning_rate,
            n_layers: hp.deep_layers.n_layers(),
            n_units_1,
            n_units_2,
        }
    }
}

impl Default for HyperParameters {
    fn default() -> Self {
        Self {
            learning_rate: DEFAULT_LEARNING_RATE,
            deep_layers: DeepLayers::One {
                units_1: DEFAULT_UNITS,
            },
        }
    }
}

impl std::fmt::Display for HyperParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "learning_rate={}, n_layers={}", self.learning_rate, self.n_layers())?;
        for (i, units) in self.units().iter().enumerate() {
            write!(f, ", n_units_{}={units}", i + 1)?;
        }
        Ok(())
    }
}

impl HyperParameters {
    /// Validated constructor.
    pub fn new(learning_rate: f64, deep_layers: DeepLayers) -> Result<Self, MlError> {
        if !LEARNING_RATE_CHOICES
            .iter()
            .any(|lr| (lr - learning_rate).abs() <= lr * 1e-9)
        {
            return Err(MlError::hyperparameter(format!(
                "learning_rate {learning_rate} is not one of {LEARNING_RATE_CHOICES:?}"
            )));
        }
        for (i, units) in deep_layers.units().iter().enumerate() {
            if *units < MIN_UNITS || *units > MAX_UNITS || (units - MIN_UNITS) % UNITS_STEP != 0 {
                return Err(MlError::hyperparameter(format!(
                    "n_units_{} = {units} must be in [{MIN_UNITS}, {MAX_UNITS}] with step {UNITS_STEP}",
                    i + 1
                )));
            }
        }
        Ok(Self {
            learning_rate,
            deep_layers,
        })
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn deep_layers(&self) -> DeepLayers {
        self.deep_layers
    }

    pub fn n_layers(&self) -> usize {
        self.deep_layers.n_layers()
    }

    pub fn units(&self) -> Vec<usize> {
        self.deep_layers.units()
    }

    /// Flat values as the search space sees them.
    pub fn values(&self) -> ParamValues {
        let mut values = ParamValues::new();
        values.insert(LEARNING_RATE.into(), ParamValue::Float(self.learning_rate));
        values.insert(N_LAYERS.into(), ParamValue::Int(self.n_layers() as i64));
        for (i, units) in self.units().iter().enumerate() {
            values.insert(format!("n_units_{}", i + 1), ParamValue::Int(*units as i64));
        }
        values
    }

    /// Build from flat values against the frozen default space.
    pub fn from_values(values: &ParamValues) -> Result<Self, MlError> {
        Self::from_values_in(&get_hyperparameters()?, values)
    }

    /// Build from flat values checked against `space`.
    ///
    /// Inactive conditional keys left over from another branch are dropped
    /// with a warning. Names the space does not declare are registered as new
    /// entries, which fails unless the space allows them. The model builder
    /// does not read registered entries. Anything else the space rejects is
    /// an error.
    pub fn from_values_in(space: &HyperparameterSpace, values: &ParamValues) -> Result<Self, MlError> {
        let mut space = space.clone();
        for (name, value) in values {
            if !space.names().contains(&name.as_str()) {
                space.register_new_entry(
                    name,
                    Domain::Choice {
                        values: vec![*value],
                    },
                    *value,
                )?;
                tracing::warn!(hyperparameter = %name, %value, "Registered new hyperparameter the model does not use");
            }
        }
        let known = space.names();
        let mut active = values.clone();
        active.retain(|name, _| {
            if known.contains(&name.as_str()) && !space.is_active(name, values) {
                tracing::warn!(hyperparameter = %name, "Dropping inactive hyperparameter value");
                return false;
            }
            true
        });
        space.validate(&active)?;

        let lr = active[LEARNING_RATE].as_f64();
        let units = |name: &str| -> Result<usize, MlError> {
            active
                .get(name)
                .and_then(|v| v.as_i64())
                .map(|v| v as usize)
                .ok_or_else(|| MlError::hyperparameter(format!("missing '{name}'")))
        };
        let layers = match active[N_LAYERS].as_i64() {
            Some(1) => DeepLayers::One {
                units_1: units(N_UNITS_1)?,
            },
            Some(2) => DeepLayers::Two {
                units_1: units(N_UNITS_1)?,
                units_2: units(N_UNITS_2)?,
            },
            other => {
                return Err(MlError::hyperparameter(format!(
                    "n_layers must be 1 or 2, got {other:?}"
                )));
            }
        };
        Self::new(lr, layers)
    }

    /// Defaults of the search space.
    pub fn from_space_defaults(space: &HyperparameterSpace) -> Result<Self, MlError> {
        Self::from_values(&space.defaults())
    }

    /// Deserialize a supplied configuration. Accepts either the flat values
    /// mapping or a `{"space": ..., "values": {...}}` tuner record.
    pub fn from_config(config: &serde_json::Value) -> Result<Self, MlError> {
        Self::from_config_in(&get_hyperparameters()?, config)
    }

    /// [`HyperParameters::from_config`] checked against `space`.
    pub fn from_config_in(
        space: &HyperparameterSpace,
        config: &serde_json::Value,
    ) -> Result<Self, MlError> {
        let values = config.get("values").unwrap_or(config);
        let values: ParamValues = serde_json::from_value(values.clone()).map_err(|e| {
            MlError::hyperparameter(format!("malformed hyperparameter configuration: {e}"))
        })?;
        Self::from_values_in(space, &values)
    }

    /// `{"space": ..., "values": {...}}` tuner record.
    pub fn get_config(&self) -> serde_json::Value {
        serde_json::json!({
            "space": get_hyperparameters()
                .map(|space| space.get_config())
                .unwrap_or(serde_json::Value::Null),
            "values": self.values(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;
    use serde_json::json;

    #[test]
    fn test_space_defaults() {
        let hp = HyperParameters::from_space_defaults(&get_hyperparameters().unwrap()).unwrap();
        assert_eq!(hp, HyperParameters::default());
        assert_eq!(hp.learning_rate(), 1e-3);
        assert_eq!(hp.n_layers(), 1);
        assert_eq!(hp.units(), vec![8]);
    }

    #[test]
    fn test_space_cardinality() {
        // 3 learning rates x (16 one-layer + 16*16 two-layer shapes)
        assert_eq!(get_hyperparameters().unwrap().cardinality(), 3 * (16 + 256));
    }

    #[test]
    fn test_from_config_wrapped_and_flat() {
        let wrapped = json!({
            "space": [],
            "values": {"learning_rate": 0.01, "n_layers": 2, "n_units_1": 64, "n_units_2": 16}
        });
        let hp = HyperParameters::from_config(&wrapped).unwrap();
        assert_eq!(
            hp.deep_layers(),
            DeepLayers::Two {
                units_1: 64,
                units_2: 16
            }
        );

        let flat = json!({"learning_rate": 0.0001, "n_layers": 1, "n_units_1": 24});
        let hp = HyperParameters::from_config(&flat).unwrap();
        assert_eq!(hp.units(), vec![24]);
    }

    #[test]
    fn test_from_config_drops_stale_layer_two_units() {
        let config = json!({"learning_rate": 0.001, "n_layers": 1, "n_units_1": 8, "n_units_2": 32});
        let hp = HyperParameters::from_config(&config).unwrap();
        assert_eq!(hp.deep_layers(), DeepLayers::One { units_1: 8 });
    }

    #[test]
    fn test_from_config_rejects_malformed() {
        assert!(HyperParameters::from_config(&json!({"learning_rate": "fast"})).is_err());
        assert!(
            HyperParameters::from_config(&json!({"learning_rate": 0.5, "n_layers": 1, "n_units_1": 8}))
                .is_err()
        );
        assert!(
            HyperParameters::from_config(&json!({"learning_rate": 0.001, "n_layers": 2, "n_units_1": 8}))
                .is_err()
        );
        assert!(
            HyperParameters::from_config(&json!({"learning_rate": 0.001, "n_layers": 1, "n_units_1": 12}))
                .is_err()
        );
        assert!(
            HyperParameters::from_config(
                &json!({"learning_rate": 0.001, "n_layers": 1, "n_units_1": 8, "dropout": 0.2})
            )
            .is_err()
        );
    }

    #[test]
    fn test_serde_flat_form() {
        let hp = HyperParameters::new(
            1e-2,
            DeepLayers::Two {
                units_1: 16,
                units_2: 8,
            },
        )
        .unwrap();
        let json = serde_json::to_value(hp).unwrap();
        assert_eq!(
            json,
            json!({"learning_rate": 0.01, "n_layers": 2, "n_units_1": 16, "n_units_2": 8})
        );
        let back: HyperParameters = serde_json::from_value(json).unwrap();
        assert_eq!(back, hp);
    }

    #[test]
    fn test_stale_layer_two_units_dropped_on_every_path() {
        let stale = json!({"learning_rate": 0.01, "n_layers": 1, "n_units_1": 16, "n_units_2": 8});
        let via_serde: HyperParameters = serde_json::from_value(stale.clone()).unwrap();
        let via_config = HyperParameters::from_config(&stale).unwrap();
        assert_eq!(via_serde, via_config);
        assert_eq!(via_serde.deep_layers(), DeepLayers::One { units_1: 16 });
    }

    #[test]
    fn test_unknown_entry_follows_space_policy() {
        let supplied = json!({"learning_rate": 0.001, "n_layers": 1, "n_units_1": 8, "dropout": 0.5});

        let frozen = hyperparameter_space(&TuningConfig::default()).unwrap();
        let err = HyperParameters::from_config_in(&frozen, &supplied).unwrap_err();
        assert!(matches!(err, MlError::Hyperparameter(_)));

        let open = hyperparameter_space(&TuningConfig {
            allow_new_entries: true,
            ..TuningConfig::default()
        })
        .unwrap();
        let hp = HyperParameters::from_config_in(&open, &supplied).unwrap();
        assert_eq!(hp, HyperParameters::default());
    }

    #[test]
    fn test_get_config_roundtrips_through_from_config() {
        let hp = HyperParameters::default();
        assert_eq!(HyperParameters::from_config(&hp.get_config()).unwrap(), hp);
    }

    proptest! {
        #[test]
        fn sampled_values_respect_conditional_scope(seed in any::<u64>()) {
            let space = get_hyperparameters().unwrap();
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
            let values = space.sample(&mut rng);

            prop_assert!(space.validate(&values).is_ok());
            match values[N_LAYERS].as_i64() {
                Some(1) => prop_assert!(!values.contains_key(N_UNITS_2)),
                Some(2) => prop_assert!(values.contains_key(N_UNITS_2)),
                other => prop_assert!(false, "unexpected n_layers {:?}", other),
            }
            prop_assert!(values.contains_key(N_UNITS_1));
            prop_assert!(HyperParameters::from_values(&values).is_ok());
        }
    }
}
