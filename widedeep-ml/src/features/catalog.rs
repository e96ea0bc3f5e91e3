//! Feature catalog: which raw features exist and how their transformed
//! counterparts are named.

use serde::{Deserialize, Serialize};

/// Declares the label, the numeric and categorical feature keys, and the
/// number of target classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureCatalog {
    pub label_key: String,
    pub numeric_feature_keys: Vec<String>,
    pub categorical_feature_keys: Vec<String>,
    pub num_classes: usize,
    /// Suffix appended to a raw key to name its transformed feature.
    #[serde(default = "default_transformed_suffix")]
    pub transformed_suffix: String,
}

fn default_transformed_suffix() -> String {
    "_xf".to_string()
}

impl Default for FeatureCatalog {
    fn default() -> Self {
        Self::covertype()
    }
}

impl FeatureCatalog {
    pub fn new(
        label_key: &str,
        numeric_feature_keys: &[&str],
        categorical_feature_keys: &[&str],
        num_classes: usize,
    ) -> Self {
        Self {
            label_key: label_key.to_string(),
            numeric_feature_keys: numeric_feature_keys.iter().map(|k| k.to_string()).collect(),
            categorical_feature_keys: categorical_feature_keys
                .iter()
                .map(|k| k.to_string())
                .collect(),
            num_classes,
            transformed_suffix: default_transformed_suffix(),
        }
    }

    /// The forest covertype catalog.
    pub fn covertype() -> Self {
        Self::new(
            "Cover_Type",
            &[
                "Elevation",
                "Aspect",
                "Slope",
                "Horizontal_Distance_To_Hydrology",
                "Vertical_Distance_To_Hydrology",
                "Horizontal_Distance_To_Roadways",
                "Hillshade_9am",
                "Hillshade_Noon",
                "Hillshade_3pm",
                "Horizontal_Distance_To_Fire_Points",
            ],
            &["Wilderness_Area", "Soil_Type"],
            7,
        )
    }

    /// Name of the transformed feature produced for a raw key.
    pub fn transformed_name(&self, key: &str) -> String {
        format!("{key}{}", self.transformed_suffix)
    }

    pub fn transformed_label_key(&self) -> String {
        self.transformed_name(&self.label_key)
    }

    pub fn transformed_numeric_keys(&self) -> Vec<String> {
        self.numeric_feature_keys
            .iter()
            .map(|k| self.transformed_name(k))
            .collect()
    }

    pub fn transformed_categorical_keys(&self) -> Vec<String> {
        self.categorical_feature_keys
            .iter()
            .map(|k| self.transformed_name(k))
            .collect()
    }
}
