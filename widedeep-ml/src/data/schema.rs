//! Schema definitions for raw and transformed features.

use serde::{Deserialize, Serialize};

/// Column data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    String,
}

/// Schema for a single feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub dtype: ColumnType,
    /// Number of buckets for integerized categorical features.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_buckets: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FeatureSpec {
    pub fn float(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dtype: ColumnType::Float,
            num_buckets: None,
            description: None,
        }
    }

    pub fn integer(name: &str, num_buckets: Option<usize>) -> Self {
        Self {
            name: name.to_string(),
            dtype: ColumnType::Integer,
            num_buckets,
            description: None,
        }
    }

    pub fn string(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dtype: ColumnType::String,
            num_buckets: None,
            description: None,
        }
    }
}

/// Ordered set of feature specs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub features: Vec<FeatureSpec>,
}

impl SchemaDefinition {
    pub fn new(features: Vec<FeatureSpec>) -> Self {
        Self { features }
    }

    pub fn get(&self, name: &str) -> Option<&FeatureSpec> {
        self.features.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.features.iter().map(|f| f.name.as_str()).collect()
    }

    /// Copy of this schema without the named feature.
    pub fn without(&self, name: &str) -> Self {
        Self {
            features: self
                .features
                .iter()
                .filter(|f| f.name != name)
                .cloned()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Infer a column type from sample values. Nulls are ignored; any string
/// makes the column a string column.
pub fn infer_column_type(values: &[serde_json::Value]) -> Option<ColumnType> {
    let mut has_int = false;
    let mut has_float = false;

    for v in values {
        match v {
            serde_json::Value::Number(n) => {
                if n.is_f64() {
                    has_float = true;
                } else {
                    has_int = true;
                }
            }
            serde_json::Value::String(_) => return Some(ColumnType::String),
            _ => {}
        }
    }

    if has_float {
        Some(ColumnType::Float)
    } else if has_int {
        Some(ColumnType::Integer)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infer_column_type() {
        assert_eq!(
            infer_column_type(&[json!(1), json!(2)]),
            Some(ColumnType::Integer)
        );
        assert_eq!(
            infer_column_type(&[json!(1), json!(2.5)]),
            Some(ColumnType::Float)
        );
        assert_eq!(
            infer_column_type(&[json!(1), json!("a")]),
            Some(ColumnType::String)
        );
        assert_eq!(infer_column_type(&[json!(null)]), None);
    }

    #[test]
    fn test_without_drops_only_named() {
        let schema = SchemaDefinition::new(vec![
            FeatureSpec::float("a"),
            FeatureSpec::integer("label", Some(7)),
        ]);
        let features = schema.without("label");
        assert_eq!(features.names(), vec!["a"]);
        assert_eq!(schema.len(), 2);
    }

    #[test]
    fn test_num_buckets_skipped_when_absent() {
        let json = serde_json::to_value(FeatureSpec::float("x")).unwrap();
        assert!(json.get("num_buckets").is_none());
    }
}
