//! The parameter bag a Job or Job-Class carries (§3, Design Note §9).
//!
//! The reference implementation uses a polymorphic hierarchy of parameter
//! classes (string, integer, boolean, multi-choice, ...). Here that becomes a
//! single tagged variant per kind, each carrying its typed value plus
//! display metadata, with one canonical serialization per variant.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metadata shared by every parameter kind, independent of its value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterStub {
    pub name: String,
    pub display_name: String,
    pub required: bool,
    pub sensitive: bool,
}

/// A single named, typed value in a job's parameter bag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ParameterValue {
    String { value: String },
    Integer { value: i64, min: Option<i64>, max: Option<i64> },
    Boolean { value: bool },
    MultiChoice { value: String, choices: Vec<String> },
    MultiLineString { value: Vec<String> },
    MultiValued { values: Vec<String> },
    FileUrl { value: String },
}

/// An opaque, serializable bag of named parameter values, keyed by name.
///
/// Kept as a `BTreeMap` (not `HashMap`) so serialization and iteration order
/// are deterministic, which matters for envelope round-trip tests (§8).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterBag(BTreeMap<String, ParameterValue>);

impl ParameterBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParameterValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bag_round_trips_through_yaml() {
        let mut bag = ParameterBag::new();
        bag.insert("threads", ParameterValue::Integer { value: 4, min: Some(1), max: None });
        bag.insert("label", ParameterValue::String { value: "run-1".into() });

        let yaml = serde_yaml::to_string(&bag).unwrap();
        let back: ParameterBag = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(bag, back);
    }
}
