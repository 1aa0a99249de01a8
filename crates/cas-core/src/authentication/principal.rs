use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute name → ordered values. Keys are unique; values keep insertion
/// order so multi-valued attributes round-trip unchanged.
pub type AttributeMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub attributes: AttributeMap,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: AttributeMap::new(),
        }
    }

    pub fn with_attributes(id: impl Into<String>, attributes: AttributeMap) -> Self {
        Self {
            id: id.into(),
            attributes,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&[String]> {
        self.attributes.get(name).map(Vec::as_slice)
    }
}

/// How attributes from a later source combine with ones already collected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeMergeStrategy {
    /// New keys are added; existing keys keep their current values.
    #[default]
    Add,
    /// New keys are added; existing keys are overwritten.
    Replace,
    /// Values for the same key are unioned, preserving first-seen order.
    MultiValued,
}

impl AttributeMergeStrategy {
    pub fn merge(self, target: &mut AttributeMap, incoming: &AttributeMap) {
        for (name, values) in incoming {
            match self {
                AttributeMergeStrategy::Add => {
                    target
                        .entry(name.clone())
                        .or_insert_with(|| values.clone());
                }
                AttributeMergeStrategy::Replace => {
                    target.insert(name.clone(), values.clone());
                }
                AttributeMergeStrategy::MultiValued => {
                    let existing = target.entry(name.clone()).or_default();
                    for value in values {
                        if !existing.contains(value) {
                            existing.push(value.clone());
                        }
                    }
                }
            }
        }
    }
}
