//! Schema definitions for the step plan catalog file

use serde::{Deserialize, Serialize};

/// A single step in a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step title shown to the operator
    #[serde(alias = "step")]
    pub title: String,
    /// Checklist labels the operator ticks off for this step
    #[serde(default)]
    pub sub_steps: Vec<String>,
}

impl StepDefinition {
    pub fn new(title: impl Into<String>, sub_steps: &[&str]) -> Self {
        Self {
            title: title.into(),
            sub_steps: sub_steps.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// An incident type within a class, with its ordered plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogType {
    #[serde(rename = "type")]
    pub name: String,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

/// An incident class grouping several types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogClass {
    pub class: String,
    #[serde(default)]
    pub types: Vec<CatalogType>,
}

/// Top-level catalog document. Some exports wrap the list in one extra array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum CatalogFile {
    Flat(Vec<CatalogClass>),
    Wrapped(Vec<Vec<CatalogClass>>),
}

impl CatalogFile {
    pub(crate) fn into_classes(self) -> Vec<CatalogClass> {
        match self {
            CatalogFile::Flat(classes) => classes,
            CatalogFile::Wrapped(mut outer) if outer.len() == 1 => outer.remove(0),
            CatalogFile::Wrapped(outer) => outer.into_iter().flatten().collect(),
        }
    }
}

/// Match produced by a catalog search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchHit {
    Class {
        class: String,
    },
    Type {
        class: String,
        #[serde(rename = "type")]
        incident_type: String,
    },
    Step {
        class: String,
        #[serde(rename = "type")]
        incident_type: String,
        step: String,
    },
    SubStep {
        class: String,
        #[serde(rename = "type")]
        incident_type: String,
        step: String,
        sub_step: String,
    },
}
