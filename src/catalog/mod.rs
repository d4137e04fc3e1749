//! Step plan catalog: incident class/type pairs and their ordered steps.
//!
//! The catalog is read-only. It is loaded once per process either from a JSON
//! file named in the configuration or from the builtin plans embedded at
//! compile time.

pub mod schema;

pub use schema::{CatalogClass, CatalogType, SearchHit, StepDefinition};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use schema::CatalogFile;

const BUILTIN_CATALOG: &str = include_str!("builtin.json");

/// Parsed builtin catalog, built on first use
static BUILTIN: Lazy<StepPlanCatalog> = Lazy::new(|| match StepPlanCatalog::from_json(BUILTIN_CATALOG) {
    Ok(catalog) => catalog,
    Err(e) => {
        warn!("Failed to parse builtin catalog: {}", e);
        StepPlanCatalog::default()
    }
});

/// Read-only lookup of step plans by (class, type)
#[derive(Debug, Clone, Default)]
pub struct StepPlanCatalog {
    classes: Vec<CatalogClass>,
}

impl StepPlanCatalog {
    pub fn new(classes: Vec<CatalogClass>) -> Self {
        Self { classes }
    }

    /// The catalog embedded in the binary
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Parse a catalog document
    pub fn from_json(json: &str) -> Result<Self> {
        let file: CatalogFile =
            serde_json::from_str(json).context("Failed to parse step plan catalog")?;
        Ok(Self::new(file.into_classes()))
    }

    /// Load a catalog file from disk
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
        let catalog = Self::from_json(&contents)
            .with_context(|| format!("Invalid catalog file: {}", path.display()))?;
        info!(
            "Loaded {} incident classes from {}",
            catalog.classes.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Load from `path` when given, otherwise use the builtin catalog
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_path(path),
            None => {
                debug!("No catalog path configured, using builtin catalog");
                Ok(Self::builtin())
            }
        }
    }

    pub fn classes(&self) -> &[CatalogClass] {
        &self.classes
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Ordered steps for (class, type).
    ///
    /// Matching is case-insensitive on trimmed values and the first match wins.
    /// A blank class or type is `MissingParameter`; an unknown pair yields an
    /// empty plan.
    pub fn lookup(&self, class: &str, incident_type: &str) -> EngineResult<Vec<StepDefinition>> {
        let class_key = normalize(class);
        let type_key = normalize(incident_type);

        if class_key.is_empty() {
            return Err(EngineError::MissingParameter("class".to_string()));
        }
        if type_key.is_empty() {
            return Err(EngineError::MissingParameter("type".to_string()));
        }

        let steps = self
            .classes
            .iter()
            .filter(|c| normalize(&c.class) == class_key)
            .flat_map(|c| c.types.iter())
            .find(|t| normalize(&t.name) == type_key)
            .map(|t| t.steps.clone())
            .unwrap_or_default();

        if steps.is_empty() {
            debug!(class = %class, incident_type = %incident_type, "No step plan in catalog");
        }

        Ok(steps)
    }

    /// Case-insensitive substring search over classes, types, steps and sub-steps
    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        let needle = normalize(query);
        if needle.is_empty() {
            return Vec::new();
        }

        let matches = |s: &str| s.to_lowercase().contains(&needle);
        let mut hits = Vec::new();

        for class in &self.classes {
            if matches(&class.class) {
                hits.push(SearchHit::Class {
                    class: class.class.clone(),
                });
            }

            for ty in &class.types {
                if matches(&ty.name) {
                    hits.push(SearchHit::Type {
                        class: class.class.clone(),
                        incident_type: ty.name.clone(),
                    });
                }

                for step in &ty.steps {
                    if matches(&step.title) {
                        hits.push(SearchHit::Step {
                            class: class.class.clone(),
                            incident_type: ty.name.clone(),
                            step: step.title.clone(),
                        });
                    }
                    for sub in step.sub_steps.iter().filter(|s| matches(s)) {
                        hits.push(SearchHit::SubStep {
                            class: class.class.clone(),
                            incident_type: ty.name.clone(),
                            step: step.title.clone(),
                            sub_step: sub.clone(),
                        });
                    }
                }
            }
        }

        hits
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_catalog() -> StepPlanCatalog {
        StepPlanCatalog::new(vec![
            CatalogClass {
                class: "Malicious Code".to_string(),
                types: vec![CatalogType {
                    name: "Ransomware".to_string(),
                    steps: vec![
                        StepDefinition::new("Identify", &["Collect note"]),
                        StepDefinition::new("Contain", &["Isolate hosts"]),
                    ],
                }],
            },
            CatalogClass {
                class: "malicious code".to_string(),
                types: vec![CatalogType {
                    name: "ransomware".to_string(),
                    steps: vec![StepDefinition::new("Shadowed", &[])],
                }],
            },
        ])
    }

    #[test]
    fn test_lookup_is_case_insensitive_and_trimmed() {
        let catalog = test_catalog();
        let steps = catalog.lookup("  MALICIOUS code ", "ransomWARE ").unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].title, "Identify");
    }

    #[test]
    fn test_lookup_first_match_wins() {
        let catalog = test_catalog();
        let steps = catalog.lookup("malicious code", "ransomware").unwrap();
        assert_ne!(steps[0].title, "Shadowed");
    }

    #[test]
    fn test_lookup_unknown_pair_is_empty() {
        let catalog = StepPlanCatalog::builtin();
        let steps = catalog.lookup("Network Outage", "DNS Failure").unwrap();
        assert!(steps.is_empty());
    }

    #[test]
    fn test_lookup_blank_parameters_fail() {
        let catalog = test_catalog();
        assert!(matches!(
            catalog.lookup("", "Ransomware"),
            Err(EngineError::MissingParameter(p)) if p == "class"
        ));
        assert!(matches!(
            catalog.lookup("Malicious Code", "   "),
            Err(EngineError::MissingParameter(p)) if p == "type"
        ));
    }

    #[test]
    fn test_builtin_catalog_parses() {
        let catalog = StepPlanCatalog::builtin();
        assert!(catalog.class_count() >= 3);
        let steps = catalog.lookup("Malicious Code", "Ransomware").unwrap();
        assert_eq!(steps.len(), 4);
        assert!(steps.iter().all(|s| !s.sub_steps.is_empty()));
    }

    #[test]
    fn test_search_matches_all_levels() {
        let catalog = test_catalog();
        let hits = catalog.search("isolate");
        assert_eq!(hits.len(), 1);
        assert!(matches!(&hits[0], SearchHit::SubStep { sub_step, .. } if sub_step == "Isolate hosts"));

        let hits = catalog.search("RANSOM");
        assert!(hits
            .iter()
            .any(|h| matches!(h, SearchHit::Type { incident_type, .. } if incident_type == "Ransomware")));

        assert!(catalog.search("  ").is_empty());
    }

    #[test]
    fn test_from_path_reads_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("incident_steps.json");
        std::fs::write(
            &path,
            r#"[{"class": "Availability", "types": [{"type": "DDoS", "steps": [{"step": "Engage ISP"}]}]}]"#,
        )
        .unwrap();

        let catalog = StepPlanCatalog::from_path(&path).unwrap();
        let steps = catalog.lookup("availability", "ddos").unwrap();
        assert_eq!(steps, vec![StepDefinition::new("Engage ISP", &[])]);
    }

    #[test]
    fn test_from_path_missing_file_errors() {
        let temp_dir = TempDir::new().unwrap();
        assert!(StepPlanCatalog::from_path(&temp_dir.path().join("missing.json")).is_err());
    }
}
