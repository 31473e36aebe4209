//! Training scenarios
//!
//! A scenario names the counterpart the model plays, opens the conversation
//! with an initial prompt, and lists the ordered communication steps the
//! trainee is expected to cover. The session engine only reads them.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

const BUILTIN_SCENARIOS: &str = include_str!("../data/scenarios.json");

/// One required communication objective
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub guidance_cue: String,
}

/// A full scenario definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub id: String,
    /// Short alias accepted wherever the id is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Who the model plays
    #[serde(default)]
    pub ai_role: String,
    pub initial_prompt: String,
    pub steps: Vec<ScenarioStep>,
}

impl ScenarioDefinition {
    pub fn step(&self, index: usize) -> Option<&ScenarioStep> {
        self.steps.get(index)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    fn matches(&self, id: &str) -> bool {
        self.id == id || self.key.as_deref() == Some(id)
    }

    pub fn summary(&self) -> ScenarioSummary {
        ScenarioSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
        }
    }
}

/// Listing entry for a scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioSummary {
    pub id: String,
    pub title: String,
    pub description: String,
}

/// Source of scenario definitions
pub trait ScenarioProvider: Send + Sync {
    fn list_scenarios(&self) -> Vec<ScenarioSummary>;

    /// Look up by id or key
    fn get_scenario(&self, id: &str) -> Result<Arc<ScenarioDefinition>, SessionError>;
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read scenarios from {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid scenario JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Duplicate scenario id or key: {0}")]
    Duplicate(String),
    #[error("Scenario {id} is invalid: {reason}")]
    Invalid { id: String, reason: String },
}

/// In-memory catalog loaded from JSON
#[derive(Debug, Clone)]
pub struct ScenarioCatalog {
    scenarios: Vec<Arc<ScenarioDefinition>>,
}

impl ScenarioCatalog {
    /// The scenarios shipped with the binary
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json(BUILTIN_SCENARIOS)
    }

    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let definitions: Vec<ScenarioDefinition> = serde_json::from_str(json)?;
        Self::from_definitions(definitions)
    }

    /// Validate and normalize definitions into a catalog
    pub fn from_definitions(definitions: Vec<ScenarioDefinition>) -> Result<Self, CatalogError> {
        let mut names = HashSet::new();
        let mut scenarios = Vec::with_capacity(definitions.len());

        for mut definition in definitions {
            validate(&definition)?;

            for name in std::iter::once(&definition.id).chain(definition.key.as_ref()) {
                if !names.insert(name.clone()) {
                    return Err(CatalogError::Duplicate(name.clone()));
                }
            }

            for step in &mut definition.steps {
                step.keywords = normalize_keywords(std::mem::take(&mut step.keywords));
            }
            scenarios.push(Arc::new(definition));
        }

        Ok(Self { scenarios })
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }
}

impl ScenarioProvider for ScenarioCatalog {
    fn list_scenarios(&self) -> Vec<ScenarioSummary> {
        self.scenarios.iter().map(|s| s.summary()).collect()
    }

    fn get_scenario(&self, id: &str) -> Result<Arc<ScenarioDefinition>, SessionError> {
        self.scenarios
            .iter()
            .find(|s| s.matches(id))
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }
}

fn validate(definition: &ScenarioDefinition) -> Result<(), CatalogError> {
    let invalid = |reason: &str| CatalogError::Invalid {
        id: definition.id.clone(),
        reason: reason.to_string(),
    };

    if definition.id.trim().is_empty() {
        return Err(invalid("id is empty"));
    }
    if definition.initial_prompt.trim().is_empty() {
        return Err(invalid("initial prompt is empty"));
    }
    if definition.steps.is_empty() {
        return Err(invalid("no communication steps"));
    }
    if definition.steps.iter().any(|s| s.name.trim().is_empty()) {
        return Err(invalid("a step has no name"));
    }
    Ok(())
}

/// Trim, drop blanks, and remove case-insensitive duplicates (first wins)
fn normalize_keywords(keywords: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
        .collect()
}
