//! Challenges: ordered criteria with display metadata, loadable from lesson files.

use super::Criterion;
use crate::error::{ConfigError, ConfigResult};
use crate::model::QueryModel;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hints: Vec<String>,
    pub criteria: Vec<Criterion>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriterionOutcome {
    pub criterion: Criterion,
    pub satisfied: bool,
}

/// Per-criterion result of evaluating a challenge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChallengeProgress {
    pub challenge_id: String,
    pub outcomes: Vec<CriterionOutcome>,
}

impl ChallengeProgress {
    /// Every criterion holds. A challenge without criteria is complete.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.satisfied)
    }

    pub fn satisfied_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.satisfied).count()
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// The first criterion still unmet, in lesson order.
    pub fn next_unmet(&self) -> Option<&Criterion> {
        self.outcomes
            .iter()
            .find(|o| !o.satisfied)
            .map(|o| &o.criterion)
    }
}

impl Challenge {
    pub fn from_toml_str(input: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(input)?)
    }

    pub fn from_json_str(input: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(input)?)
    }

    /// Load a lesson file; `.json` files are JSON, anything else TOML.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let challenge = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };
        debug!(path = %path.display(), id = %challenge.id, criteria = challenge.criteria.len(), "loaded challenge");
        Ok(challenge)
    }

    pub fn evaluate(&self, model: &QueryModel, sql: &str) -> ChallengeProgress {
        let outcomes = self
            .criteria
            .iter()
            .map(|criterion| CriterionOutcome {
                criterion: criterion.clone(),
                satisfied: criterion.is_satisfied(model, sql),
            })
            .collect();
        ChallengeProgress {
            challenge_id: self.id.clone(),
            outcomes,
        }
    }
}
