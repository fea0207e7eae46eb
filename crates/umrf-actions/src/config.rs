//! Declarative action specs.
//!
//! An action package is described as a YAML list of specs; each spec names
//! the action, the kind of implementation backing it, and an opaque config
//! blob the factory interprets.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::factory::ActionBuildError;

/// Action config errors
#[derive(Debug, Error)]
pub enum ActionConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("build error: {0}")]
    Build(#[from] ActionBuildError),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Spec for one registrable action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Action name, matched against UMRF node names
    pub name: String,
    /// Implementation kind, interpreted by the factory
    pub kind: String,
    /// Kind-specific configuration
    #[serde(default)]
    pub config: Value,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            config: Value::Null,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}

/// Top-level actions file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionsConfig {
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

/// Load and validate an actions file
pub fn load_actions_config(path: &Path) -> Result<ActionsConfig, ActionConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ActionsConfig = serde_yaml::from_str(&content)?;
    if config.actions.is_empty() {
        return Err(ActionConfigError::InvalidConfig(
            "actions list is empty".to_string(),
        ));
    }
    validate_specs(&config.actions)?;
    Ok(config)
}

pub(crate) fn validate_specs(specs: &[ActionSpec]) -> Result<(), ActionConfigError> {
    for spec in specs {
        if spec.name.trim().is_empty() {
            return Err(ActionConfigError::InvalidConfig(
                "action name must not be empty".to_string(),
            ));
        }
        if spec.kind.trim().is_empty() {
            return Err(ActionConfigError::InvalidConfig(
                "action kind must not be empty".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_actions_yaml() {
        let yaml = r#"
actions:
  - name: pick
    kind: noop
  - name: report
    kind: set_values
    config:
      values:
        status: done
"#;
        let config: ActionsConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.actions.len(), 2);
        assert_eq!(config.actions[1].kind, "set_values");
        assert_eq!(config.actions[1].config["values"]["status"], "done");
        validate_specs(&config.actions).unwrap();
    }

    #[test]
    fn test_rejects_empty_names() {
        let specs = vec![ActionSpec::new("", "noop")];
        assert!(matches!(
            validate_specs(&specs),
            Err(ActionConfigError::InvalidConfig(_))
        ));
    }
}
