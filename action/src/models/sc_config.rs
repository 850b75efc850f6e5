//! CI configuration blob (`SC_CONFIG`)

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::errors::ActionError;

/// Project and key configuration injected into the CI runner
#[derive(Debug, Clone, Deserialize)]
pub struct ScConfig {
    #[serde(default, rename = "projectName", alias = "ProjectName", alias = "project_name")]
    pub project_name: String,

    #[serde(default, rename = "parentRepository", alias = "ParentRepository", alias = "parent_repository")]
    pub parent_repository: String,

    #[serde(default, rename = "privateKey", alias = "PrivateKey", alias = "private_key")]
    pub private_key: Option<SecretString>,

    #[serde(default, rename = "publicKey", alias = "PublicKey", alias = "public_key")]
    pub public_key: String,
}

impl ScConfig {
    /// Parse the YAML blob. A missing project name is fatal because it
    /// determines state-storage identity downstream.
    pub fn parse(raw: &str) -> Result<Self, ActionError> {
        if raw.trim().is_empty() {
            return Err(ActionError::ConfigError(
                "SC_CONFIG is empty or not set".to_string(),
            ));
        }

        let config: ScConfig = serde_yaml_ng::from_str(raw)?;
        if config.project_name.trim().is_empty() {
            return Err(ActionError::ConfigError(
                "projectName is required in SC_CONFIG".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn has_parent_repository(&self) -> bool {
        !self.parent_repository.trim().is_empty()
    }

    pub fn private_key(&self) -> Option<&str> {
        self.private_key
            .as_ref()
            .map(|k| k.expose_secret())
            .filter(|k| !k.trim().is_empty())
    }

    /// Both halves of the key pair are present
    pub fn has_keys(&self) -> bool {
        self.private_key().is_some() && !self.public_key.trim().is_empty()
    }
}
