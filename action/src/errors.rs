//! Error types for the stack operation orchestrator

use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml_ng::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Setup error: {0}")]
    SetupError(String),

    #[error("Git error: {0}")]
    GitError(String),

    #[error("Secrets error: {0}")]
    SecretsError(String),

    #[error("No secrets found: {0}")]
    NoSecrets(String),

    #[error("Secrets key mismatch: {0}")]
    KeyMismatch(String),

    #[error("{0}")]
    ProvisionError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Operation panicked: {0}")]
    Panicked(String),

    #[error("Operation already in progress: {0}")]
    AlreadyRunning(String),
}

const KEY_MISMATCH_MARKERS: &[&str] = &[
    "public key not found in secrets",
    "public key not configured",
];

const REPOSITORY_ACCESS_MARKERS: &[&str] = &[
    "repository not found",
    "access denied",
    "could not read from remote repository",
    "could not read username",
    "authentication failed",
    "permission denied",
    "error: 403",
    "error: 404",
];

impl ActionError {
    /// Whether a decryption failure was caused by secrets encrypted for a
    /// different key pair than the one configured in CI.
    pub fn is_key_mismatch(&self) -> bool {
        if matches!(self, ActionError::KeyMismatch(_)) {
            return true;
        }
        let message = self.to_string().to_lowercase();
        KEY_MISMATCH_MARKERS.iter().any(|m| message.contains(m))
    }

    /// Whether a clone failed because the remote refused access (as opposed
    /// to a network or local failure).
    pub fn is_repository_access(&self) -> bool {
        let message = self.to_string().to_lowercase();
        REPOSITORY_ACCESS_MARKERS.iter().any(|m| message.contains(m))
    }

    /// Whether the error came from the cancellation path
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ActionError::Cancelled(_))
    }
}
