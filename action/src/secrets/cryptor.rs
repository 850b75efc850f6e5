//! Decryption engine seam

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::ActionError;
use crate::models::sc_config::ScConfig;
use crate::storage::layout::WorkspaceLayout;

/// Decrypts the secrets store of one repository checkout
#[async_trait]
pub trait Cryptor: Send + Sync {
    /// Load the profile (project name and key pair)
    async fn read_profile_config(&self) -> Result<(), ActionError>;

    /// Load the encrypted secrets store. Fails with
    /// [`ActionError::NoSecrets`] when the checkout has none.
    async fn read_secret_files(&self) -> Result<(), ActionError>;

    /// Decrypt every secret to plaintext
    async fn decrypt_all(&self, force_reveal: bool) -> Result<(), ActionError>;

    /// Public key the cryptor decrypts for
    fn public_key(&self) -> String;
}

/// Builds a cryptor scoped to a directory
pub trait CryptorFactory: Send + Sync {
    fn create(&self, workdir: &Path, config: &ScConfig) -> Box<dyn Cryptor>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileFile<'a> {
    project_name: &'a str,
    private_key: &'a str,
    public_key: &'a str,
}

/// Cryptor backed by `sc secrets reveal`
pub struct ScCliCryptor {
    binary: String,
    layout: WorkspaceLayout,
    config: ScConfig,
}

impl ScCliCryptor {
    pub fn new(binary: impl Into<String>, workdir: impl Into<PathBuf>, config: ScConfig) -> Self {
        Self {
            binary: binary.into(),
            layout: WorkspaceLayout::new(workdir),
            config,
        }
    }
}

#[async_trait]
impl Cryptor for ScCliCryptor {
    async fn read_profile_config(&self) -> Result<(), ActionError> {
        let profile = self.layout.profile_config_file();
        if profile.exists().await {
            debug!("Using existing profile {}", profile.path().display());
            return Ok(());
        }

        let Some(private_key) = self.config.private_key() else {
            return Err(ActionError::KeyMismatch(
                "public key not configured: SC_CONFIG has no key pair".to_string(),
            ));
        };
        if self.config.public_key.trim().is_empty() {
            return Err(ActionError::KeyMismatch(
                "public key not configured: SC_CONFIG has no publicKey".to_string(),
            ));
        }

        let contents = serde_yaml_ng::to_string(&ProfileFile {
            project_name: &self.config.project_name,
            private_key,
            public_key: &self.config.public_key,
        })?;
        profile.write_string(&contents).await?;
        profile.set_permissions_600().await?;
        info!("Wrote profile {}", profile.path().display());
        Ok(())
    }

    async fn read_secret_files(&self) -> Result<(), ActionError> {
        let secrets = self.layout.secrets_file();
        if !secrets.exists().await {
            return Err(ActionError::NoSecrets(format!(
                "{} does not exist",
                secrets.path().display()
            )));
        }
        Ok(())
    }

    async fn decrypt_all(&self, force_reveal: bool) -> Result<(), ActionError> {
        let mut command = Command::new(&self.binary);
        command
            .args(["secrets", "reveal"])
            .current_dir(self.layout.root())
            .stdin(Stdio::null());
        if force_reveal {
            command.arg("--force");
        }

        let output = command
            .output()
            .await
            .map_err(|e| ActionError::SecretsError(format!("Failed to run {} secrets reveal: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ActionError::SecretsError(format!(
                "secrets reveal failed in {}: {}",
                self.layout.root().display(),
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn public_key(&self) -> String {
        self.config.public_key.clone()
    }
}

/// Creates [`ScCliCryptor`]s
#[derive(Debug, Clone)]
pub struct ScCliCryptorFactory {
    binary: String,
}

impl ScCliCryptorFactory {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl CryptorFactory for ScCliCryptorFactory {
    fn create(&self, workdir: &Path, config: &ScConfig) -> Box<dyn Cryptor> {
        Box::new(ScCliCryptor::new(&self.binary, workdir, config.clone()))
    }
}
