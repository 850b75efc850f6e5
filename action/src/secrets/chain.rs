//! Secret revelation across the parent/child repository topology
//!
//! Client stacks may consume secrets from their parent repository, from their
//! own checkout, or both. The chain clones the parent (with an HTTPS→SSH
//! authentication fallback), decrypts each store with a cryptor scoped to its
//! directory, and copies the parent's stacks into the workspace so the
//! provisioner sees plaintext values.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::app::options::ActionEnv;
use crate::deploy::git::Git;
use crate::errors::ActionError;
use crate::filesys::dir::Dir;
use crate::models::operation::{OperationConfig, Scope};
use crate::models::sc_config::ScConfig;
use crate::secrets::cryptor::CryptorFactory;
use crate::secrets::ssh::{https_to_ssh, is_https, redact, ssh_to_https, with_token, SshIdentity};
use crate::storage::layout::WorkspaceLayout;

/// What happened when revealing one secrets store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealOutcome {
    /// Secrets decrypted to plaintext
    Revealed,

    /// The checkout has no secrets store
    NoSecrets,

    /// Secrets are encrypted for another key pair; continuing without them
    KeyMismatch,
}

/// Summary of a revelation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevealReport {
    pub parent: Option<RevealOutcome>,
    pub workspace: Option<RevealOutcome>,
    pub copied_files: usize,
}

/// Clones the parent repository and reveals secrets
pub struct SecretRevelationChain {
    git: Arc<dyn Git>,
    cryptors: Arc<dyn CryptorFactory>,
    layout: WorkspaceLayout,
    env: Arc<ActionEnv>,
}

impl SecretRevelationChain {
    pub fn new(
        git: Arc<dyn Git>,
        cryptors: Arc<dyn CryptorFactory>,
        layout: WorkspaceLayout,
        env: Arc<ActionEnv>,
    ) -> Self {
        Self {
            git,
            cryptors,
            layout,
            env,
        }
    }

    // =============================== CLONE ================================== //

    /// Clone the configured parent repository into the workspace. Returns the
    /// clone directory.
    pub async fn clone_parent(&self, config: &ScConfig) -> Result<Dir, ActionError> {
        let dest = self.layout.parent_repo_dir();
        let mut remote = config.parent_repository.trim().to_string();

        if self.env.is_ci() {
            if let Some(https) = ssh_to_https(&remote) {
                debug!("CI runner detected, cloning parent over HTTPS instead of SSH");
                remote = https;
            }
        }

        info!("Cloning parent repository {}", redact(&remote, self.env.github_token()));
        self.reset_dest(&dest).await?;

        let private_key = config.private_key();

        if !is_https(&remote) {
            return self.clone_over_ssh(&remote, &dest, private_key).await;
        }

        let first_attempt = match (self.env.github_token(), private_key) {
            (Some(token), _) => {
                let authed = with_token(&remote, token)?;
                self.git.clone_repo(&authed, dest.path(), None).await
            }
            (None, Some(_)) => {
                info!("No token available for HTTPS, using SSH key from CI configuration");
                return self.clone_over_ssh(&remote, &dest, private_key).await;
            }
            (None, None) => self.git.clone_repo(&remote, dest.path(), None).await,
        };

        match first_attempt {
            Ok(()) => {
                info!("Parent repository cloned to {}", dest.path().display());
                Ok(dest)
            }
            Err(e) if e.is_repository_access() && private_key.is_some() => {
                warn!(
                    "HTTPS clone was refused ({}), retrying over SSH",
                    self.redact(&e.to_string())
                );
                self.reset_dest(&dest).await?;
                self.clone_over_ssh(&remote, &dest, private_key).await
            }
            Err(e) => Err(ActionError::SetupError(format!(
                "failed to clone parent repository: {}",
                self.redact(&e.to_string())
            ))),
        }
    }

    async fn clone_over_ssh(
        &self,
        remote: &str,
        dest: &Dir,
        private_key: Option<&str>,
    ) -> Result<Dir, ActionError> {
        let ssh_remote = https_to_ssh(remote).unwrap_or_else(|| remote.to_string());

        // the identity's temp files are removed when it goes out of scope
        let identity = match private_key {
            Some(key) => Some(SshIdentity::create(key).await?),
            None => None,
        };
        let ssh_command = identity.as_ref().map(|i| i.ssh_command());

        self.git
            .clone_repo(&ssh_remote, dest.path(), ssh_command.as_deref())
            .await
            .map_err(|e| {
                ActionError::SetupError(format!(
                    "failed to clone parent repository over SSH: {}",
                    self.redact(&e.to_string())
                ))
            })?;

        info!("Parent repository cloned over SSH to {}", dest.path().display());
        Ok(dest.clone())
    }

    async fn reset_dest(&self, dest: &Dir) -> Result<(), ActionError> {
        dest.delete().await?;
        if let Some(parent) = dest.path().parent() {
            Dir::new(parent).create().await?;
        }
        Ok(())
    }

    fn redact(&self, message: &str) -> String {
        redact(message, self.env.github_token())
    }

    // =============================== REVEAL ================================= //

    /// Reveal secrets for the repositories the operation needs. `parent_dir`
    /// is the clone produced by [`Self::clone_parent`], if any.
    pub async fn reveal(
        &self,
        operation: &OperationConfig,
        config: &ScConfig,
        parent_dir: Option<&Dir>,
    ) -> Result<RevealReport, ActionError> {
        let preview = self.env.preview_mode();
        let mut report = RevealReport::default();

        match operation.scope {
            Scope::Parent => {
                let outcome = self
                    .reveal_in(self.layout.root(), config, Scope::Parent, preview)
                    .await?;
                report.workspace = Some(outcome);
            }
            Scope::Client => {
                if let Some(parent_dir) = parent_dir {
                    let outcome = self
                        .reveal_in(parent_dir.path(), config, Scope::Client, preview)
                        .await?;
                    report.parent = Some(outcome);
                    report.copied_files = self.copy_parent_stacks(parent_dir).await?;
                }

                // client checkouts may also carry their own secrets
                if parent_dir.is_none() || self.layout.has_own_secrets().await {
                    let outcome = self
                        .reveal_in(self.layout.root(), config, Scope::Client, preview)
                        .await?;
                    report.workspace = Some(outcome);
                }
            }
        }

        info!(
            parent = ?report.parent,
            workspace = ?report.workspace,
            copied_files = report.copied_files,
            "Secret revelation finished"
        );
        Ok(report)
    }

    async fn reveal_in(
        &self,
        dir: &Path,
        config: &ScConfig,
        scope: Scope,
        preview: bool,
    ) -> Result<RevealOutcome, ActionError> {
        let cryptor = self.cryptors.create(dir, config);

        let result = async {
            cryptor.read_profile_config().await?;
            cryptor.read_secret_files().await?;
            cryptor.decrypt_all(true).await
        }
        .await;

        match result {
            Ok(()) => {
                info!("Revealed secrets in {}", dir.display());
                Ok(RevealOutcome::Revealed)
            }
            Err(ActionError::NoSecrets(message)) if scope == Scope::Client => {
                info!("No secrets to reveal in {}: {}", dir.display(), message);
                Ok(RevealOutcome::NoSecrets)
            }
            Err(ActionError::NoSecrets(message)) => Err(ActionError::SecretsError(format!(
                "parent stack requires secrets but none were found: {}",
                message
            ))),
            Err(e) if e.is_key_mismatch() => {
                report_key_mismatch(dir, &cryptor.public_key(), &e);
                if scope == Scope::Parent && !preview {
                    return Err(ActionError::KeyMismatch(format!(
                        "refusing to run a parent operation without its secrets: {}",
                        e
                    )));
                }
                warn!("Continuing without secrets; unresolved placeholders will remain");
                Ok(RevealOutcome::KeyMismatch)
            }
            Err(e) => Err(ActionError::SecretsError(format!(
                "failed to reveal secrets in {}: {}",
                dir.display(),
                e
            ))),
        }
    }

    async fn copy_parent_stacks(&self, parent_dir: &Dir) -> Result<usize, ActionError> {
        let parent_stacks = WorkspaceLayout::new(parent_dir.path()).stacks_dir();
        if !parent_stacks.exists().await {
            warn!("Parent repository has no stacks directory");
            return Ok(0);
        }

        let copied = parent_stacks.copy_tree(&self.layout.stacks_dir()).await?;
        info!("Copied {} parent stack files into the workspace", copied);
        Ok(copied)
    }
}

fn report_key_mismatch(dir: &Path, public_key: &str, cause: &ActionError) {
    let fingerprint: String = public_key.trim().chars().take(24).collect();
    error!(
        dir = %dir.display(),
        public_key = %fingerprint,
        cause = %cause,
        "Secrets are encrypted for a different key pair"
    );
    error!("Likely causes:");
    error!("  - the SC_CONFIG secret in CI holds a stale key pair");
    error!("  - secrets.yaml was encrypted with a key pair that was never added to CI");
    error!("Fix: allow the CI public key on the secrets store (sc secrets allow) or update SC_CONFIG");
}
