//! Git process execution

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::ActionError;

/// Git operations the orchestrator needs, behind a trait for testability
#[async_trait]
pub trait Git: Send + Sync {
    /// Shallow-clone `url` into `dest`. `ssh_command` pins the SSH identity
    /// (`GIT_SSH_COMMAND`) when cloning over SSH.
    async fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        ssh_command: Option<&str>,
    ) -> Result<(), ActionError>;

    /// Short (7 character) hash of `HEAD`
    async fn short_hash(&self, dir: &Path) -> Result<String, ActionError>;

    /// Subject line of the last commit
    async fn last_commit_message(&self, dir: &Path) -> Result<String, ActionError>;

    /// Whether the tag exists in the local repository
    async fn tag_exists(&self, dir: &Path, tag: &str) -> Result<bool, ActionError>;

    /// Whether the tag exists on `origin`
    async fn remote_tag_exists(&self, dir: &Path, tag: &str) -> Result<bool, ActionError>;

    /// Create an annotated tag on `HEAD`
    async fn create_tag(&self, dir: &Path, tag: &str, message: &str) -> Result<(), ActionError>;

    /// Push a single tag to `origin`
    async fn push_tag(&self, dir: &Path, tag: &str) -> Result<(), ActionError>;
}

/// `git` command-line implementation
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            binary: "git".to_string(),
        }
    }

    async fn run(
        &self,
        dir: Option<&Path>,
        args: &[&str],
        envs: &[(&str, &str)],
    ) -> Result<String, ActionError> {
        // never log full args, clone URLs may carry a token
        let subcommand = args.first().copied().unwrap_or_default();
        debug!("Running git {}", subcommand);

        let mut command = Command::new(&self.binary);
        command.args(args).env("GIT_TERMINAL_PROMPT", "0");
        if let Some(dir) = dir {
            command.current_dir(dir);
        }
        for (key, value) in envs {
            command.env(key, value);
        }

        let output = command
            .output()
            .await
            .map_err(|e| ActionError::GitError(format!("Failed to run git {}: {}", subcommand, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ActionError::GitError(format!(
                "git {} failed: {}",
                subcommand,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Git for GitCli {
    async fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        ssh_command: Option<&str>,
    ) -> Result<(), ActionError> {
        let dest = dest.to_string_lossy();
        let args = ["clone", "--depth", "1", url, dest.as_ref()];
        match ssh_command {
            Some(ssh) => self.run(None, &args, &[("GIT_SSH_COMMAND", ssh)]).await?,
            None => self.run(None, &args, &[]).await?,
        };
        Ok(())
    }

    async fn short_hash(&self, dir: &Path) -> Result<String, ActionError> {
        self.run(Some(dir), &["rev-parse", "--short=7", "HEAD"], &[]).await
    }

    async fn last_commit_message(&self, dir: &Path) -> Result<String, ActionError> {
        self.run(Some(dir), &["log", "-1", "--pretty=%s"], &[]).await
    }

    async fn tag_exists(&self, dir: &Path, tag: &str) -> Result<bool, ActionError> {
        let out = self.run(Some(dir), &["tag", "--list", tag], &[]).await?;
        Ok(out.lines().any(|line| line.trim() == tag))
    }

    async fn remote_tag_exists(&self, dir: &Path, tag: &str) -> Result<bool, ActionError> {
        let reference = format!("refs/tags/{}", tag);
        let out = self
            .run(Some(dir), &["ls-remote", "--tags", "origin", &reference], &[])
            .await?;
        Ok(!out.is_empty())
    }

    async fn create_tag(&self, dir: &Path, tag: &str, message: &str) -> Result<(), ActionError> {
        self.run(Some(dir), &["tag", "-a", tag, "-m", message], &[]).await?;
        Ok(())
    }

    async fn push_tag(&self, dir: &Path, tag: &str) -> Result<(), ActionError> {
        self.run(Some(dir), &["push", "origin", tag], &[]).await?;
        Ok(())
    }
}
