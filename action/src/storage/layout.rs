//! Workspace layout

use std::path::{Path, PathBuf};

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

const SC_DIR: &str = ".sc";

/// Paths inside a repository checkout the orchestrator reads or writes
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    /// Repository root
    pub base_dir: PathBuf,
}

impl WorkspaceLayout {
    /// Create a new workspace layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.base_dir
    }

    /// `.sc` configuration directory
    pub fn sc_dir(&self) -> Dir {
        Dir::new(self.base_dir.join(SC_DIR))
    }

    /// Directory holding one subdirectory per stack
    pub fn stacks_dir(&self) -> Dir {
        self.sc_dir().subdir("stacks")
    }

    /// Encrypted secrets store
    pub fn secrets_file(&self) -> File {
        self.sc_dir().file("secrets.yaml")
    }

    /// Default profile configuration consumed by the cryptor
    pub fn profile_config_file(&self) -> File {
        self.sc_dir().file("cfg.default.yaml")
    }

    /// Where the parent repository is cloned for client operations
    pub fn parent_repo_dir(&self) -> Dir {
        self.sc_dir().subdir("parent-repo")
    }

    /// `.git` metadata directory
    pub fn git_dir(&self) -> Dir {
        Dir::new(self.base_dir.join(".git"))
    }

    /// Whether this checkout carries its own encrypted secrets
    pub async fn has_own_secrets(&self) -> bool {
        self.secrets_file().exists().await
    }

    pub async fn is_git_repository(&self) -> bool {
        self.git_dir().exists().await || self.base_dir.join(".git").is_file()
    }
}

impl Default for WorkspaceLayout {
    fn default() -> Self {
        Self::new(".")
    }
}
