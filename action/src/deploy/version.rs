//! Calendar versioning and release tags

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use crate::deploy::git::Git;
use crate::errors::ActionError;
use crate::storage::layout::WorkspaceLayout;

const SHORT_HASH_LEN: usize = 7;

/// `YYYY.MM.DD-<suffix>`
pub fn calver(date: NaiveDate, suffix: &str) -> String {
    format!("{}-{}", date.format("%Y.%m.%d"), suffix)
}

/// What tagging actually did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagOutcome {
    pub created: bool,
    pub pushed: bool,
}

fn already_exists(err: &ActionError) -> bool {
    err.to_string().to_lowercase().contains("already exists")
}

/// Derives release versions and records them as git tags
pub struct VersionTagger {
    git: Arc<dyn Git>,
    layout: WorkspaceLayout,
}

impl VersionTagger {
    pub fn new(git: Arc<dyn Git>, layout: WorkspaceLayout) -> Self {
        Self { git, layout }
    }

    /// Version for today. Never fails: missing git metadata yields a marked
    /// fallback suffix instead.
    pub async fn generate_version(&self, ci_commit_sha: &str) -> String {
        self.generate_version_on(Utc::now().date_naive(), ci_commit_sha)
            .await
    }

    pub async fn generate_version_on(&self, date: NaiveDate, ci_commit_sha: &str) -> String {
        let sha = ci_commit_sha.trim();
        if sha.len() >= SHORT_HASH_LEN && sha.is_ascii() {
            return calver(date, &sha[..SHORT_HASH_LEN]);
        }

        if !self.layout.is_git_repository().await {
            warn!("No git metadata in {}, using fallback version", self.layout.root().display());
            return calver(date, "nogit");
        }

        match self.git.short_hash(self.layout.root()).await {
            Ok(hash) if hash.trim().is_empty() => calver(date, "nohash"),
            Ok(hash) => {
                let hash: String = hash.trim().chars().take(SHORT_HASH_LEN).collect();
                calver(date, &hash)
            }
            Err(e) => {
                warn!("Failed to read commit hash, using fallback version: {}", e);
                calver(date, "gitfail")
            }
        }
    }

    /// Tag `HEAD` with `version` and push it. A tag that already exists
    /// locally or remotely counts as success.
    pub async fn tag_release(&self, version: &str) -> Result<TagOutcome, ActionError> {
        let dir = self.layout.root();
        let mut outcome = TagOutcome::default();

        if self.git.tag_exists(dir, version).await? {
            info!("Tag {} already exists locally", version);
        } else {
            match self
                .git
                .create_tag(dir, version, &format!("Release {}", version))
                .await
            {
                Ok(()) => outcome.created = true,
                Err(e) if already_exists(&e) => info!("Tag {} already exists locally", version),
                Err(e) => return Err(e),
            }
        }

        match self.git.remote_tag_exists(dir, version).await {
            Ok(true) => {
                info!("Tag {} already exists on origin", version);
                return Ok(outcome);
            }
            Ok(false) => {}
            Err(e) => warn!("Could not check remote tags, pushing anyway: {}", e),
        }

        match self.git.push_tag(dir, version).await {
            Ok(()) => outcome.pushed = true,
            Err(e) if already_exists(&e) => info!("Tag {} already exists on origin", version),
            Err(e) => return Err(e),
        }

        info!("Tagged release {}", version);
        Ok(outcome)
    }
}
