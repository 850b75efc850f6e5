//! Machine-readable step outputs

use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::errors::ActionError;
use crate::filesys::file::File;
use crate::utils::format_duration;

/// Writes `key=value` lines to `GITHUB_OUTPUT`, or stdout when unset
#[derive(Debug, Clone)]
pub struct OutputWriter {
    target: Option<File>,
}

impl OutputWriter {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            target: path.map(File::new),
        }
    }

    pub async fn write(&self, outputs: &[(&str, String)]) -> Result<(), ActionError> {
        let mut lines = String::new();
        for (key, value) in outputs {
            // multi-line values would break the key=value format
            let value = value.replace(['\r', '\n'], " ");
            lines.push_str(&format!("{}={}\n", key, value));
        }

        match &self.target {
            Some(file) => {
                debug!("Writing {} outputs to {}", outputs.len(), file.path().display());
                file.append_string(&lines).await
            }
            None => {
                print!("{}", lines);
                Ok(())
            }
        }
    }
}

/// Outputs emitted after an operation finishes
#[derive(Debug, Clone)]
pub struct OperationOutputs {
    pub stack_name: String,
    pub duration: Duration,
    pub preview_mode: bool,
    pub environment: String,
    pub version: String,
}

impl OperationOutputs {
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("stack-name", self.stack_name.clone()),
            ("duration", format_duration(self.duration)),
            ("preview-mode", self.preview_mode.to_string()),
        ];
        if !self.environment.is_empty() {
            pairs.push(("environment", self.environment.clone()));
        }
        if !self.version.is_empty() {
            pairs.push(("version", self.version.clone()));
        }
        pairs
    }
}

/// How the cleanup after a cancellation ended, reported as `cleanup-status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStatus {
    Completed,
    Failed,
    Timeout,
}

impl CleanupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupStatus::Completed => "completed",
            CleanupStatus::Failed => "failed",
            CleanupStatus::Timeout => "timeout",
        }
    }

    /// `duration` and `cleanup-status` outputs
    pub fn to_pairs(&self, duration: Duration) -> Vec<(&'static str, String)> {
        vec![
            ("duration", format_duration(duration)),
            ("cleanup-status", self.as_str().to_string()),
        ]
    }
}
