//! Provisioner backed by the `sc` command-line tool

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::deploy::cancel::CancellationToken;
use crate::errors::ActionError;
use crate::filesys::dir::Dir;
use crate::models::stack::{CiCdBlock, StackDescriptor};
use crate::provisioner::{PreviewSummary, ProvisionParams, Provisioner, StackParams};
use crate::storage::layout::WorkspaceLayout;

const STDERR_TAIL_LINES: usize = 20;

/// Only the part of `server.yaml` the orchestrator cares about
#[derive(Debug, Default, Deserialize)]
struct ServerFile {
    #[serde(default)]
    cicd: Option<CiCdBlock>,
}

/// Runs `sc` subcommands inside the workspace
#[derive(Debug, Clone)]
pub struct ScCliProvisioner {
    binary: String,
    workdir: PathBuf,
}

impl ScCliProvisioner {
    pub fn new(binary: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            workdir: workdir.into(),
        }
    }

    /// Run `sc` with the given arguments. Stdout streams into the job log;
    /// stderr is captured so failures carry the engine's message. The child
    /// is killed if `token` is cancelled first.
    async fn run(&self, token: &CancellationToken, args: &[String]) -> Result<(), ActionError> {
        let subcommand = args.first().cloned().unwrap_or_default();
        info!("Running {} {}", self.binary, args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ActionError::ProvisionError(format!("Failed to run {} {}: {}", self.binary, subcommand, e))
            })?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = token.cancelled() => None,
        };

        let Some(status) = status else {
            warn!("Cancellation requested, stopping {} {}", self.binary, subcommand);
            let _ = child.kill().await;
            return Err(ActionError::Cancelled(format!("{} {} interrupted", self.binary, subcommand)));
        };
        let status = status?;

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(ActionError::ProvisionError(format!(
                "{} {} exited with {}: {}",
                self.binary,
                subcommand,
                status,
                tail(&stderr, STDERR_TAIL_LINES)
            )));
        }

        if !stderr.trim().is_empty() {
            debug!("{} {} stderr:\n{}", self.binary, subcommand, stderr.trim());
        }
        Ok(())
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

fn stack_args(command: &str, params: &StackParams) -> Vec<String> {
    let mut args = vec![
        command.to_string(),
        "-s".to_string(),
        params.stack_name.clone(),
    ];
    if !params.environment.is_empty() {
        args.push("-e".to_string());
        args.push(params.environment.clone());
    }
    if !params.version.is_empty() && command == "deploy" {
        args.push("--version".to_string());
        args.push(params.version.clone());
    }
    args
}

fn parent_args(command: &str, params: &ProvisionParams) -> Vec<String> {
    let mut args = vec![command.to_string()];
    for stack in &params.stacks {
        args.push("-s".to_string());
        args.push(stack.clone());
    }
    args
}

#[async_trait]
impl Provisioner for ScCliProvisioner {
    async fn deploy(&self, token: &CancellationToken, params: &StackParams) -> Result<(), ActionError> {
        self.run(token, &stack_args("deploy", params)).await?;
        Ok(())
    }

    async fn preview(
        &self,
        token: &CancellationToken,
        params: &StackParams,
    ) -> Result<PreviewSummary, ActionError> {
        let mut args = stack_args("deploy", params);
        args.push("--preview".to_string());
        self.run(token, &args).await?;
        Ok(PreviewSummary {
            summary: format!("preview of stack {} completed", params.stack_name),
        })
    }

    async fn provision(
        &self,
        token: &CancellationToken,
        params: &ProvisionParams,
    ) -> Result<(), ActionError> {
        self.run(token, &parent_args("provision", params)).await?;
        Ok(())
    }

    async fn preview_provision(
        &self,
        token: &CancellationToken,
        params: &ProvisionParams,
    ) -> Result<PreviewSummary, ActionError> {
        let mut args = parent_args("provision", params);
        args.push("--preview".to_string());
        self.run(token, &args).await?;
        Ok(PreviewSummary {
            summary: format!("preview of {} parent stacks completed", params.stacks.len()),
        })
    }

    async fn destroy(&self, token: &CancellationToken, params: &StackParams) -> Result<(), ActionError> {
        let mut args = stack_args("destroy", params);
        args.push("--yes".to_string());
        self.run(token, &args).await?;
        Ok(())
    }

    async fn destroy_parent(
        &self,
        token: &CancellationToken,
        params: &ProvisionParams,
    ) -> Result<(), ActionError> {
        let mut args = parent_args("destroy", params);
        args.push("--parent".to_string());
        args.push("--yes".to_string());
        self.run(token, &args).await?;
        Ok(())
    }

    async fn cancel(
        &self,
        token: &CancellationToken,
        params: &StackParams,
        force: bool,
    ) -> Result<(), ActionError> {
        let mut args = stack_args("cancel", params);
        if force {
            args.push("--force".to_string());
        }
        self.run(token, &args).await?;
        Ok(())
    }

    async fn cancel_parent(
        &self,
        token: &CancellationToken,
        params: &ProvisionParams,
        force: bool,
    ) -> Result<(), ActionError> {
        let mut args = parent_args("cancel", params);
        args.push("--parent".to_string());
        if force {
            args.push("--force".to_string());
        }
        self.run(token, &args).await?;
        Ok(())
    }

    async fn read_stacks(&self, root: &Path) -> Result<Vec<StackDescriptor>, ActionError> {
        read_stacks_dir(&WorkspaceLayout::new(root).stacks_dir()).await
    }
}

/// Load every `<stack>/server.yaml` under `stacks_dir`. Unreadable stacks are
/// skipped with a warning.
pub async fn read_stacks_dir(stacks_dir: &Dir) -> Result<Vec<StackDescriptor>, ActionError> {
    if !stacks_dir.exists().await {
        debug!("No stacks directory at {}", stacks_dir.path().display());
        return Ok(Vec::new());
    }

    let mut stacks = Vec::new();
    for path in stacks_dir.list_dirs().await? {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };

        let server_file = Dir::new(&path).file("server.yaml");
        let cicd = if server_file.exists().await {
            match server_file.read_yaml::<ServerFile>().await {
                Ok(server) => server.cicd,
                Err(e) => {
                    warn!("Skipping CI/CD settings of stack {}: {}", name, e);
                    None
                }
            }
        } else {
            None
        };

        stacks.push(StackDescriptor { name, cicd });
    }

    debug!("Loaded {} stacks from {}", stacks.len(), stacks_dir.path().display());
    Ok(stacks)
}
