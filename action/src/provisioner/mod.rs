//! Provisioning engine seam
//!
//! The provisioner is the only component allowed to mutate infrastructure.
//! Everything it does is reached through [`Provisioner`], so the executor
//! and signal handler can be exercised against in-memory fakes.

pub mod cli;

use std::path::Path;

use async_trait::async_trait;

use crate::deploy::cancel::CancellationToken;
use crate::errors::ActionError;
use crate::models::stack::StackDescriptor;

/// Parameters for client-stack operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackParams {
    pub stack_name: String,
    pub environment: String,
    pub version: String,
}

impl StackParams {
    pub fn new(stack_name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            environment: environment.into(),
            version: String::new(),
        }
    }
}

/// Parameters for parent-stack operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionParams {
    pub stacks: Vec<String>,
}

impl ProvisionParams {
    pub fn new(stacks: Vec<String>) -> Self {
        Self { stacks }
    }

    /// Parse a comma separated stack list such as `infra,dns`
    pub fn parse(stack_names: &str) -> Self {
        let stacks = stack_names
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self { stacks }
    }
}

/// Outcome of a dry run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviewSummary {
    pub summary: String,
}

/// Provisioning engine contract
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn deploy(&self, token: &CancellationToken, params: &StackParams) -> Result<(), ActionError>;

    async fn preview(
        &self,
        token: &CancellationToken,
        params: &StackParams,
    ) -> Result<PreviewSummary, ActionError>;

    async fn provision(
        &self,
        token: &CancellationToken,
        params: &ProvisionParams,
    ) -> Result<(), ActionError>;

    async fn preview_provision(
        &self,
        token: &CancellationToken,
        params: &ProvisionParams,
    ) -> Result<PreviewSummary, ActionError>;

    async fn destroy(&self, token: &CancellationToken, params: &StackParams) -> Result<(), ActionError>;

    async fn destroy_parent(
        &self,
        token: &CancellationToken,
        params: &ProvisionParams,
    ) -> Result<(), ActionError>;

    /// Ask the engine to stop an in-flight client operation. `force` is a
    /// hint passed through to the engine.
    async fn cancel(
        &self,
        token: &CancellationToken,
        params: &StackParams,
        force: bool,
    ) -> Result<(), ActionError>;

    /// Ask the engine to stop an in-flight parent operation
    async fn cancel_parent(
        &self,
        token: &CancellationToken,
        params: &ProvisionParams,
        force: bool,
    ) -> Result<(), ActionError>;

    /// Load the stacks declared under `root`
    async fn read_stacks(&self, root: &Path) -> Result<Vec<StackDescriptor>, ActionError>;
}
