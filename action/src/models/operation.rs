//! Operation models

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of stack operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Deploy,
    Provision,
    Destroy,
}

impl OperationType {
    /// Capitalised verb used in alert titles ("Deploy Started")
    pub fn title(&self) -> &'static str {
        match self {
            OperationType::Deploy => "Deploy",
            OperationType::Provision => "Provision",
            OperationType::Destroy => "Destroy",
        }
    }

    /// Lowercase verb used in log lines and operation ids
    pub fn verb(&self) -> &'static str {
        match self {
            OperationType::Deploy => "deploy",
            OperationType::Provision => "provision",
            OperationType::Destroy => "destroy",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

impl std::str::FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deploy" => Ok(OperationType::Deploy),
            "provision" => Ok(OperationType::Provision),
            "destroy" => Ok(OperationType::Destroy),
            _ => Err(format!("Invalid operation type: {}", s)),
        }
    }
}

/// Whether an operation targets a parent stack or a client stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Parent,
    Client,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Parent => f.write_str("parent"),
            Scope::Client => f.write_str("client"),
        }
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "parent" => Ok(Scope::Parent),
            "client" => Ok(Scope::Client),
            _ => Err(format!("Invalid scope: {}", s)),
        }
    }
}

/// Immutable description of one operation invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationConfig {
    pub operation: OperationType,
    pub scope: Scope,
    pub stack_name: String,
    pub environment: String,
    pub version: String,
}

impl OperationConfig {
    pub fn new(
        operation: OperationType,
        scope: Scope,
        stack_name: impl Into<String>,
        environment: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            scope,
            stack_name: stack_name.into(),
            environment: environment.into(),
            version: version.into(),
        }
    }

    /// Human-readable target used when wrapping errors
    pub fn target(&self) -> String {
        if self.environment.is_empty() {
            format!("stack {}", self.stack_name)
        } else {
            format!("stack {} ({})", self.stack_name, self.environment)
        }
    }
}
