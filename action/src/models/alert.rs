//! Alert models

use serde::{Deserialize, Serialize};

/// Lifecycle event an alert reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Started,
    Succeeded,
    Failed,
    Cancelled,
}

impl AlertType {
    pub fn label(&self) -> &'static str {
        match self {
            AlertType::Started => "Started",
            AlertType::Succeeded => "Succeeded",
            AlertType::Failed => "Failed",
            AlertType::Cancelled => "Cancelled",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            AlertType::Started => "🚀",
            AlertType::Succeeded => "✅",
            AlertType::Failed => "❌",
            AlertType::Cancelled => "⚠️",
        }
    }

    /// RGB colour used by embed-style channels
    pub fn color(&self) -> u32 {
        match self {
            AlertType::Started => 0x3498db,
            AlertType::Succeeded => 0x2ecc71,
            AlertType::Failed => 0xe74c3c,
            AlertType::Cancelled => 0xf39c12,
        }
    }
}

/// A single notification event, delivered fire-and-forget to every channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub name: String,
    pub title: String,
    pub reason: String,
    pub description: String,
    pub stack_name: String,
    pub stack_env: String,
    pub details_url: String,
    pub alert_type: AlertType,
    pub commit_author: String,
    pub commit_message: String,
}
