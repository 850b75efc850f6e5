//! Loaded stack descriptors
//!
//! Only the CI/CD block of a stack's server configuration is modeled here;
//! everything else in the stack DSL belongs to the provisioner.

use serde::{Deserialize, Serialize};

/// A stack discovered by the provisioner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackDescriptor {
    /// Stack name (directory name, possibly `org/repo/stack` qualified)
    pub name: String,

    /// CI/CD platform configuration block, if declared
    #[serde(default)]
    pub cicd: Option<CiCdBlock>,
}

/// `cicd:` block of a stack's server configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CiCdBlock {
    /// Platform type, e.g. `github-actions`
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub config: CiCdSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CiCdSettings {
    #[serde(default)]
    pub notifications: Option<NotificationSettings>,
}

/// Per-channel notification settings as written in the stack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default)]
    pub slack: Option<WebhookSettings>,

    #[serde(default)]
    pub discord: Option<WebhookSettings>,

    #[serde(default)]
    pub telegram: Option<TelegramSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookSettings {
    #[serde(default, rename = "webhookUrl", alias = "webhook-url", alias = "webhook_url")]
    pub webhook_url: String,

    /// Explicit opt-out; absent means enabled when the URL is set
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelegramSettings {
    #[serde(default, rename = "botToken", alias = "bot-token", alias = "bot_token")]
    pub bot_token: String,

    #[serde(default, rename = "chatId", alias = "chat-id", alias = "chat_id")]
    pub chat_id: String,

    #[serde(default)]
    pub enabled: Option<bool>,
}

impl StackDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cicd: None,
        }
    }

    pub fn notifications(&self) -> Option<&NotificationSettings> {
        self.cicd
            .as_ref()
            .and_then(|cicd| cicd.config.notifications.as_ref())
    }

    fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Find the stack an operation refers to: exact name first, then the short
/// (last path segment) name, then any stack whose name ends with it.
pub fn find_stack<'a>(stacks: &'a [StackDescriptor], name: &str) -> Option<&'a StackDescriptor> {
    if name.is_empty() {
        return None;
    }

    stacks
        .iter()
        .find(|s| s.name == name)
        .or_else(|| stacks.iter().find(|s| s.short_name() == name))
        .or_else(|| stacks.iter().find(|s| s.name.ends_with(name)))
}
