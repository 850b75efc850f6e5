//! Notification channel resolution

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::app::options::ActionEnv;
use crate::models::stack::{find_stack, NotificationSettings, StackDescriptor};

/// A webhook-based channel (Slack, Discord)
#[derive(Debug, Clone, Default)]
pub struct WebhookChannel {
    pub webhook_url: Option<SecretString>,
    pub enabled: bool,
}

impl WebhookChannel {
    fn new(webhook_url: &str, enabled: Option<bool>) -> Self {
        let webhook_url = webhook_url.trim();
        if webhook_url.is_empty() {
            return Self::default();
        }
        Self {
            webhook_url: Some(SecretString::from(webhook_url.to_string())),
            enabled: enabled.unwrap_or(true),
        }
    }

    /// The URL, only when the channel is usable
    pub fn url(&self) -> Option<&str> {
        self.webhook_url
            .as_ref()
            .map(|u| u.expose_secret())
            .filter(|_| self.enabled)
    }
}

/// Telegram bot channel
#[derive(Debug, Clone, Default)]
pub struct TelegramChannel {
    pub bot_token: Option<SecretString>,
    pub chat_id: String,
    pub enabled: bool,
}

impl TelegramChannel {
    fn new(bot_token: &str, chat_id: &str, enabled: Option<bool>) -> Self {
        let (bot_token, chat_id) = (bot_token.trim(), chat_id.trim());
        if bot_token.is_empty() || chat_id.is_empty() {
            return Self::default();
        }
        Self {
            bot_token: Some(SecretString::from(bot_token.to_string())),
            chat_id: chat_id.to_string(),
            enabled: enabled.unwrap_or(true),
        }
    }

    /// Token and chat id, only when the channel is usable
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.bot_token
            .as_ref()
            .map(|t| (t.expose_secret(), self.chat_id.as_str()))
            .filter(|_| self.enabled)
    }
}

/// Where the channel settings came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// CI/CD block of a loaded parent stack
    Stack(String),

    /// Environment variables
    Environment,
}

/// Resolved per-run notification configuration
#[derive(Debug, Clone, Default)]
pub struct NotificationConfig {
    pub slack: WebhookChannel,
    pub discord: WebhookChannel,
    pub telegram: TelegramChannel,
}

impl NotificationConfig {
    pub fn from_settings(settings: &NotificationSettings) -> Self {
        let slack = settings
            .slack
            .as_ref()
            .map(|s| WebhookChannel::new(&s.webhook_url, s.enabled))
            .unwrap_or_default();
        let discord = settings
            .discord
            .as_ref()
            .map(|s| WebhookChannel::new(&s.webhook_url, s.enabled))
            .unwrap_or_default();
        let telegram = settings
            .telegram
            .as_ref()
            .map(|t| TelegramChannel::new(&t.bot_token, &t.chat_id, t.enabled))
            .unwrap_or_default();

        Self {
            slack,
            discord,
            telegram,
        }
    }

    pub fn from_env(env: &ActionEnv) -> Self {
        let expose = |s: &Option<SecretString>| {
            s.as_ref()
                .map(|v| v.expose_secret().to_string())
                .unwrap_or_default()
        };

        Self {
            slack: WebhookChannel::new(&expose(&env.slack_webhook_url), None),
            discord: WebhookChannel::new(&expose(&env.discord_webhook_url), None),
            telegram: TelegramChannel::new(
                &expose(&env.telegram_bot_token),
                &env.telegram_chat_id,
                None,
            ),
        }
    }

    /// Prefer the CI/CD block of the stack matching `stack_name`; fall back to
    /// environment variables when it is missing or configures no channel.
    pub fn resolve(
        stacks: &[StackDescriptor],
        stack_name: &str,
        env: &ActionEnv,
    ) -> (Self, ConfigSource) {
        if let Some(stack) = find_stack(stacks, stack_name) {
            if let Some(settings) = stack.notifications() {
                let config = Self::from_settings(settings);
                if !config.is_empty() {
                    info!("Using notification settings from stack {}", stack.name);
                    return (config, ConfigSource::Stack(stack.name.clone()));
                }
            }
            debug!("Stack {} declares no usable notification settings", stack.name);
        }

        (Self::from_env(env), ConfigSource::Environment)
    }

    /// Names of the channels that will receive alerts
    pub fn enabled_channels(&self) -> Vec<&'static str> {
        let mut channels = Vec::new();
        if self.slack.url().is_some() {
            channels.push("slack");
        }
        if self.discord.url().is_some() {
            channels.push("discord");
        }
        if self.telegram.credentials().is_some() {
            channels.push("telegram");
        }
        channels
    }

    pub fn is_empty(&self) -> bool {
        self.enabled_channels().is_empty()
    }
}
