//! Alert channel senders

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::errors::ActionError;
use crate::http::client::HttpClient;
use crate::models::alert::Alert;
use crate::notify::config::NotificationConfig;

/// Delivers an alert to one channel
#[async_trait]
pub trait AlertSender: Send + Sync {
    /// Channel name used in logs
    fn channel(&self) -> &'static str;

    async fn send(&self, alert: &Alert) -> Result<(), ActionError>;
}

/// Builds the senders for a resolved configuration
pub trait SenderFactory: Send + Sync {
    fn build(&self, config: &NotificationConfig) -> Vec<Box<dyn AlertSender>>;
}

/// Creates webhook/bot senders sharing one HTTP client
#[derive(Debug, Clone)]
pub struct WebhookSenderFactory {
    http: HttpClient,
}

impl WebhookSenderFactory {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

impl SenderFactory for WebhookSenderFactory {
    fn build(&self, config: &NotificationConfig) -> Vec<Box<dyn AlertSender>> {
        let mut senders: Vec<Box<dyn AlertSender>> = Vec::new();

        if let Some(url) = config.slack.url() {
            senders.push(Box::new(SlackSender {
                http: self.http.clone(),
                webhook_url: url.to_string(),
            }));
        }
        if let Some(url) = config.discord.url() {
            senders.push(Box::new(DiscordSender {
                http: self.http.clone(),
                webhook_url: url.to_string(),
            }));
        }
        if let Some((token, chat_id)) = config.telegram.credentials() {
            senders.push(Box::new(TelegramSender {
                http: self.http.clone(),
                bot_token: token.to_string(),
                chat_id: chat_id.to_string(),
            }));
        }

        senders
    }
}

fn detail_fields(alert: &Alert) -> Vec<(&'static str, &str)> {
    [
        ("Stack", alert.stack_name.as_str()),
        ("Environment", alert.stack_env.as_str()),
        ("Author", alert.commit_author.as_str()),
        ("Commit", alert.commit_message.as_str()),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .collect()
}

// ================================= SLACK ===================================== //

pub struct SlackSender {
    http: HttpClient,
    webhook_url: String,
}

impl SlackSender {
    fn payload(alert: &Alert) -> Value {
        let fields: Vec<Value> = detail_fields(alert)
            .into_iter()
            .map(|(title, value)| json!({ "title": title, "value": value, "short": true }))
            .collect();

        let mut attachment = json!({
            "color": format!("#{:06x}", alert.alert_type.color()),
            "title": alert.title,
            "text": alert.description,
            "fields": fields,
            "footer": alert.reason,
        });
        if !alert.details_url.is_empty() {
            attachment["title_link"] = json!(alert.details_url);
        }

        json!({
            "text": format!("{} *{}*", alert.alert_type.emoji(), alert.title),
            "attachments": [attachment],
        })
    }
}

#[async_trait]
impl AlertSender for SlackSender {
    fn channel(&self) -> &'static str {
        "slack"
    }

    async fn send(&self, alert: &Alert) -> Result<(), ActionError> {
        self.http.post_json(&self.webhook_url, &Self::payload(alert)).await
    }
}

// ================================ DISCORD ==================================== //

pub struct DiscordSender {
    http: HttpClient,
    webhook_url: String,
}

impl DiscordSender {
    fn payload(alert: &Alert) -> Value {
        let fields: Vec<Value> = detail_fields(alert)
            .into_iter()
            .map(|(name, value)| json!({ "name": name, "value": value, "inline": true }))
            .collect();

        let mut embed = json!({
            "title": format!("{} {}", alert.alert_type.emoji(), alert.title),
            "description": alert.description,
            "color": alert.alert_type.color(),
            "fields": fields,
        });
        if !alert.details_url.is_empty() {
            embed["url"] = json!(alert.details_url);
        }
        if !alert.reason.is_empty() {
            embed["footer"] = json!({ "text": alert.reason });
        }

        json!({ "embeds": [embed] })
    }
}

#[async_trait]
impl AlertSender for DiscordSender {
    fn channel(&self) -> &'static str {
        "discord"
    }

    async fn send(&self, alert: &Alert) -> Result<(), ActionError> {
        self.http.post_json(&self.webhook_url, &Self::payload(alert)).await
    }
}

// ================================ TELEGRAM =================================== //

pub struct TelegramSender {
    http: HttpClient,
    bot_token: String,
    chat_id: String,
}

impl TelegramSender {
    fn text(alert: &Alert) -> String {
        let mut text = format!(
            "{} <b>{}</b>\n{}",
            alert.alert_type.emoji(),
            escape_html(&alert.title),
            escape_html(&alert.description)
        );
        for (name, value) in detail_fields(alert) {
            text.push_str(&format!("\n<b>{}:</b> {}", name, escape_html(value)));
        }
        if !alert.details_url.is_empty() {
            text.push_str(&format!(
                "\n<a href=\"{}\">View run</a>",
                escape_html(&alert.details_url)
            ));
        }
        text
    }
}

#[async_trait]
impl AlertSender for TelegramSender {
    fn channel(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, alert: &Alert) -> Result<(), ActionError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let body = json!({
            "chat_id": self.chat_id,
            "text": Self::text(alert),
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        self.http.post_json(&url, &body).await
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
