//! Runner environment and application options

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::logs::{LogLevel, LogOptions};

const DEFAULT_CLEANUP_TIMEOUT_SECS: u64 = 300;

/// Immutable snapshot of the environment variables the orchestrator consumes
#[derive(Debug, Clone, Default)]
pub struct ActionEnv {
    pub stack_name: String,
    pub environment: String,
    pub version: String,

    /// Raw `SC_CONFIG` YAML (contains the private key)
    pub sc_config: Option<SecretString>,

    pub github_token: Option<SecretString>,
    pub github_sha: String,
    pub github_workflow: String,
    pub github_actor: String,
    pub github_repository: String,
    pub github_run_id: String,
    pub github_actions: bool,
    pub github_output: Option<PathBuf>,

    pub sc_preview: bool,
    pub sc_dry_run: bool,
    pub sc_deploy_preview: bool,

    pub slack_webhook_url: Option<SecretString>,
    pub discord_webhook_url: Option<SecretString>,
    pub telegram_bot_token: Option<SecretString>,
    pub telegram_chat_id: String,

    pub stack_type: String,
    pub operation_id: String,
    pub force_cancel: bool,
    pub cleanup_timeout: Option<Duration>,

    pub log_level: Option<LogLevel>,
    pub log_json: bool,
}

impl ActionEnv {
    /// Read the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let text = |key: &str| get(key).unwrap_or_default();
        let flag = |key: &str| get(key).map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let secret = |key: &str| get(key).map(SecretString::from);

        Self {
            stack_name: text("STACK_NAME"),
            environment: text("ENVIRONMENT"),
            version: text("VERSION"),
            // the YAML blob is whitespace sensitive, keep it verbatim
            sc_config: lookup("SC_CONFIG")
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            github_token: secret("GITHUB_TOKEN"),
            github_sha: text("GITHUB_SHA"),
            github_workflow: text("GITHUB_WORKFLOW"),
            github_actor: text("GITHUB_ACTOR"),
            github_repository: text("GITHUB_REPOSITORY"),
            github_run_id: text("GITHUB_RUN_ID"),
            github_actions: flag("GITHUB_ACTIONS"),
            github_output: get("GITHUB_OUTPUT").map(PathBuf::from),
            sc_preview: flag("SC_PREVIEW"),
            sc_dry_run: flag("SC_DRY_RUN"),
            sc_deploy_preview: flag("SC_DEPLOY_PREVIEW"),
            slack_webhook_url: secret("SLACK_WEBHOOK_URL"),
            discord_webhook_url: secret("DISCORD_WEBHOOK_URL"),
            telegram_bot_token: secret("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: text("TELEGRAM_CHAT_ID"),
            stack_type: text("STACK_TYPE"),
            operation_id: text("OPERATION_ID"),
            force_cancel: flag("FORCE_CANCEL"),
            cleanup_timeout: get("CLEANUP_TIMEOUT")
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs),
            log_level: get("SC_LOG_LEVEL").and_then(|v| v.parse().ok()),
            log_json: flag("SC_LOG_JSON"),
        }
    }

    /// Running inside an automated CI runner
    pub fn is_ci(&self) -> bool {
        self.github_actions
    }

    /// Any of the preview flags enables non-mutating mode
    pub fn preview_mode(&self) -> bool {
        self.sc_preview || self.sc_dry_run || self.sc_deploy_preview
    }

    pub fn github_token(&self) -> Option<&str> {
        self.github_token.as_ref().map(|t| t.expose_secret())
    }

    /// Link to the CI run, empty when the run cannot be identified
    pub fn details_url(&self) -> String {
        if self.github_repository.is_empty() || self.github_run_id.is_empty() {
            return String::new();
        }
        format!(
            "https://github.com/{}/actions/runs/{}",
            self.github_repository, self.github_run_id
        )
    }

    pub fn cleanup_timeout(&self) -> Duration {
        self.cleanup_timeout
            .unwrap_or(Duration::from_secs(DEFAULT_CLEANUP_TIMEOUT_SECS))
    }
}

/// Main application options
#[derive(Debug, Clone)]
pub struct ActionOptions {
    /// Repository checkout the operation runs in
    pub workspace: PathBuf,

    /// Logging configuration
    pub logs: LogOptions,

    /// Path or name of the `sc` binary
    pub sc_binary: String,

    /// Upper bound for cleanup after a cancellation
    pub cleanup_timeout: Duration,
}

impl ActionOptions {
    pub fn from_env(env: &ActionEnv) -> Self {
        let workspace = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            workspace,
            logs: LogOptions {
                log_level: env.log_level.clone().unwrap_or_default(),
                json_format: env.log_json,
                ansi: !env.is_ci(),
            },
            cleanup_timeout: env.cleanup_timeout(),
            ..Default::default()
        }
    }
}

impl Default for ActionOptions {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            logs: LogOptions::default(),
            sc_binary: "sc".to_string(),
            cleanup_timeout: Duration::from_secs(DEFAULT_CLEANUP_TIMEOUT_SECS),
        }
    }
}
