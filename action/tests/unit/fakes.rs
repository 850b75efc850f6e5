//! In-memory collaborators for integration tests

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::watch;

use sc_action::app::options::ActionEnv;
use sc_action::deploy::cancel::CancellationToken;
use sc_action::deploy::executor::{ExecutorDeps, OperationExecutor};
use sc_action::deploy::git::Git;
use sc_action::deploy::signal::SignalSource;
use sc_action::errors::ActionError;
use sc_action::models::alert::Alert;
use sc_action::models::sc_config::ScConfig;
use sc_action::models::stack::StackDescriptor;
use sc_action::notify::config::NotificationConfig;
use sc_action::notify::senders::{AlertSender, SenderFactory};
use sc_action::provisioner::{PreviewSummary, ProvisionParams, Provisioner, StackParams};
use sc_action::secrets::cryptor::{Cryptor, CryptorFactory};
use sc_action::storage::layout::WorkspaceLayout;

pub const SC_CONFIG: &str = "projectName: shop\npublicKey: ssh-ed25519 AAAAtest\nprivateKey: test-private-key\n";

// ============================== PROVISIONER ================================== //

#[derive(Default)]
pub struct FakeProvisioner {
    pub calls: Mutex<Vec<String>>,
    pub stacks: Mutex<Vec<StackDescriptor>>,
    pub fail_with: Mutex<Option<String>>,
    pub panic_with: Mutex<Option<String>>,
    /// Mutating calls block until cancelled when set
    pub hang: Mutex<bool>,
    pub cancel_delay: Mutex<Option<Duration>>,
    /// Cancel calls starting with one of these prefixes fail
    pub failing_cancels: Mutex<Vec<String>>,
}

impl FakeProvisioner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn fail(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn mutate(&self, token: &CancellationToken, call: String) -> Result<(), ActionError> {
        self.record(call);

        let panic_message = self.panic_with.lock().unwrap().clone();
        if let Some(message) = panic_message {
            panic!("{}", message);
        }

        let hang = *self.hang.lock().unwrap();
        if hang {
            token.cancelled().await;
            return Err(ActionError::Cancelled("provisioner stopped".to_string()));
        }

        match self.fail_with.lock().unwrap().clone() {
            Some(message) => Err(ActionError::ProvisionError(message)),
            None => Ok(()),
        }
    }

    async fn stop(&self, call: String) -> Result<(), ActionError> {
        self.record(call.clone());
        let delay = *self.cancel_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let rejected = self
            .failing_cancels
            .lock()
            .unwrap()
            .iter()
            .any(|prefix| call.starts_with(prefix.as_str()));
        if rejected {
            return Err(ActionError::ProvisionError(format!("{} rejected", call)));
        }
        Ok(())
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn deploy(&self, token: &CancellationToken, params: &StackParams) -> Result<(), ActionError> {
        self.mutate(token, format!("deploy {} {} {}", params.stack_name, params.environment, params.version))
            .await
    }

    async fn preview(
        &self,
        _token: &CancellationToken,
        params: &StackParams,
    ) -> Result<PreviewSummary, ActionError> {
        self.record(format!("preview {}", params.stack_name));
        Ok(PreviewSummary {
            summary: "2 to update".to_string(),
        })
    }

    async fn provision(
        &self,
        token: &CancellationToken,
        params: &ProvisionParams,
    ) -> Result<(), ActionError> {
        self.mutate(token, format!("provision {}", params.stacks.join(",")))
            .await
    }

    async fn preview_provision(
        &self,
        _token: &CancellationToken,
        params: &ProvisionParams,
    ) -> Result<PreviewSummary, ActionError> {
        self.record(format!("preview-provision {}", params.stacks.join(",")));
        Ok(PreviewSummary {
            summary: "no changes".to_string(),
        })
    }

    async fn destroy(&self, token: &CancellationToken, params: &StackParams) -> Result<(), ActionError> {
        self.mutate(token, format!("destroy {} {}", params.stack_name, params.environment))
            .await
    }

    async fn destroy_parent(
        &self,
        token: &CancellationToken,
        params: &ProvisionParams,
    ) -> Result<(), ActionError> {
        self.mutate(token, format!("destroy-parent {}", params.stacks.join(",")))
            .await
    }

    async fn cancel(
        &self,
        _token: &CancellationToken,
        params: &StackParams,
        force: bool,
    ) -> Result<(), ActionError> {
        self.stop(format!("cancel {} {} force={}", params.stack_name, params.environment, force))
            .await
    }

    async fn cancel_parent(
        &self,
        _token: &CancellationToken,
        params: &ProvisionParams,
        force: bool,
    ) -> Result<(), ActionError> {
        self.stop(format!("cancel-parent {} force={}", params.stacks.join(","), force))
            .await
    }

    async fn read_stacks(&self, _root: &Path) -> Result<Vec<StackDescriptor>, ActionError> {
        Ok(self.stacks.lock().unwrap().clone())
    }
}

// ================================== GIT ====================================== //

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneCall {
    pub url: String,
    pub ssh: bool,
}

#[derive(Default)]
pub struct FakeGit {
    pub clones: Mutex<Vec<CloneCall>>,
    pub clone_failures: Mutex<VecDeque<ActionError>>,
    /// Files written into the clone destination, relative to it
    pub clone_files: Mutex<Vec<(PathBuf, String)>>,
    pub short_hash: Mutex<Option<String>>,
    pub local_tags: Mutex<HashSet<String>>,
    pub remote_tags: Mutex<HashSet<String>>,
    pub created: Mutex<Vec<String>>,
    pub pushed: Mutex<Vec<String>>,
}

impl FakeGit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn clones(&self) -> Vec<CloneCall> {
        self.clones.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn pushed(&self) -> Vec<String> {
        self.pushed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Git for FakeGit {
    async fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        ssh_command: Option<&str>,
    ) -> Result<(), ActionError> {
        self.clones.lock().unwrap().push(CloneCall {
            url: url.to_string(),
            ssh: ssh_command.is_some(),
        });

        let failure = self.clone_failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }

        let files = self.clone_files.lock().unwrap().clone();
        tokio::fs::create_dir_all(dest).await?;
        for (path, content) in files {
            let path = dest.join(path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, content).await?;
        }
        Ok(())
    }

    async fn short_hash(&self, _dir: &Path) -> Result<String, ActionError> {
        self.short_hash
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ActionError::GitError("git rev-parse failed: not a git repository".to_string()))
    }

    async fn last_commit_message(&self, _dir: &Path) -> Result<String, ActionError> {
        Ok("Bump checkout service".to_string())
    }

    async fn tag_exists(&self, _dir: &Path, tag: &str) -> Result<bool, ActionError> {
        Ok(self.local_tags.lock().unwrap().contains(tag))
    }

    async fn remote_tag_exists(&self, _dir: &Path, tag: &str) -> Result<bool, ActionError> {
        Ok(self.remote_tags.lock().unwrap().contains(tag))
    }

    async fn create_tag(&self, _dir: &Path, tag: &str, _message: &str) -> Result<(), ActionError> {
        self.local_tags.lock().unwrap().insert(tag.to_string());
        self.created.lock().unwrap().push(tag.to_string());
        Ok(())
    }

    async fn push_tag(&self, _dir: &Path, tag: &str) -> Result<(), ActionError> {
        self.remote_tags.lock().unwrap().insert(tag.to_string());
        self.pushed.lock().unwrap().push(tag.to_string());
        Ok(())
    }
}

// ================================ CRYPTOR ==================================== //

/// Error a cryptor reports from `decrypt_all`
#[derive(Debug, Clone)]
pub enum DecryptFailure {
    NoSecrets,
    Message(String),
}

#[derive(Default)]
pub struct FakeCryptors {
    pub revealed: Arc<Mutex<Vec<PathBuf>>>,
    pub failure: Mutex<Option<DecryptFailure>>,
}

impl FakeCryptors {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, failure: DecryptFailure) {
        *self.failure.lock().unwrap() = Some(failure);
    }

    pub fn revealed(&self) -> Vec<PathBuf> {
        self.revealed.lock().unwrap().clone()
    }
}

struct FakeCryptor {
    dir: PathBuf,
    public_key: String,
    revealed: Arc<Mutex<Vec<PathBuf>>>,
    failure: Option<DecryptFailure>,
}

#[async_trait]
impl Cryptor for FakeCryptor {
    async fn read_profile_config(&self) -> Result<(), ActionError> {
        Ok(())
    }

    async fn read_secret_files(&self) -> Result<(), ActionError> {
        match &self.failure {
            Some(DecryptFailure::NoSecrets) => Err(ActionError::NoSecrets(format!(
                "{} has no secrets.yaml",
                self.dir.display()
            ))),
            _ => Ok(()),
        }
    }

    async fn decrypt_all(&self, _force_reveal: bool) -> Result<(), ActionError> {
        if let Some(DecryptFailure::Message(message)) = &self.failure {
            return Err(ActionError::SecretsError(message.clone()));
        }
        self.revealed.lock().unwrap().push(self.dir.clone());
        Ok(())
    }

    fn public_key(&self) -> String {
        self.public_key.clone()
    }
}

impl CryptorFactory for FakeCryptors {
    fn create(&self, workdir: &Path, config: &ScConfig) -> Box<dyn Cryptor> {
        Box::new(FakeCryptor {
            dir: workdir.to_path_buf(),
            public_key: config.public_key.clone(),
            revealed: self.revealed.clone(),
            failure: self.failure.lock().unwrap().clone(),
        })
    }
}

// ================================= ALERTS ==================================== //

#[derive(Default)]
pub struct RecordingSenders {
    pub alerts: Arc<Mutex<Vec<Alert>>>,
}

impl RecordingSenders {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.alerts().into_iter().map(|a| a.title).collect()
    }
}

struct RecordingSender {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

#[async_trait]
impl AlertSender for RecordingSender {
    fn channel(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, alert: &Alert) -> Result<(), ActionError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

impl SenderFactory for RecordingSenders {
    fn build(&self, _config: &NotificationConfig) -> Vec<Box<dyn AlertSender>> {
        vec![Box::new(RecordingSender {
            alerts: self.alerts.clone(),
        })]
    }
}

// ================================ SIGNALS ==================================== //

/// Signal source fired by the test
pub struct ManualSignals {
    tx: watch::Sender<Option<String>>,
}

impl ManualSignals {
    pub fn new() -> Arc<Self> {
        let (tx, _) = watch::channel(None);
        Arc::new(Self { tx })
    }

    pub fn fire(&self, signal: &str) {
        self.tx.send_replace(Some(signal.to_string()));
    }
}

#[async_trait]
impl SignalSource for ManualSignals {
    async fn wait(&self) -> String {
        let mut rx = self.tx.subscribe();
        let signal = rx
            .wait_for(|signal| signal.is_some())
            .await
            .ok()
            .and_then(|signal| signal.clone());
        match signal {
            Some(signal) => signal,
            None => std::future::pending().await,
        }
    }
}

// ================================ HARNESS ==================================== //

/// Collaborators plus a temporary workspace
pub struct Harness {
    pub workspace: tempfile::TempDir,
    pub provisioner: Arc<FakeProvisioner>,
    pub git: Arc<FakeGit>,
    pub cryptors: Arc<FakeCryptors>,
    pub senders: Arc<RecordingSenders>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            workspace: tempfile::tempdir().unwrap(),
            provisioner: FakeProvisioner::new(),
            git: FakeGit::new(),
            cryptors: FakeCryptors::new(),
            senders: RecordingSenders::new(),
        }
    }

    pub fn root(&self) -> &Path {
        self.workspace.path()
    }

    pub fn output_file(&self) -> PathBuf {
        self.root().join("github_output")
    }

    pub fn outputs(&self) -> String {
        std::fs::read_to_string(self.output_file()).unwrap_or_default()
    }

    /// Environment of a client deploy of `checkout` to `staging`
    pub fn env(&self) -> ActionEnv {
        ActionEnv {
            stack_name: "checkout".to_string(),
            environment: "staging".to_string(),
            sc_config: Some(SecretString::from(SC_CONFIG.to_string())),
            github_sha: "abcdef1234567890".to_string(),
            github_actor: "octocat".to_string(),
            github_workflow: "deploy".to_string(),
            github_output: Some(self.output_file()),
            ..Default::default()
        }
    }

    pub fn layout(&self) -> WorkspaceLayout {
        WorkspaceLayout::new(self.root())
    }

    pub fn deps(&self) -> ExecutorDeps {
        ExecutorDeps {
            provisioner: self.provisioner.clone(),
            git: self.git.clone(),
            cryptors: self.cryptors.clone(),
            senders: self.senders.clone(),
        }
    }

    pub fn executor(&self, env: ActionEnv) -> OperationExecutor {
        OperationExecutor::new(self.deps(), self.layout(), Arc::new(env))
    }
}
