//! Stack operation executor
//!
//! Runs one operation through its phases:
//!
//! 1. log start
//! 2. setup: parse `SC_CONFIG`, clone the parent repository for client stacks
//! 3. load stacks and initialise notification channels (best effort)
//! 4. start alert, carrying the generated version for deploys without one
//! 5. secret revelation
//! 6. the provisioning call itself
//! 7. outcome alert, release tag and step outputs
//!
//! The parent repository clone is removed once the phases end, whatever
//! their outcome.
//!
//! Notification channels are initialised before secrets are revealed so a
//! secret failure still produces a failure alert. Setup failures happen
//! before any channel exists and are only returned.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use secrecy::ExposeSecret;
use tracing::{error, info, warn};

use crate::app::options::ActionEnv;
use crate::deploy::cancel::CancellationToken;
use crate::deploy::git::Git;
use crate::deploy::outputs::{CleanupStatus, OperationOutputs, OutputWriter};
use crate::deploy::version::VersionTagger;
use crate::errors::ActionError;
use crate::filesys::dir::Dir;
use crate::models::alert::{Alert, AlertType};
use crate::models::operation::{OperationConfig, OperationType, Scope};
use crate::models::sc_config::ScConfig;
use crate::models::stack::StackDescriptor;
use crate::notify::config::NotificationConfig;
use crate::notify::dispatcher::NotificationDispatcher;
use crate::notify::senders::SenderFactory;
use crate::provisioner::{ProvisionParams, Provisioner, StackParams};
use crate::secrets::chain::SecretRevelationChain;
use crate::secrets::cryptor::CryptorFactory;
use crate::storage::layout::WorkspaceLayout;
use crate::utils::{format_duration, panic_message};

/// Collaborators the executor drives
#[derive(Clone)]
pub struct ExecutorDeps {
    pub provisioner: Arc<dyn Provisioner>,
    pub git: Arc<dyn Git>,
    pub cryptors: Arc<dyn CryptorFactory>,
    pub senders: Arc<dyn SenderFactory>,
}

/// Result of setup (phase 2)
struct Setup {
    sc_config: ScConfig,
    parent_dir: Option<Dir>,
}

/// What a successful operation reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub message: String,
    pub preview: bool,
    pub version: String,
}

/// Per-invocation state that must survive a panic inside the phases
struct RunState {
    started: Instant,
    dispatcher: Option<NotificationDispatcher>,
    commit_message: String,
    version: String,
    parent_clone: Option<Dir>,
}

impl RunState {
    fn new(version: &str) -> Self {
        Self {
            started: Instant::now(),
            dispatcher: None,
            commit_message: String::new(),
            version: version.to_string(),
            parent_clone: None,
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// A request to stop an operation running in another job
#[derive(Debug, Clone)]
pub struct CancelRequest {
    pub stack_name: String,
    pub environment: String,
    pub scope: Scope,
    pub operation_id: String,
    pub force: bool,
    pub cleanup_timeout: Duration,
}

impl CancelRequest {
    pub fn from_env(env: &ActionEnv) -> Self {
        let scope = if env.stack_type.eq_ignore_ascii_case("parent") {
            Scope::Parent
        } else {
            Scope::Client
        };

        Self {
            stack_name: env.stack_name.clone(),
            environment: env.environment.clone(),
            scope,
            operation_id: env.operation_id.clone(),
            force: env.force_cancel,
            cleanup_timeout: env.cleanup_timeout(),
        }
    }
}

/// Executes stack operations
pub struct OperationExecutor {
    provisioner: Arc<dyn Provisioner>,
    git: Arc<dyn Git>,
    senders: Arc<dyn SenderFactory>,
    secrets: SecretRevelationChain,
    tagger: VersionTagger,
    layout: WorkspaceLayout,
    env: Arc<ActionEnv>,
    outputs: OutputWriter,
}

impl OperationExecutor {
    /// Create a new executor for the workspace at `layout`
    pub fn new(deps: ExecutorDeps, layout: WorkspaceLayout, env: Arc<ActionEnv>) -> Self {
        let secrets = SecretRevelationChain::new(
            deps.git.clone(),
            deps.cryptors.clone(),
            layout.clone(),
            env.clone(),
        );
        let tagger = VersionTagger::new(deps.git.clone(), layout.clone());
        let outputs = OutputWriter::new(env.github_output.clone());

        Self {
            provisioner: deps.provisioner,
            git: deps.git,
            senders: deps.senders,
            secrets,
            tagger,
            layout,
            env,
            outputs,
        }
    }

    /// Run one operation end to end. Panics anywhere in the phases are
    /// contained and turned into an error (and a failure alert when channels
    /// are already up).
    pub async fn execute_operation(
        &self,
        token: CancellationToken,
        config: OperationConfig,
    ) -> Result<(), ActionError> {
        let mut run = RunState::new(&config.version);

        let result = AssertUnwindSafe(self.run_phases(&token, &config, &mut run))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!(
                    operation = %config.operation,
                    stack = %config.stack_name,
                    "Panic during {}: {}", config.operation, message
                );
                Err(ActionError::Panicked(message))
            });

        self.release_parent_clone(&mut run).await;
        self.finish(&config, &mut run, result).await
    }

    async fn run_phases(
        &self,
        token: &CancellationToken,
        config: &OperationConfig,
        run: &mut RunState,
    ) -> Result<Completion, ActionError> {
        let preview = self.env.preview_mode();

        // Phase 1: log start
        info!(
            operation = %config.operation,
            scope = %config.scope,
            stack = %config.stack_name,
            env = %config.environment,
            preview = preview,
            "Starting {} of {}", config.operation, config.target()
        );

        // Phase 2: setup, no channels yet so failures are only returned
        let setup = self.setup(config, run).await.map_err(|e| {
            error!(phase = "setup", "Setup failed before notifications were available: {}", e);
            e
        })?;
        run.commit_message = self.commit_message().await;

        // Phase 3: stacks and notification channels
        let dispatcher = self.initialize_notifications(config, &setup).await;
        run.dispatcher = Some(dispatcher);

        if run.version.is_empty() && config.operation == OperationType::Deploy {
            run.version = self.tagger.generate_version(&self.env.github_sha).await;
            info!("Generated version {}", run.version);
        }

        // Phase 4: start alert
        let description = self.start_description(config, &run.version, preview);
        self.alert(run, config, AlertType::Started, self.start_reason(), description)
            .await;

        // Phase 5: secrets
        self.secrets
            .reveal(config, &setup.sc_config, setup.parent_dir.as_ref())
            .await?;

        // Phase 6: provisioning
        self.perform_operation(token, config, &run.version, preview)
            .await
    }

    // ================================ SETUP ==================================== //

    async fn setup(&self, config: &OperationConfig, run: &mut RunState) -> Result<Setup, ActionError> {
        let raw = self
            .env
            .sc_config
            .as_ref()
            .map(|c| c.expose_secret().to_string())
            .unwrap_or_default();
        let sc_config = ScConfig::parse(&raw)?;
        info!("Loaded CI configuration for project {}", sc_config.project_name);

        let parent_dir = if config.scope == Scope::Client && sc_config.has_parent_repository() {
            // a failed clone may leave a partial checkout behind
            run.parent_clone = Some(self.layout.parent_repo_dir());
            Some(self.secrets.clone_parent(&sc_config).await?)
        } else {
            None
        };

        Ok(Setup {
            sc_config,
            parent_dir,
        })
    }

    /// Remove the parent checkout and its revealed secrets. Only the stack
    /// files copied into the workspace outlive the run.
    async fn release_parent_clone(&self, run: &mut RunState) {
        let Some(dir) = run.parent_clone.take() else {
            return;
        };
        match dir.delete().await {
            Ok(()) => info!("Removed parent repository clone {}", dir.path().display()),
            Err(e) => warn!("Failed to remove parent repository clone {}: {}", dir.path().display(), e),
        }
    }

    async fn commit_message(&self) -> String {
        match self.git.last_commit_message(self.layout.root()).await {
            Ok(message) => message,
            Err(e) => {
                warn!("Could not read last commit message: {}", e);
                String::new()
            }
        }
    }

    // ============================= NOTIFICATIONS =============================== //

    async fn load_stacks(&self, setup: Option<&Setup>) -> Vec<StackDescriptor> {
        let mut roots = Vec::new();
        if let Some(parent) = setup.and_then(|s| s.parent_dir.as_ref()) {
            roots.push(parent.path().to_path_buf());
        }
        roots.push(self.layout.root().to_path_buf());

        let mut stacks = Vec::new();
        for root in roots {
            match self.provisioner.read_stacks(&root).await {
                Ok(loaded) => stacks.extend(loaded),
                Err(e) => warn!("Failed to load stacks from {}: {}", root.display(), e),
            }
        }
        stacks
    }

    async fn initialize_notifications(
        &self,
        config: &OperationConfig,
        setup: &Setup,
    ) -> NotificationDispatcher {
        let stacks = self.load_stacks(Some(setup)).await;
        let (notification_config, source) =
            NotificationConfig::resolve(&stacks, &config.stack_name, &self.env);
        info!(source = ?source, "Resolved notification settings");
        NotificationDispatcher::initialize(&notification_config, self.senders.as_ref())
    }

    // ================================ PERFORM ================================== //

    async fn perform_operation(
        &self,
        token: &CancellationToken,
        config: &OperationConfig,
        version: &str,
        preview: bool,
    ) -> Result<Completion, ActionError> {
        let stack_params = StackParams {
            stack_name: config.stack_name.clone(),
            environment: config.environment.clone(),
            version: version.to_string(),
        };
        let parent_params = ProvisionParams::parse(&config.stack_name);

        let result = match (config.operation, config.scope) {
            (OperationType::Deploy, Scope::Client) => {
                if preview {
                    self.provisioner
                        .preview(token, &stack_params)
                        .await
                        .map(|summary| format!("preview completed: {}", summary.summary))
                } else {
                    self.provisioner
                        .deploy(token, &stack_params)
                        .await
                        .map(|_| format!("deployed {}", config.target()))
                }
            }
            (OperationType::Deploy, Scope::Parent) | (OperationType::Provision, _) => {
                if preview {
                    self.provisioner
                        .preview_provision(token, &parent_params)
                        .await
                        .map(|summary| format!("preview completed: {}", summary.summary))
                } else {
                    self.provisioner
                        .provision(token, &parent_params)
                        .await
                        .map(|_| format!("provisioned {}", parent_params.stacks.join(", ")))
                }
            }
            (OperationType::Destroy, Scope::Client) => {
                if preview {
                    Ok(format!(
                        "preview completed: {} would be destroyed",
                        config.target()
                    ))
                } else {
                    self.provisioner
                        .destroy(token, &stack_params)
                        .await
                        .map(|_| format!("destroyed {}", config.target()))
                }
            }
            (OperationType::Destroy, Scope::Parent) => {
                if preview {
                    Ok(format!(
                        "preview completed: parent stacks {} would be destroyed",
                        parent_params.stacks.join(", ")
                    ))
                } else {
                    self.provisioner
                        .destroy_parent(token, &parent_params)
                        .await
                        .map(|_| format!("destroyed parent stacks {}", parent_params.stacks.join(", ")))
                }
            }
        };

        match result {
            Ok(message) => {
                info!("{}", message);
                Ok(Completion {
                    message,
                    preview,
                    version: version.to_string(),
                })
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => Err(ActionError::ProvisionError(format!(
                "{} of {} failed: {}",
                config.operation,
                config.target(),
                e
            ))),
        }
    }

    // ================================ OUTCOME ================================== //

    async fn finish(
        &self,
        config: &OperationConfig,
        run: &mut RunState,
        result: Result<Completion, ActionError>,
    ) -> Result<(), ActionError> {
        if run.dispatcher.is_none() {
            // setup failed before channels existed, nothing to report to
            return result.map(|_| ());
        }

        let duration = format_duration(run.elapsed());
        match &result {
            Ok(completion) => {
                if config.operation == OperationType::Deploy && !completion.preview {
                    self.tag_release(&completion.version).await;
                }
                let description = format!("{} in {}", completion.message, duration);
                self.alert(
                    run,
                    config,
                    AlertType::Succeeded,
                    format!("Completed in {}", duration),
                    description,
                )
                .await;
                info!("{} of {} succeeded in {}", config.operation, config.target(), duration);
            }
            Err(e) => {
                let alert_type = if e.is_cancelled() {
                    AlertType::Cancelled
                } else {
                    AlertType::Failed
                };
                let description = format!("{} after {}: {}", alert_type.label(), duration, e);
                self.alert(run, config, alert_type, format!("{} after {}", alert_type.label(), duration), description)
                    .await;
                error!("{} of {} failed after {}: {}", config.operation, config.target(), duration, e);
            }
        }

        let outputs = OperationOutputs {
            stack_name: config.stack_name.clone(),
            duration: run.elapsed(),
            preview_mode: self.env.preview_mode(),
            environment: config.environment.clone(),
            version: run.version.clone(),
        };
        if let Err(e) = self.outputs.write(&outputs.to_pairs()).await {
            warn!("Failed to write step outputs: {}", e);
        }

        result.map(|_| ())
    }

    async fn tag_release(&self, version: &str) {
        if version.is_empty() {
            return;
        }
        // versioning must never block a deployment
        if let Err(e) = self.tagger.tag_release(version).await {
            warn!("Failed to tag release {}: {}", version, e);
        }
    }

    // ================================= ALERTS ================================== //

    fn start_reason(&self) -> String {
        match (self.env.github_workflow.as_str(), self.env.github_actor.as_str()) {
            ("", "") => "Triggered from CI".to_string(),
            (workflow, "") => format!("Workflow {}", workflow),
            ("", actor) => format!("Triggered by {}", actor),
            (workflow, actor) => format!("Workflow {} triggered by {}", workflow, actor),
        }
    }

    fn start_description(&self, config: &OperationConfig, version: &str, preview: bool) -> String {
        let mode = if preview { " (preview)" } else { "" };
        if version.is_empty() {
            format!("Starting {} of {}{}", config.operation, config.target(), mode)
        } else {
            format!(
                "Starting {} of {} version {}{}",
                config.operation,
                config.target(),
                version,
                mode
            )
        }
    }

    fn build_alert(
        &self,
        config: &OperationConfig,
        alert_type: AlertType,
        reason: String,
        description: String,
        commit_message: &str,
    ) -> Alert {
        Alert {
            name: format!("sc-{}-{}", config.operation.verb(), config.stack_name),
            title: format!("{} {}", config.operation.title(), alert_type.label()),
            reason,
            description,
            stack_name: config.stack_name.clone(),
            stack_env: config.environment.clone(),
            details_url: self.env.details_url(),
            alert_type,
            commit_author: self.env.github_actor.clone(),
            commit_message: commit_message.to_string(),
        }
    }

    async fn alert(
        &self,
        run: &RunState,
        config: &OperationConfig,
        alert_type: AlertType,
        reason: String,
        description: String,
    ) {
        let Some(dispatcher) = run.dispatcher.as_ref() else {
            return;
        };
        let alert = self.build_alert(config, alert_type, reason, description, &run.commit_message);
        dispatcher.send(&alert).await;
    }

    // ============================ STANDALONE CANCEL ============================ //

    /// Stop an operation running in another job: ask the provisioner to
    /// cancel (bounded by the cleanup timeout), send a cancelled alert and
    /// write `duration` / `cleanup-status` outputs.
    pub async fn cancel_stack(&self, request: CancelRequest) -> Result<CleanupStatus, ActionError> {
        let started = Instant::now();
        info!(
            stack = %request.stack_name,
            env = %request.environment,
            scope = %request.scope,
            operation_id = %request.operation_id,
            force = request.force,
            "Cancelling stack operation"
        );

        let stacks = self.load_stacks(None).await;
        let (notification_config, _) =
            NotificationConfig::resolve(&stacks, &request.stack_name, &self.env);
        let dispatcher =
            NotificationDispatcher::initialize(&notification_config, self.senders.as_ref());

        let cleanup = CancellationToken::new();
        let cancel = async {
            match request.scope {
                Scope::Client => {
                    let params = StackParams::new(&request.stack_name, &request.environment);
                    self.provisioner.cancel(&cleanup, &params, request.force).await
                }
                Scope::Parent => {
                    let params = ProvisionParams::parse(&request.stack_name);
                    self.provisioner
                        .cancel_parent(&cleanup, &params, request.force)
                        .await
                }
            }
        };

        let (status, failure) = match tokio::time::timeout(request.cleanup_timeout, cancel).await {
            Ok(Ok(())) => (CleanupStatus::Completed, None),
            Ok(Err(e)) => (CleanupStatus::Failed, Some(e.to_string())),
            Err(_) => {
                cleanup.cancel();
                (
                    CleanupStatus::Timeout,
                    Some(format!(
                        "cleanup did not finish within {}",
                        format_duration(request.cleanup_timeout)
                    )),
                )
            }
        };

        let duration = started.elapsed();
        let operation = match request.scope {
            Scope::Client => OperationType::Deploy,
            Scope::Parent => OperationType::Provision,
        };
        let config = OperationConfig::new(
            operation,
            request.scope,
            &request.stack_name,
            &request.environment,
            "",
        );
        let mut description = format!(
            "Cancellation of {} finished with cleanup status {}",
            config.target(),
            status.as_str()
        );
        if !request.operation_id.is_empty() {
            description.push_str(&format!(" (operation {})", request.operation_id));
        }
        if request.force {
            description.push_str(", force cancel requested");
        }
        if let Some(failure) = &failure {
            description.push_str(&format!(": {}", failure));
        }
        let commit_message = self.commit_message().await;
        let alert = self.build_alert(
            &config,
            AlertType::Cancelled,
            format!("Cancelled after {}", format_duration(duration)),
            description,
            &commit_message,
        );
        dispatcher.send(&alert).await;

        if let Err(e) = self.outputs.write(&status.to_pairs(duration)).await {
            warn!("Failed to write step outputs: {}", e);
        }

        match failure {
            None => {
                info!("Cancellation completed in {}", format_duration(duration));
                Ok(status)
            }
            Some(failure) => Err(ActionError::Cancelled(format!(
                "cleanup {}: {}",
                status.as_str(),
                failure
            ))),
        }
    }
}
