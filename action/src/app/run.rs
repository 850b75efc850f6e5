//! Action run entry

use std::sync::Arc;

use tracing::{error, info};

use crate::app::options::{ActionEnv, ActionOptions};
use crate::deploy::cancel::CancellationToken;
use crate::deploy::executor::{CancelRequest, ExecutorDeps, OperationExecutor};
use crate::deploy::git::GitCli;
use crate::deploy::outputs::OutputWriter;
use crate::deploy::signal::{CancellableOperation, SignalHandler, SignalOptions, SignalSource};
use crate::errors::ActionError;
use crate::http::client::HttpClient;
use crate::models::operation::{OperationConfig, OperationType, Scope};
use crate::notify::senders::WebhookSenderFactory;
use crate::provisioner::cli::ScCliProvisioner;
use crate::secrets::cryptor::ScCliCryptorFactory;
use crate::storage::layout::WorkspaceLayout;

/// What the action was asked to do
#[derive(Debug, Clone)]
pub enum Command {
    /// Deploy, provision or destroy under signal supervision
    Operation(OperationConfig),

    /// Stop an operation running in another job
    Cancel(CancelRequest),
}

impl Command {
    /// Build a command from `--operation` / `--scope` and the environment
    pub fn parse(operation: &str, scope: Option<&str>, env: &ActionEnv) -> Result<Self, ActionError> {
        let scope = scope
            .map(|s| s.parse::<Scope>().map_err(ActionError::ConfigError))
            .transpose()?;
        let parent_stack = env.stack_type.eq_ignore_ascii_case("parent");

        if env.stack_name.is_empty() {
            return Err(ActionError::ConfigError("STACK_NAME is not set".to_string()));
        }

        if operation.eq_ignore_ascii_case("cancel") {
            let mut request = CancelRequest::from_env(env);
            if let Some(scope) = scope {
                request.scope = scope;
            }
            return Ok(Command::Cancel(request));
        }

        let operation: OperationType = operation.parse().map_err(ActionError::ConfigError)?;
        let scope = scope.unwrap_or(match operation {
            OperationType::Provision => Scope::Parent,
            _ if parent_stack => Scope::Parent,
            _ => Scope::Client,
        });

        if scope == Scope::Client && env.environment.is_empty() {
            return Err(ActionError::ConfigError(format!(
                "ENVIRONMENT is required to {} a client stack",
                operation.verb()
            )));
        }

        Ok(Command::Operation(OperationConfig::new(
            operation,
            scope,
            env.stack_name.clone(),
            env.environment.clone(),
            env.version.clone(),
        )))
    }
}

/// Long-lived components shared by a run
pub struct Services {
    pub executor: Arc<OperationExecutor>,
    pub signal_handler: SignalHandler,
}

// =============================== INITIALIZATION ================================== //

/// Wire the `sc` and `git` backed collaborators
pub fn init(
    options: &ActionOptions,
    env: Arc<ActionEnv>,
    signals: Arc<dyn SignalSource>,
) -> Result<Services, ActionError> {
    let http = HttpClient::new()?;
    let deps = ExecutorDeps {
        provisioner: Arc::new(ScCliProvisioner::new(
            options.sc_binary.clone(),
            options.workspace.clone(),
        )),
        git: Arc::new(GitCli::new()),
        cryptors: Arc::new(ScCliCryptorFactory::new(options.sc_binary.clone())),
        senders: Arc::new(WebhookSenderFactory::new(http)),
    };
    Ok(init_with(deps, options, env, signals))
}

/// Wire the given collaborators
pub fn init_with(
    deps: ExecutorDeps,
    options: &ActionOptions,
    env: Arc<ActionEnv>,
    signals: Arc<dyn SignalSource>,
) -> Services {
    let layout = WorkspaceLayout::new(options.workspace.clone());
    let signal_handler = SignalHandler::new(
        deps.provisioner.clone(),
        signals,
        SignalOptions {
            cleanup_timeout: options.cleanup_timeout,
            force_cancel: env.force_cancel,
        },
        OutputWriter::new(env.github_output.clone()),
    );
    let executor = Arc::new(OperationExecutor::new(deps, layout, env));

    Services {
        executor,
        signal_handler,
    }
}

// ==================================== RUN ======================================== //

/// Run a single command to completion
pub async fn run(services: &Services, command: Command) -> Result<(), ActionError> {
    match command {
        Command::Operation(config) => {
            let operation = CancellableOperation::from_config(&config);
            info!(operation_id = %operation.operation_id(), "Running {} of {}", config.operation, config.target());

            let root = CancellationToken::new();
            let executor = services.executor.clone();
            let result = services
                .signal_handler
                .with_signal_handling(&root, operation, move |token| async move {
                    executor.execute_operation(token, config).await
                })
                .await;

            if let Err(e) = &result {
                error!("Operation failed: {}", e);
            }
            result
        }
        Command::Cancel(request) => {
            let status = services.executor.cancel_stack(request).await?;
            info!("Cancellation finished with cleanup status {}", status.as_str());
            Ok(())
        }
    }
}
