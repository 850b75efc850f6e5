//! Signal supervision for provisioning operations
//!
//! Every supervised operation runs as its own task and is registered under a
//! deterministic operation id. A termination signal, a panic inside the task
//! or an upstream cancellation all end in the same place: the provisioner is
//! asked to stop the operation with a fresh token, so cleanup still runs after
//! the operation's own token has been cancelled.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::RwLock;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::deploy::cancel::CancellationToken;
use crate::deploy::fsm::{OperationEvent, OperationFsm};
use crate::deploy::outputs::{CleanupStatus, OutputWriter};
use crate::errors::ActionError;
use crate::models::operation::{OperationConfig, OperationType, Scope};
use crate::provisioner::{ProvisionParams, Provisioner, StackParams};
use crate::utils::{format_duration, panic_message};

// ================================ SIGNALS ==================================== //

/// Source of termination signals, behind a trait for testability
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Resolve with the signal's name once a termination signal arrives
    async fn wait(&self) -> String;
}

/// SIGTERM / SIGINT from the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSignals;

#[async_trait]
impl SignalSource for OsSignals {
    async fn wait(&self) -> String {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let (mut sigterm, mut sigint) =
                match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                    (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                    (Err(e), _) | (_, Err(e)) => {
                        error!("Failed to install signal handlers: {}", e);
                        return std::future::pending::<String>().await;
                    }
                };

            tokio::select! {
                _ = sigterm.recv() => "SIGTERM".to_string(),
                _ = sigint.recv() => "SIGINT".to_string(),
            }
        }

        #[cfg(not(unix))]
        {
            match tokio::signal::ctrl_c().await {
                Ok(()) => "SIGINT".to_string(),
                Err(e) => {
                    error!("Failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<String>().await
                }
            }
        }
    }
}

// ============================ OPERATIONS ===================================== //

/// An operation the provisioner knows how to cancel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancellableOperation {
    Deploy(StackParams),
    Destroy(StackParams),
    Provision(ProvisionParams),
    DestroyParent(ProvisionParams),
}

impl CancellableOperation {
    /// Map an operation request onto the provisioner call it will make
    pub fn from_config(config: &OperationConfig) -> Self {
        let stack = StackParams {
            stack_name: config.stack_name.clone(),
            environment: config.environment.clone(),
            version: config.version.clone(),
        };
        match (config.operation, config.scope) {
            (OperationType::Deploy, Scope::Client) => CancellableOperation::Deploy(stack),
            (OperationType::Deploy, Scope::Parent) | (OperationType::Provision, _) => {
                CancellableOperation::Provision(ProvisionParams::parse(&config.stack_name))
            }
            (OperationType::Destroy, Scope::Client) => CancellableOperation::Destroy(stack),
            (OperationType::Destroy, Scope::Parent) => {
                CancellableOperation::DestroyParent(ProvisionParams::parse(&config.stack_name))
            }
        }
    }

    /// Registry key, stable for the same operation on the same target
    pub fn operation_id(&self) -> String {
        match self {
            CancellableOperation::Deploy(p) => {
                format!("ga-deploy-{}-{}", p.stack_name, p.environment)
            }
            CancellableOperation::Destroy(p) => {
                format!("ga-destroy-{}-{}", p.stack_name, p.environment)
            }
            CancellableOperation::Provision(p) => format!("ga-provision-{}", p.stacks.len()),
            CancellableOperation::DestroyParent(p) => {
                format!("ga-destroy-parent-{}", p.stacks.len())
            }
        }
    }

    /// Ask the provisioner to stop this operation
    pub async fn cancel(
        &self,
        provisioner: &dyn Provisioner,
        token: &CancellationToken,
        force: bool,
    ) -> Result<(), ActionError> {
        match self {
            CancellableOperation::Deploy(p) | CancellableOperation::Destroy(p) => {
                provisioner.cancel(token, p, force).await
            }
            CancellableOperation::Provision(p) | CancellableOperation::DestroyParent(p) => {
                provisioner.cancel_parent(token, p, force).await
            }
        }
    }
}

// ============================= SIGNAL HANDLER ================================ //

#[derive(Debug, Clone)]
pub struct SignalOptions {
    /// Upper bound for the provisioner's cancel call and for waiting on the
    /// cancelled task
    pub cleanup_timeout: Duration,

    /// Passed through to the provisioner's cancel calls
    pub force_cancel: bool,
}

impl Default for SignalOptions {
    fn default() -> Self {
        Self {
            cleanup_timeout: Duration::from_secs(300),
            force_cancel: false,
        }
    }
}

struct ActiveOperation {
    serial: u64,
    operation: CancellableOperation,
    token: CancellationToken,
}

type TaskOutput = Result<Result<(), ActionError>, Box<dyn Any + Send>>;

enum Event {
    Finished(Result<TaskOutput, JoinError>),
    Signal(String),
    Cancelled,
}

/// Supervises operations so they complete, are cleanly cancelled, or fail
/// with a well-formed error
pub struct SignalHandler {
    provisioner: Arc<dyn Provisioner>,
    signals: Arc<dyn SignalSource>,
    options: SignalOptions,
    outputs: OutputWriter,
    registry: RwLock<HashMap<String, ActiveOperation>>,
    serial: AtomicU64,
}

impl SignalHandler {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        signals: Arc<dyn SignalSource>,
        options: SignalOptions,
        outputs: OutputWriter,
    ) -> Self {
        Self {
            provisioner,
            signals,
            options,
            outputs,
            registry: RwLock::new(HashMap::new()),
            serial: AtomicU64::new(0),
        }
    }

    /// Ids of the operations currently registered
    pub async fn active_operations(&self) -> Vec<String> {
        let registry = self.registry.read().await;
        let mut ids: Vec<String> = registry.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run `run` as a supervised task. The task receives a child of `parent`
    /// which is cancelled when a signal arrives or the operation is cancelled
    /// through [`SignalHandler::cancel_operation`].
    pub async fn with_signal_handling<F, Fut>(
        &self,
        parent: &CancellationToken,
        operation: CancellableOperation,
        run: F,
    ) -> Result<(), ActionError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        let id = operation.operation_id();
        let token = parent.child_token();
        let mut fsm = OperationFsm::new();

        let serial = self.register(&id, operation, &token).await?;
        transition(&id, &mut fsm, OperationEvent::Register);

        let started = Instant::now();
        let mut task: JoinHandle<TaskOutput> =
            tokio::spawn(AssertUnwindSafe(run(token.clone())).catch_unwind());

        let event = tokio::select! {
            joined = &mut task => Event::Finished(joined),
            signal = self.signals.wait() => Event::Signal(signal),
            _ = token.cancelled() => Event::Cancelled,
        };

        let result = match event {
            Event::Finished(joined) => self.on_finished(&id, &mut fsm, joined).await,
            Event::Signal(signal) => {
                self.on_signal(&id, &mut fsm, &mut task, &signal, started)
                    .await
            }
            Event::Cancelled => {
                transition(
                    &id,
                    &mut fsm,
                    OperationEvent::Cancel("execution context cancelled".to_string()),
                );
                self.wait_for_task(&id, &mut task).await;
                Err(ActionError::Cancelled(
                    "execution context cancelled".to_string(),
                ))
            }
        };

        self.unregister(&id, serial).await;
        transition(&id, &mut fsm, OperationEvent::Unregister);
        result
    }

    /// Cancel one registered operation. Returns `None` when nothing is
    /// registered under `id`, so a second call is a no-op.
    pub async fn cancel_operation(&self, id: &str) -> Option<CleanupStatus> {
        let entry = self.registry.write().await.remove(id)?;
        Some(self.cancel_entry(id, entry).await)
    }

    /// Cancel every registered operation, one after the other. Failures are
    /// logged per operation. Returns how many cancellations completed.
    pub async fn cancel_all_operations(&self) -> usize {
        let entries: Vec<(String, ActiveOperation)> = {
            let mut registry = self.registry.write().await;
            registry.drain().collect()
        };
        if entries.is_empty() {
            return 0;
        }

        info!("Cancelling {} active operations", entries.len());
        let mut completed = 0;
        for (id, entry) in entries {
            if self.cancel_entry(&id, entry).await == CleanupStatus::Completed {
                completed += 1;
            }
        }
        completed
    }

    // ------------------------------ registry ------------------------------- //

    async fn register(
        &self,
        id: &str,
        operation: CancellableOperation,
        token: &CancellationToken,
    ) -> Result<u64, ActionError> {
        let mut registry = self.registry.write().await;
        if registry.contains_key(id) {
            return Err(ActionError::AlreadyRunning(id.to_string()));
        }

        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        registry.insert(
            id.to_string(),
            ActiveOperation {
                serial,
                operation,
                token: token.clone(),
            },
        );
        debug!("Registered operation {}", id);
        Ok(serial)
    }

    async fn unregister(&self, id: &str, serial: u64) {
        let mut registry = self.registry.write().await;
        // a cancellation may already have taken the entry and a new
        // operation may have registered under the same id since
        if registry.get(id).is_some_and(|entry| entry.serial == serial) {
            registry.remove(id);
        }
        debug!("Unregistered operation {}", id);
    }

    // ------------------------------ outcomes ------------------------------- //

    async fn on_finished(
        &self,
        id: &str,
        fsm: &mut OperationFsm,
        joined: Result<TaskOutput, JoinError>,
    ) -> Result<(), ActionError> {
        match joined {
            Ok(Ok(result)) => {
                transition(id, fsm, OperationEvent::Complete);
                result
            }
            Ok(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                error!("Operation {} panicked: {}", id, message);
                transition(id, fsm, OperationEvent::Panic(message.clone()));
                self.cancel_operation(id).await;
                Err(ActionError::Panicked(message))
            }
            Err(e) => {
                let message = format!("operation task failed: {}", e);
                error!("Operation {}: {}", id, message);
                transition(id, fsm, OperationEvent::Panic(message.clone()));
                self.cancel_operation(id).await;
                Err(ActionError::Panicked(message))
            }
        }
    }

    async fn on_signal(
        &self,
        id: &str,
        fsm: &mut OperationFsm,
        task: &mut JoinHandle<TaskOutput>,
        signal: &str,
        started: Instant,
    ) -> Result<(), ActionError> {
        warn!(
            force = self.options.force_cancel,
            "Received {}, cancelling operation {}", signal, id
        );
        transition(id, fsm, OperationEvent::Cancel(signal.to_string()));

        let mut status = self
            .cancel_operation(id)
            .await
            .unwrap_or(CleanupStatus::Completed);
        if !self.wait_for_task(id, task).await {
            status = CleanupStatus::Timeout;
        }

        let duration = started.elapsed();
        info!(
            "Operation {} stopped after {} with cleanup status {}",
            id,
            format_duration(duration),
            status.as_str()
        );
        if let Err(e) = self.outputs.write(&status.to_pairs(duration)).await {
            warn!("Failed to write step outputs: {}", e);
        }

        Err(ActionError::Cancelled(format!(
            "operation {} cancelled due to signal {}",
            id, signal
        )))
    }

    /// Wait for the task to return on its own, aborting it once the cleanup
    /// timeout has passed. Returns false on timeout.
    async fn wait_for_task(&self, id: &str, task: &mut JoinHandle<TaskOutput>) -> bool {
        match tokio::time::timeout(self.options.cleanup_timeout, &mut *task).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    "Operation {} did not stop within {}, aborting",
                    id,
                    format_duration(self.options.cleanup_timeout)
                );
                task.abort();
                false
            }
        }
    }

    async fn cancel_entry(&self, id: &str, entry: ActiveOperation) -> CleanupStatus {
        entry.token.cancel();

        let cleanup = CancellationToken::new();
        let cancel = entry
            .operation
            .cancel(self.provisioner.as_ref(), &cleanup, self.options.force_cancel);

        match tokio::time::timeout(self.options.cleanup_timeout, cancel).await {
            Ok(Ok(())) => {
                info!("Cancelled operation {}", id);
                CleanupStatus::Completed
            }
            Ok(Err(e)) => {
                error!("Failed to cancel operation {}: {}", id, e);
                CleanupStatus::Failed
            }
            Err(_) => {
                cleanup.cancel();
                error!(
                    "Cancelling operation {} timed out after {}",
                    id,
                    format_duration(self.options.cleanup_timeout)
                );
                CleanupStatus::Timeout
            }
        }
    }
}

fn transition(id: &str, fsm: &mut OperationFsm, event: OperationEvent) {
    if let Err(e) = fsm.process(event) {
        warn!("Operation {}: {}", id, e);
        return;
    }
    debug!("Operation {} is now {:?}", id, fsm.state());
}
