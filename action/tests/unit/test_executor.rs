//! Operation executor tests

use std::path::PathBuf;

use secrecy::SecretString;

use sc_action::app::options::ActionEnv;
use sc_action::deploy::cancel::CancellationToken;
use sc_action::errors::ActionError;
use sc_action::models::alert::AlertType;
use sc_action::models::operation::{OperationConfig, OperationType, Scope};

use crate::fakes::{DecryptFailure, Harness, SC_CONFIG};

fn deploy_config() -> OperationConfig {
    OperationConfig::new(OperationType::Deploy, Scope::Client, "checkout", "staging", "")
}

/// Environment whose CI configuration points at a parent repository that
/// ships one stack file
fn parent_env(harness: &Harness) -> ActionEnv {
    harness.git.clone_files.lock().unwrap().push((
        PathBuf::from(".sc/stacks/checkout/server.yaml"),
        "schemaVersion: 1.0\n".to_string(),
    ));
    let sc_config = format!("{}parentRepository: git@github.com:acme/infra.git\n", SC_CONFIG);
    ActionEnv {
        sc_config: Some(SecretString::from(sc_config)),
        ..harness.env()
    }
}

#[tokio::test]
async fn test_deploy_happy_path() {
    let harness = Harness::new();
    let executor = harness.executor(harness.env());

    executor
        .execute_operation(CancellationToken::new(), deploy_config())
        .await
        .unwrap();

    assert_eq!(harness.senders.titles(), vec!["Deploy Started", "Deploy Succeeded"]);
    // the start alert already names the generated version
    assert!(harness.senders.alerts()[0].description.contains("-abcdef1"));

    let calls = harness.provisioner.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].starts_with("deploy checkout staging "));
    assert!(calls[0].ends_with("-abcdef1"));

    let outputs = harness.outputs();
    assert!(outputs.contains("stack-name=checkout\n"));
    assert!(outputs.contains("preview-mode=false\n"));
    assert!(outputs.contains("environment=staging\n"));
    assert!(outputs.contains("duration="));
    assert!(outputs.contains("version="));

    // the generated version is tagged and pushed
    let created = harness.git.created();
    assert_eq!(created.len(), 1);
    assert!(created[0].ends_with("-abcdef1"));
    assert_eq!(harness.git.pushed(), created);
}

#[tokio::test]
async fn test_alert_fields() {
    let harness = Harness::new();
    let mut env = harness.env();
    env.github_repository = "acme/shop".to_string();
    env.github_run_id = "42".to_string();
    let executor = harness.executor(env);

    executor
        .execute_operation(CancellationToken::new(), deploy_config())
        .await
        .unwrap();

    let alerts = harness.senders.alerts();
    assert_eq!(alerts.len(), 2);
    let started = &alerts[0];
    assert_eq!(started.alert_type, AlertType::Started);
    assert_eq!(started.stack_name, "checkout");
    assert_eq!(started.stack_env, "staging");
    assert_eq!(started.commit_author, "octocat");
    assert_eq!(started.commit_message, "Bump checkout service");
    assert_eq!(started.details_url, "https://github.com/acme/shop/actions/runs/42");
    assert_eq!(alerts[1].alert_type, AlertType::Succeeded);
}

#[tokio::test]
async fn test_explicit_version_is_used() {
    let harness = Harness::new();
    let executor = harness.executor(harness.env());
    let config = OperationConfig::new(
        OperationType::Deploy,
        Scope::Client,
        "checkout",
        "staging",
        "1.4.2",
    );

    executor
        .execute_operation(CancellationToken::new(), config)
        .await
        .unwrap();

    assert_eq!(harness.provisioner.calls(), vec!["deploy checkout staging 1.4.2"]);
    assert_eq!(harness.git.created(), vec!["1.4.2"]);
    assert!(harness.outputs().contains("version=1.4.2\n"));
}

#[tokio::test]
async fn test_preview_does_not_mutate() {
    let harness = Harness::new();
    let mut env = harness.env();
    env.sc_preview = true;
    let executor = harness.executor(env);

    executor
        .execute_operation(CancellationToken::new(), deploy_config())
        .await
        .unwrap();

    assert_eq!(harness.provisioner.calls(), vec!["preview checkout"]);
    assert!(harness.git.created().is_empty());
    assert!(harness.git.pushed().is_empty());
    assert_eq!(harness.senders.titles(), vec!["Deploy Started", "Deploy Succeeded"]);
    assert!(harness.outputs().contains("preview-mode=true\n"));
}

#[tokio::test]
async fn test_destroy_preview_makes_no_provisioner_call() {
    let harness = Harness::new();
    let mut env = harness.env();
    env.sc_dry_run = true;
    let executor = harness.executor(env);
    let config = OperationConfig::new(OperationType::Destroy, Scope::Client, "checkout", "staging", "");

    executor
        .execute_operation(CancellationToken::new(), config)
        .await
        .unwrap();

    assert!(harness.provisioner.calls().is_empty());
    let alerts = harness.senders.alerts();
    assert_eq!(alerts[1].title, "Destroy Succeeded");
    assert!(alerts[1].description.contains("preview completed"));
}

#[tokio::test]
async fn test_provision_dispatches_to_parent() {
    let harness = Harness::new();
    let mut env = harness.env();
    env.stack_name = "infra,dns".to_string();
    let executor = harness.executor(env);
    let config = OperationConfig::new(OperationType::Provision, Scope::Parent, "infra,dns", "", "");

    executor
        .execute_operation(CancellationToken::new(), config)
        .await
        .unwrap();

    assert_eq!(harness.provisioner.calls(), vec!["provision infra,dns"]);
    // only deployments are tagged
    assert!(harness.git.created().is_empty());
    assert_eq!(harness.senders.titles(), vec!["Provision Started", "Provision Succeeded"]);
}

#[tokio::test]
async fn test_failure_sends_exactly_one_outcome_alert() {
    let harness = Harness::new();
    harness.provisioner.fail("stack checkout is locked");
    let executor = harness.executor(harness.env());

    let err = executor
        .execute_operation(CancellationToken::new(), deploy_config())
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "deploy of stack checkout (staging) failed: stack checkout is locked"
    );
    assert_eq!(harness.senders.titles(), vec!["Deploy Started", "Deploy Failed"]);
    let failed = &harness.senders.alerts()[1];
    assert!(failed.description.contains("stack checkout is locked"));
    assert!(harness.git.created().is_empty());
}

#[tokio::test]
async fn test_secret_failure_still_alerts() {
    let harness = Harness::new();
    harness
        .cryptors
        .fail(DecryptFailure::Message("corrupt secrets store".to_string()));
    let executor = harness.executor(harness.env());

    let err = executor
        .execute_operation(CancellationToken::new(), deploy_config())
        .await
        .unwrap_err();

    assert!(matches!(err, ActionError::SecretsError(_)));
    assert!(harness.provisioner.calls().is_empty());
    assert_eq!(harness.senders.titles(), vec!["Deploy Started", "Deploy Failed"]);
}

#[tokio::test]
async fn test_setup_failure_sends_no_alerts() {
    let harness = Harness::new();
    let mut env = harness.env();
    env.sc_config = None;
    let executor = harness.executor(env);

    let err = executor
        .execute_operation(CancellationToken::new(), deploy_config())
        .await
        .unwrap_err();

    assert!(matches!(err, ActionError::ConfigError(_)));
    assert!(harness.senders.alerts().is_empty());
    assert!(harness.provisioner.calls().is_empty());
    assert!(harness.outputs().is_empty());
}

#[tokio::test]
async fn test_panic_is_contained() {
    let harness = Harness::new();
    *harness.provisioner.panic_with.lock().unwrap() = Some("state file exploded".to_string());
    let executor = harness.executor(harness.env());

    let err = executor
        .execute_operation(CancellationToken::new(), deploy_config())
        .await
        .unwrap_err();

    match err {
        ActionError::Panicked(message) => assert_eq!(message, "state file exploded"),
        other => panic!("expected a panic error, got {other}"),
    }
    assert_eq!(harness.senders.titles(), vec!["Deploy Started", "Deploy Failed"]);
    assert!(harness.senders.alerts()[1]
        .description
        .contains("state file exploded"));
}

#[tokio::test]
async fn test_key_mismatch_tolerated_in_preview_for_parent() {
    let harness = Harness::new();
    harness.cryptors.fail(DecryptFailure::Message(
        "public key not found in secrets".to_string(),
    ));
    let mut env = harness.env();
    env.sc_preview = true;
    let executor = harness.executor(env);
    let config = OperationConfig::new(OperationType::Provision, Scope::Parent, "infra", "", "");

    executor
        .execute_operation(CancellationToken::new(), config)
        .await
        .unwrap();

    assert_eq!(harness.provisioner.calls(), vec!["preview-provision infra"]);
}

#[tokio::test]
async fn test_key_mismatch_fatal_for_parent() {
    let harness = Harness::new();
    harness.cryptors.fail(DecryptFailure::Message(
        "public key not found in secrets".to_string(),
    ));
    let executor = harness.executor(harness.env());
    let config = OperationConfig::new(OperationType::Provision, Scope::Parent, "infra", "", "");

    let err = executor
        .execute_operation(CancellationToken::new(), config)
        .await
        .unwrap_err();

    assert!(err.is_key_mismatch());
    assert!(harness.provisioner.calls().is_empty());
    assert_eq!(harness.senders.titles(), vec!["Provision Started", "Provision Failed"]);
}

#[tokio::test]
async fn test_key_mismatch_tolerated_for_client() {
    let harness = Harness::new();
    harness.cryptors.fail(DecryptFailure::Message(
        "public key not configured".to_string(),
    ));
    let executor = harness.executor(harness.env());

    executor
        .execute_operation(CancellationToken::new(), deploy_config())
        .await
        .unwrap();

    assert_eq!(harness.provisioner.count("deploy"), 1);
}

#[tokio::test]
async fn test_parent_clone_removed_after_success() {
    let harness = Harness::new();
    let executor = harness.executor(parent_env(&harness));

    executor
        .execute_operation(CancellationToken::new(), deploy_config())
        .await
        .unwrap();

    assert_eq!(harness.git.clones().len(), 1);
    assert!(!harness.layout().parent_repo_dir().path().exists());
    // the copied stack files stay for the provisioner
    assert!(harness
        .root()
        .join(".sc/stacks/checkout/server.yaml")
        .exists());
}

#[tokio::test]
async fn test_parent_clone_removed_after_failure() {
    let harness = Harness::new();
    harness.provisioner.fail("stack checkout is locked");
    let executor = harness.executor(parent_env(&harness));

    let err = executor
        .execute_operation(CancellationToken::new(), deploy_config())
        .await
        .unwrap_err();

    assert!(matches!(err, ActionError::ProvisionError(_)));
    assert!(!harness.layout().parent_repo_dir().path().exists());
}

#[tokio::test]
async fn test_parent_clone_removed_after_panic() {
    let harness = Harness::new();
    *harness.provisioner.panic_with.lock().unwrap() = Some("state file exploded".to_string());
    let executor = harness.executor(parent_env(&harness));

    let err = executor
        .execute_operation(CancellationToken::new(), deploy_config())
        .await
        .unwrap_err();

    assert!(matches!(err, ActionError::Panicked(_)));
    assert!(!harness.layout().parent_repo_dir().path().exists());
}
