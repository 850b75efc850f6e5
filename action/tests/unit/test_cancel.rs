//! Standalone cancel action tests

use std::time::Duration;

use sc_action::deploy::executor::CancelRequest;
use sc_action::deploy::outputs::CleanupStatus;
use sc_action::models::alert::AlertType;

use crate::fakes::Harness;

#[tokio::test]
async fn test_cancel_client_stack() {
    let harness = Harness::new();
    let mut env = harness.env();
    env.force_cancel = true;
    env.operation_id = "ga-deploy-checkout-staging".to_string();
    let executor = harness.executor(env.clone());

    let status = executor
        .cancel_stack(CancelRequest::from_env(&env))
        .await
        .unwrap();

    assert_eq!(status, CleanupStatus::Completed);
    assert_eq!(harness.provisioner.calls(), vec!["cancel checkout staging force=true"]);

    let alerts = harness.senders.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::Cancelled);
    assert_eq!(alerts[0].title, "Deploy Cancelled");
    assert!(alerts[0].description.contains("ga-deploy-checkout-staging"));
    assert!(alerts[0].description.contains("force cancel"));

    let outputs = harness.outputs();
    assert!(outputs.contains("cleanup-status=completed\n"));
    assert!(outputs.contains("duration="));
}

#[tokio::test]
async fn test_cancel_parent_stack() {
    let harness = Harness::new();
    let mut env = harness.env();
    env.stack_name = "infra".to_string();
    env.stack_type = "parent".to_string();
    let executor = harness.executor(env.clone());

    executor
        .cancel_stack(CancelRequest::from_env(&env))
        .await
        .unwrap();

    assert_eq!(harness.provisioner.calls(), vec!["cancel-parent infra force=false"]);
    assert_eq!(harness.senders.titles(), vec!["Provision Cancelled"]);
}

#[tokio::test]
async fn test_cancel_cleanup_timeout() {
    let harness = Harness::new();
    *harness.provisioner.cancel_delay.lock().unwrap() = Some(Duration::from_secs(5));
    let env = harness.env();
    let executor = harness.executor(env.clone());

    let mut request = CancelRequest::from_env(&env);
    request.cleanup_timeout = Duration::from_millis(50);
    let err = executor.cancel_stack(request).await.unwrap_err();

    assert!(err.to_string().contains("cleanup timeout"));
    assert!(harness.outputs().contains("cleanup-status=timeout\n"));
    // the alert goes out even when cleanup did not finish
    assert_eq!(harness.senders.titles(), vec!["Deploy Cancelled"]);
}
