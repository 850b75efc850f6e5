//! FSM unit tests

use sc_action::deploy::fsm::{OperationEvent, OperationFsm, OperationState};

#[test]
fn test_fsm_initial_state() {
    let fsm = OperationFsm::new();
    assert_eq!(fsm.state(), &OperationState::Unregistered);
    assert!(fsm.reason().is_none());
    assert!(!fsm.is_finished());
}

#[test]
fn test_fsm_completion_flow() {
    let mut fsm = OperationFsm::new();

    // Unregistered -> Registered
    fsm.process(OperationEvent::Register).unwrap();
    assert_eq!(fsm.state(), &OperationState::Registered);

    // Registered -> Completed
    fsm.process(OperationEvent::Complete).unwrap();
    assert_eq!(fsm.state(), &OperationState::Completed);
    assert!(fsm.is_finished());

    // Completed -> Unregistered
    fsm.process(OperationEvent::Unregister).unwrap();
    assert_eq!(fsm.state(), &OperationState::Unregistered);
}

#[test]
fn test_fsm_cancel_records_reason() {
    let mut fsm = OperationFsm::new();

    fsm.process(OperationEvent::Register).unwrap();
    fsm.process(OperationEvent::Cancel("SIGTERM".to_string())).unwrap();

    assert_eq!(fsm.state(), &OperationState::Cancelled);
    assert_eq!(fsm.reason(), Some("SIGTERM"));
}

#[test]
fn test_fsm_panic_after_cancel_stays_cancelled() {
    let mut fsm = OperationFsm::new();

    fsm.process(OperationEvent::Register).unwrap();
    fsm.process(OperationEvent::Cancel("SIGINT".to_string())).unwrap();
    fsm.process(OperationEvent::Panic("boom".to_string())).unwrap();

    assert_eq!(fsm.state(), &OperationState::Cancelled);
    assert_eq!(fsm.reason(), Some("SIGINT"));
}

#[test]
fn test_fsm_panic_flow() {
    let mut fsm = OperationFsm::new();

    fsm.process(OperationEvent::Register).unwrap();
    fsm.process(OperationEvent::Panic("index out of bounds".to_string())).unwrap();
    assert_eq!(fsm.state(), &OperationState::Panicked);
    assert_eq!(fsm.reason(), Some("index out of bounds"));

    fsm.process(OperationEvent::Unregister).unwrap();
    assert_eq!(fsm.state(), &OperationState::Unregistered);
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = OperationFsm::new();

    // Cannot complete an operation that was never registered
    let result = fsm.process(OperationEvent::Complete);
    assert!(result.is_err());
    assert_eq!(fsm.state(), &OperationState::Unregistered);

    // Cannot register twice
    fsm.process(OperationEvent::Register).unwrap();
    assert!(fsm.process(OperationEvent::Register).is_err());
}
