//! Data models shared across the orchestrator

pub mod alert;
pub mod operation;
pub mod sc_config;
pub mod stack;
