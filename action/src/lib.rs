//! sc-action Library
//!
//! Stack operation orchestration for CI runners: secret revelation,
//! provisioning through the `sc` engine, signal supervision and chat
//! notifications.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod notify;
pub mod provisioner;
pub mod secrets;
pub mod storage;
pub mod utils;
