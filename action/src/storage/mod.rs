//! Workspace storage

pub mod layout;
