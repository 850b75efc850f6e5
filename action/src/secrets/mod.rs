//! Secret revelation

pub mod chain;
pub mod cryptor;
pub mod ssh;
