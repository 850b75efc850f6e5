//! Operation alerts

pub mod config;
pub mod dispatcher;
pub mod senders;
