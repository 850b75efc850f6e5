//! Operation execution module

pub mod cancel;
pub mod executor;
pub mod fsm;
pub mod git;
pub mod outputs;
pub mod signal;
pub mod version;
