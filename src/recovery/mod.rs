//! Failure classification and recovery
//!
//! - `policy`: per-kind recoverability, suggestions and recovery action
//! - `coordinator`: the bounded-retry recovery protocol

pub mod coordinator;
pub mod policy;

pub use coordinator::{RecoveryCoordinator, RecoveryHandler, RecoveryOutcome, RecoveryStatus, ThermalRecovery};
pub use policy::{ErrorRecord, RecoveryAction, MAX_RETRIES};
