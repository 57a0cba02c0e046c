//! Capture session management
//!
//! - `state`: the authoritative session state machine
//! - `hardware`: transactional configuration of the hardware session
//! - `capabilities`: what the current device selection supports
//! - `controller`: orchestration of transitions, streams and recovery

pub mod capabilities;
pub mod controller;
pub mod hardware;
pub mod state;

pub use capabilities::Capabilities;
pub use controller::{CaptureTarget, Collaborators, SessionController};
pub use hardware::{AttachedGraph, AttachedInput, CaptureHardware, ConfigurationScope, SessionChange};
pub use state::{SessionState, SessionStateMachine, StateSnapshot, TransitionTicket};
