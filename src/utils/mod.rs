//! Shared utilities

pub mod error;

pub use error::{AttachDirection, CaptureError, ConfigError, MediaKind, SessionError, SessionResult};
