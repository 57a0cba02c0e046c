//! Open DualCam - multi-device capture session orchestration.
//!
//! This is the main library crate. It ranks capture devices, pairs formats
//! for simultaneous back/front capture, drives the session state machine,
//! keeps concurrent streams synchronized and recovers from capture failures.

pub mod capture;
pub mod config;
pub mod feedback;
pub mod recovery;
pub mod session;
pub mod sync;
pub mod utils;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use capture::{DeviceCatalog, FormatCompatibilityEngine, UseCase};
pub use config::{ConfigStore, SessionConfig};
pub use feedback::{FeedbackChannel, FeedbackEvent, Severity};
pub use recovery::{RecoveryCoordinator, RecoveryOutcome};
pub use session::{Capabilities, Collaborators, SessionController, SessionState};
pub use sync::StreamSynchronizer;
pub use utils::error::{CaptureError, SessionError};

/// Initialize tracing/logging
///
/// Honors `RUST_LOG` and falls back to debug output for this crate. Safe to
/// call more than once; later calls leave the first subscriber in place.
pub fn init_logging() {
    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "open_dualcam=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_ok() {
        tracing::info!("Starting Open DualCam v{}", env!("CARGO_PKG_VERSION"));
    }
}
