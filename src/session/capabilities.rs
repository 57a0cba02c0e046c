//! Capabilities summary
//!
//! What the current device selection can do, recomputed whenever the
//! active devices change.

use super::state::SessionState;
use crate::capture::catalog::DeviceCatalog;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub pairing_supported: bool,
    pub hdr_supported: bool,
}

impl Capabilities {
    pub fn compute(state: &SessionState, catalog: &DeviceCatalog, multi_cam: bool) -> Self {
        let active = state.active_devices();

        if active.is_empty() {
            return Self {
                pairing_supported: multi_cam && catalog.pairing_capable_count() >= 2,
                hdr_supported: false,
            };
        }

        Self {
            pairing_supported: multi_cam && active.iter().all(|d| d.supports_pairing),
            hdr_supported: active.iter().any(|d| d.supports_hdr()),
        }
    }
}
