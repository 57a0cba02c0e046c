//! Hardware session configuration
//!
//! Changes to the underlying capture session are collected in a
//! `ConfigurationScope` and handed to the hardware as one change set, which
//! the hardware applies completely or not at all.

use crate::capture::traits::{DeviceRef, FormatDescriptor};
use crate::utils::error::CaptureError;
use async_trait::async_trait;

/// One edit to the session graph
#[derive(Debug, Clone)]
pub enum SessionChange {
    /// Remove every input and output
    DetachAll,
    /// Connect a device, optionally locked to a format
    AttachInput {
        device: DeviceRef,
        format: Option<FormatDescriptor>,
    },
    /// Connect a video output fed by an attached device
    AttachOutput { device_id: String },
}

/// An attached device and the format it runs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedInput {
    pub device_id: String,
    pub format: Option<FormatDescriptor>,
}

/// Current wiring of the hardware session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachedGraph {
    pub inputs: Vec<AttachedInput>,
    /// Device IDs feeding an output
    pub outputs: Vec<String>,
}

impl AttachedGraph {
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    pub fn has_input(&self, device_id: &str) -> bool {
        self.inputs.iter().any(|i| i.device_id == device_id)
    }
}

/// The owning hardware capture session
#[async_trait]
pub trait CaptureHardware: Send + Sync {
    /// Whether several devices can stream at once
    fn supports_multi_cam(&self) -> bool;

    /// Snapshot of the committed wiring
    fn attached(&self) -> AttachedGraph;

    /// Apply a whole change set, or nothing if any change fails
    async fn commit(&self, changes: &[SessionChange]) -> Result<(), CaptureError>;
}

/// Collects session changes until `commit`. Dropping an uncommitted scope
/// discards everything it collected.
pub struct ConfigurationScope<'a> {
    hardware: &'a dyn CaptureHardware,
    changes: Vec<SessionChange>,
    handed_over: bool,
}

impl<'a> ConfigurationScope<'a> {
    pub fn open(hardware: &'a dyn CaptureHardware) -> Self {
        Self {
            hardware,
            changes: Vec::new(),
            handed_over: false,
        }
    }

    pub fn detach_all(&mut self) -> &mut Self {
        self.changes.push(SessionChange::DetachAll);
        self
    }

    pub fn attach_input(&mut self, device: DeviceRef, format: Option<FormatDescriptor>) -> &mut Self {
        self.changes.push(SessionChange::AttachInput { device, format });
        self
    }

    pub fn attach_output(&mut self, device_id: impl Into<String>) -> &mut Self {
        self.changes.push(SessionChange::AttachOutput {
            device_id: device_id.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Hand the collected changes to the hardware
    pub async fn commit(mut self) -> Result<(), CaptureError> {
        self.handed_over = true;
        let changes = std::mem::take(&mut self.changes);
        tracing::debug!("Committing {} session change(s)", changes.len());
        self.hardware.commit(&changes).await
    }
}

impl Drop for ConfigurationScope<'_> {
    fn drop(&mut self) {
        if !self.handed_over && !self.changes.is_empty() {
            tracing::debug!("Discarding {} uncommitted session change(s)", self.changes.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::{CaptureDevice, DevicePosition, DeviceType};
    use crate::capture::virtual_hardware::VirtualHardware;
    use crate::utils::error::AttachDirection;
    use std::sync::Arc;

    fn device(id: &str) -> DeviceRef {
        Arc::new(CaptureDevice::new(id, id, DevicePosition::Back, DeviceType::WideAngle))
    }

    #[tokio::test]
    async fn test_commit_applies_all_changes() {
        let hardware = VirtualHardware::new(true);
        let mut scope = ConfigurationScope::open(&hardware);
        scope
            .attach_input(device("back"), None)
            .attach_output("back")
            .attach_input(device("front"), None)
            .attach_output("front");
        scope.commit().await.unwrap();

        let graph = hardware.attached();
        assert_eq!(graph.inputs.len(), 2);
        assert_eq!(graph.outputs, vec!["back".to_string(), "front".to_string()]);
    }

    #[tokio::test]
    async fn test_dropped_scope_changes_nothing() {
        let hardware = VirtualHardware::new(true);
        {
            let mut scope = ConfigurationScope::open(&hardware);
            scope.attach_input(device("back"), None);
            assert_eq!(scope.len(), 1);
        }
        assert!(hardware.attached().is_empty());
        assert_eq!(hardware.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_commit_is_not_observable() {
        let hardware = VirtualHardware::new(true);
        let mut scope = ConfigurationScope::open(&hardware);
        scope.attach_input(device("back"), None).attach_output("back");
        scope.commit().await.unwrap();
        let before = hardware.attached();

        // Output for a device that is never attached fails the whole set
        let mut scope = ConfigurationScope::open(&hardware);
        scope
            .detach_all()
            .attach_input(device("front"), None)
            .attach_output("missing");
        let err = scope.commit().await.unwrap_err();

        assert_eq!(
            err,
            CaptureError::AttachFailed {
                direction: AttachDirection::Output
            }
        );
        assert_eq!(hardware.attached(), before);
    }
}
