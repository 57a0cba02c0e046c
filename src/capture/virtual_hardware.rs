//! Virtual capture hardware
//!
//! In-process stand-ins for the platform collaborators: a settable device
//! feed, a capture session with scriptable commit failures, and settable
//! thermal / resource-pressure signals. Used on virtualized hosts and in
//! tests.

use super::traits::{
    CaptureDevice, DeviceFeed, ResourceMonitor, ResourcePressure, ThermalMonitor, ThermalState,
};
use crate::session::hardware::{AttachedGraph, AttachedInput, CaptureHardware, SessionChange};
use crate::utils::error::{AttachDirection, CaptureError};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Device feed whose contents can be swapped at runtime
#[derive(Default)]
pub struct VirtualDeviceFeed {
    devices: RwLock<Vec<CaptureDevice>>,
}

impl VirtualDeviceFeed {
    pub fn new(devices: Vec<CaptureDevice>) -> Self {
        Self {
            devices: RwLock::new(devices),
        }
    }

    pub fn set_devices(&self, devices: Vec<CaptureDevice>) {
        *self.devices.write() = devices;
    }

    pub fn push_device(&self, device: CaptureDevice) {
        self.devices.write().push(device);
    }
}

impl DeviceFeed for VirtualDeviceFeed {
    fn enumerate(&self) -> Vec<CaptureDevice> {
        self.devices.read().clone()
    }
}

/// Capture session that validates change sets and can be told to fail
pub struct VirtualHardware {
    multi_cam: bool,
    graph: RwLock<AttachedGraph>,
    commit_delay: Mutex<Duration>,
    scripted_failures: Mutex<VecDeque<CaptureError>>,
    commits: AtomicUsize,
}

impl VirtualHardware {
    pub fn new(multi_cam: bool) -> Self {
        Self {
            multi_cam,
            graph: RwLock::new(AttachedGraph::default()),
            commit_delay: Mutex::new(Duration::ZERO),
            scripted_failures: Mutex::new(VecDeque::new()),
            commits: AtomicUsize::new(0),
        }
    }

    /// Make every commit take `delay` before it is applied
    pub fn set_commit_delay(&self, delay: Duration) {
        *self.commit_delay.lock() = delay;
    }

    /// Fail the next commit with `error`
    pub fn fail_next(&self, error: CaptureError) {
        self.fail_times(error, 1);
    }

    /// Fail the next `times` commits with `error`
    pub fn fail_times(&self, error: CaptureError, times: usize) {
        let mut failures = self.scripted_failures.lock();
        for _ in 0..times {
            failures.push_back(error.clone());
        }
    }

    /// Number of change sets successfully applied
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn apply(&self, graph: &mut AttachedGraph, change: &SessionChange) -> Result<(), CaptureError> {
        match change {
            SessionChange::DetachAll => {
                graph.inputs.clear();
                graph.outputs.clear();
            }
            SessionChange::AttachInput { device, format } => {
                let over_capacity =
                    !graph.inputs.is_empty() && !self.multi_cam;
                if graph.has_input(&device.id) || over_capacity {
                    return Err(CaptureError::AttachFailed {
                        direction: AttachDirection::Input,
                    });
                }
                graph.inputs.push(AttachedInput {
                    device_id: device.id.clone(),
                    format: *format,
                });
            }
            SessionChange::AttachOutput { device_id } => {
                if !graph.has_input(device_id) || graph.outputs.contains(device_id) {
                    return Err(CaptureError::AttachFailed {
                        direction: AttachDirection::Output,
                    });
                }
                graph.outputs.push(device_id.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CaptureHardware for VirtualHardware {
    fn supports_multi_cam(&self) -> bool {
        self.multi_cam
    }

    fn attached(&self) -> AttachedGraph {
        self.graph.read().clone()
    }

    async fn commit(&self, changes: &[SessionChange]) -> Result<(), CaptureError> {
        let delay = *self.commit_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.scripted_failures.lock().pop_front() {
            tracing::debug!("Virtual hardware failing commit: {}", error);
            return Err(error);
        }

        // Work on a copy so a failing change leaves the live graph untouched
        let mut staged = self.graph.read().clone();
        for change in changes {
            self.apply(&mut staged, change)?;
        }

        *self.graph.write() = staged;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Settable thermal and resource-pressure signals
pub struct VirtualSignals {
    thermal: RwLock<ThermalState>,
    pressure: RwLock<ResourcePressure>,
}

impl Default for VirtualSignals {
    fn default() -> Self {
        Self {
            thermal: RwLock::new(ThermalState::Nominal),
            pressure: RwLock::new(ResourcePressure::Normal),
        }
    }
}

impl VirtualSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_thermal_state(&self, state: ThermalState) {
        *self.thermal.write() = state;
    }

    pub fn set_pressure(&self, pressure: ResourcePressure) {
        *self.pressure.write() = pressure;
    }
}

impl ThermalMonitor for VirtualSignals {
    fn thermal_state(&self) -> ThermalState {
        *self.thermal.read()
    }
}

impl ResourceMonitor for VirtualSignals {
    fn pressure(&self) -> ResourcePressure {
        *self.pressure.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::{DevicePosition, DeviceType};
    use std::sync::Arc;

    fn attach(id: &str) -> SessionChange {
        SessionChange::AttachInput {
            device: Arc::new(CaptureDevice::new(id, id, DevicePosition::Back, DeviceType::WideAngle)),
            format: None,
        }
    }

    #[tokio::test]
    async fn test_single_cam_hardware_rejects_second_input() {
        let hardware = VirtualHardware::new(false);
        let err = hardware.commit(&[attach("a"), attach("b")]).await.unwrap_err();
        assert_eq!(
            err,
            CaptureError::AttachFailed {
                direction: AttachDirection::Input
            }
        );
        assert!(hardware.attached().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let hardware = VirtualHardware::new(true);
        hardware.fail_times(CaptureError::SetupFailed, 2);

        assert_eq!(hardware.commit(&[attach("a")]).await, Err(CaptureError::SetupFailed));
        assert_eq!(hardware.commit(&[attach("a")]).await, Err(CaptureError::SetupFailed));
        assert!(hardware.commit(&[attach("a")]).await.is_ok());
        assert_eq!(hardware.commit_count(), 1);
    }

    #[test]
    fn test_feed_can_change() {
        let feed = VirtualDeviceFeed::default();
        assert!(feed.enumerate().is_empty());
        feed.push_device(CaptureDevice::new("usb", "USB", DevicePosition::External, DeviceType::External));
        assert_eq!(feed.enumerate().len(), 1);
    }

    #[test]
    fn test_signals() {
        let signals = VirtualSignals::new();
        assert!(signals.thermal_state().is_nominal());
        signals.set_thermal_state(ThermalState::Serious);
        signals.set_pressure(ResourcePressure::Critical);
        assert_eq!(signals.thermal_state(), ThermalState::Serious);
        assert_eq!(signals.pressure(), ResourcePressure::Critical);
    }
}
