//! Stream descriptors

use crate::capture::traits::{DevicePosition, DeviceRef, DeviceType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique stream ID, allocated in registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Timing-reference priority, derived from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamPriority {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl StreamPriority {
    pub fn for_device(device: &DeviceRef) -> Self {
        match (device.position, device.device_type) {
            (
                DevicePosition::Back,
                DeviceType::WideAngle | DeviceType::Triple | DeviceType::DualWide,
            ) => StreamPriority::High,
            (DevicePosition::Front, _) => StreamPriority::Medium,
            _ => StreamPriority::Low,
        }
    }
}

/// A device stream registered with the synchronizer
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub id: StreamId,
    pub device: DeviceRef,
    pub priority: StreamPriority,
    pub active: bool,
}
