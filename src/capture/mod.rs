//! Capture devices and formats
//!
//! This module provides device discovery and ranking, paired format
//! selection, and the virtual hardware used when no real devices exist.

pub mod catalog;
pub mod formats;
pub mod traits;
pub mod virtual_hardware;

#[cfg(feature = "native")]
pub mod native;

// Re-export the common types
pub use catalog::{DeviceCatalog, PositionFilter, UseCase};
pub use formats::{FormatCompatibilityEngine, FormatPair, TargetProfile};
pub use traits::{
    CaptureDevice, DeviceFeed, DevicePosition, DeviceRef, DeviceType, FormatDescriptor,
    Resolution, ResourceMonitor, ResourcePressure, ThermalMonitor, ThermalState,
};
pub use virtual_hardware::{VirtualDeviceFeed, VirtualHardware, VirtualSignals};
