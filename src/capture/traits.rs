//! Capture device model and collaborator traits
//!
//! Platform-agnostic descriptions of capture hardware, plus the signals the
//! engine consumes from the platform (device enumeration, thermal state,
//! resource pressure).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of scan lines, independent of orientation (the short edge)
    pub fn lines(&self) -> u32 {
        self.width.min(self.height)
    }

    /// Total pixel count
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A single operating mode of a capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDescriptor {
    /// Output resolution
    pub resolution: Resolution,

    /// Nominal frame rate in frames per second
    pub frame_rate: u32,

    /// Whether this mode can run alongside another device's stream
    pub pairing_capable: bool,

    /// Whether this mode supports HDR capture
    #[serde(default)]
    pub hdr: bool,
}

impl FormatDescriptor {
    /// A format usable only when the device runs alone
    pub fn new(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            resolution: Resolution::new(width, height),
            frame_rate,
            pairing_capable: false,
            hdr: false,
        }
    }

    /// A pairing-capable format
    pub fn pairing(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            pairing_capable: true,
            ..Self::new(width, height, frame_rate)
        }
    }

    pub fn with_hdr(mut self) -> Self {
        self.hdr = true;
        self
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.resolution, self.frame_rate)
    }
}

/// Physical placement of a capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePosition {
    Back,
    Front,
    External,
}

/// Kind of camera module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceType {
    WideAngle,
    UltraWide,
    Telephoto,
    /// Virtual device fusing wide, ultra-wide and telephoto modules
    Triple,
    /// Virtual device fusing wide and ultra-wide modules
    DualWide,
    TrueDepth,
    External,
}

/// Immutable snapshot of a capture device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureDevice {
    /// Stable unique device ID
    pub id: String,

    /// Human-readable device name
    pub name: String,

    /// Where the device sits
    pub position: DevicePosition,

    /// Camera module kind
    pub device_type: DeviceType,

    /// Whether the device can take part in a paired (dual) session
    pub supports_pairing: bool,

    /// Whether the device can deliver depth data
    pub supports_depth: bool,

    /// Every operating mode the device reports
    pub formats: Vec<FormatDescriptor>,
}

impl CaptureDevice {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        position: DevicePosition,
        device_type: DeviceType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            position,
            device_type,
            supports_pairing: false,
            supports_depth: false,
            formats: Vec::new(),
        }
    }

    pub fn with_pairing(mut self, supports_pairing: bool) -> Self {
        self.supports_pairing = supports_pairing;
        self
    }

    pub fn with_depth(mut self, supports_depth: bool) -> Self {
        self.supports_depth = supports_depth;
        self
    }

    pub fn with_formats(mut self, formats: Vec<FormatDescriptor>) -> Self {
        self.formats = formats;
        self
    }

    /// Formats usable in a paired session
    pub fn pairing_formats(&self) -> impl Iterator<Item = &FormatDescriptor> {
        self.formats.iter().filter(|f| f.pairing_capable)
    }

    /// Whether any reported format supports HDR
    pub fn supports_hdr(&self) -> bool {
        self.formats.iter().any(|f| f.hdr)
    }

    /// Preferred format when the device runs alone: the largest one
    pub fn default_format(&self) -> Option<FormatDescriptor> {
        self.formats
            .iter()
            .copied()
            .max_by_key(|f| (f.resolution.pixels(), f.frame_rate))
    }
}

/// Shared, read-only handle to a catalog device
pub type DeviceRef = Arc<CaptureDevice>;

/// Hardware enumeration feed
pub trait DeviceFeed: Send + Sync {
    /// Current device list as reported by the platform
    fn enumerate(&self) -> Vec<CaptureDevice>;
}

/// Platform thermal level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermalState {
    Nominal,
    Fair,
    Serious,
    Critical,
}

impl ThermalState {
    pub fn is_nominal(&self) -> bool {
        *self == ThermalState::Nominal
    }

    pub fn is_elevated(&self) -> bool {
        !self.is_nominal()
    }
}

/// Coarse memory/CPU pressure indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourcePressure {
    Normal,
    Elevated,
    Critical,
}

/// Thermal state signal
pub trait ThermalMonitor: Send + Sync {
    fn thermal_state(&self) -> ThermalState;
}

/// Resource pressure signal
pub trait ResourceMonitor: Send + Sync {
    fn pressure(&self) -> ResourcePressure;
}
