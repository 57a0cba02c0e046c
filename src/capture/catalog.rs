//! Device catalog
//!
//! Enumerates capture devices from the platform feed, deduplicates them and
//! ranks them for a requested use case. Every query is a pure function of
//! the last enumeration snapshot.

use super::traits::{CaptureDevice, DeviceFeed, DevicePosition, DeviceRef, DeviceType};
use crate::config::HardwareEnvironment;
use crate::utils::error::{CaptureError, MediaKind};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

/// Restricts a device listing to one position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionFilter {
    Any,
    Only(DevicePosition),
}

impl PositionFilter {
    fn accepts(&self, device: &CaptureDevice) -> bool {
        match self {
            PositionFilter::Any => true,
            PositionFilter::Only(position) => device.position == *position,
        }
    }
}

/// What the caller wants a device for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseCase {
    /// Best available back camera
    BestBack,
    /// Front camera
    Front,
    /// Externally connected camera
    External,
}

/// Discovery queries, run in this order when building the catalog
#[derive(Debug, Clone, Copy)]
enum Probe {
    Back,
    Front,
    External,
    UltraWide,
    Telephoto,
    Triple,
}

const PROBE_ORDER: [Probe; 6] = [
    Probe::Back,
    Probe::Front,
    Probe::External,
    Probe::UltraWide,
    Probe::Telephoto,
    Probe::Triple,
];

impl Probe {
    fn matches(&self, device: &CaptureDevice) -> bool {
        match self {
            Probe::Back => {
                device.position == DevicePosition::Back
                    && device.device_type == DeviceType::WideAngle
            }
            Probe::Front => device.position == DevicePosition::Front,
            Probe::External => device.position == DevicePosition::External,
            Probe::UltraWide => device.device_type == DeviceType::UltraWide,
            Probe::Telephoto => device.device_type == DeviceType::Telephoto,
            Probe::Triple => matches!(device.device_type, DeviceType::Triple | DeviceType::DualWide),
        }
    }
}

/// Ranked view over the available capture hardware
pub struct DeviceCatalog {
    feed: Arc<dyn DeviceFeed>,
    environment: HardwareEnvironment,
    snapshot: RwLock<Vec<DeviceRef>>,
}

impl DeviceCatalog {
    /// Create a catalog and take the first enumeration snapshot
    pub fn new(feed: Arc<dyn DeviceFeed>, environment: HardwareEnvironment) -> Self {
        let catalog = Self {
            feed,
            environment,
            snapshot: RwLock::new(Vec::new()),
        };
        catalog.refresh();
        catalog
    }

    /// Re-enumerate the hardware. Returns the number of distinct devices.
    pub fn refresh(&self) -> usize {
        let enumerated = self.feed.enumerate();
        let devices = dedupe_in_probe_order(enumerated);

        if devices.is_empty() {
            match self.environment {
                HardwareEnvironment::Physical => {
                    tracing::error!("Hardware enumeration returned no capture devices")
                }
                HardwareEnvironment::Virtualized => {
                    tracing::debug!("No capture devices in virtualized environment")
                }
            }
        } else {
            tracing::info!("Catalog refreshed: {} capture device(s)", devices.len());
        }

        let count = devices.len();
        *self.snapshot.write() = devices;
        count
    }

    /// Every distinct device, in probing order
    pub fn all_devices(&self) -> Vec<DeviceRef> {
        self.snapshot.read().clone()
    }

    /// Devices matching a position filter, in probing order
    pub fn devices(&self, filter: PositionFilter) -> Vec<DeviceRef> {
        self.snapshot
            .read()
            .iter()
            .filter(|d| filter.accepts(d))
            .cloned()
            .collect()
    }

    /// Like `all_devices`, but an empty catalog is an error
    pub fn require_devices(&self) -> Result<Vec<DeviceRef>, CaptureError> {
        let devices = self.all_devices();
        if devices.is_empty() {
            return Err(CaptureError::DeviceUnavailable {
                media: MediaKind::Video,
            });
        }
        Ok(devices)
    }

    /// Look a device up by ID
    pub fn find(&self, id: &str) -> Option<DeviceRef> {
        self.snapshot.read().iter().find(|d| d.id == id).cloned()
    }

    /// Pick the device for a use case, following a fixed fallback chain
    pub fn best_device(&self, use_case: UseCase) -> Option<DeviceRef> {
        let devices = self.snapshot.read();
        match use_case {
            UseCase::BestBack => best_back(&devices, false),
            UseCase::Front => devices
                .iter()
                .find(|d| d.position == DevicePosition::Front)
                .cloned(),
            UseCase::External => devices
                .iter()
                .find(|d| d.position == DevicePosition::External)
                .cloned(),
        }
    }

    /// Primary (back) and secondary (front) devices for a paired session.
    /// Both must support pairing.
    pub fn best_pair(&self) -> Option<(DeviceRef, DeviceRef)> {
        let devices = self.snapshot.read();
        let primary = best_back(&devices, true)?;
        let secondary = devices
            .iter()
            .find(|d| d.position == DevicePosition::Front && d.supports_pairing)
            .cloned()?;
        Some((primary, secondary))
    }

    /// Number of devices able to take part in a paired session
    pub fn pairing_capable_count(&self) -> usize {
        self.snapshot
            .read()
            .iter()
            .filter(|d| d.supports_pairing)
            .count()
    }
}

/// Rank in the back-camera fallback chain: pairing-capable triple, plain
/// wide, ultra-wide, telephoto.
fn back_rank(device: &CaptureDevice) -> Option<u8> {
    match device.device_type {
        DeviceType::Triple if device.supports_pairing => Some(0),
        DeviceType::WideAngle => Some(1),
        DeviceType::UltraWide => Some(2),
        DeviceType::Telephoto => Some(3),
        _ => None,
    }
}

/// First present device in the fallback chain wins
fn best_back(devices: &[DeviceRef], require_pairing: bool) -> Option<DeviceRef> {
    devices
        .iter()
        .filter(|d| d.position == DevicePosition::Back)
        .filter(|d| !require_pairing || d.supports_pairing)
        .filter_map(|d| back_rank(d).map(|rank| (rank, d)))
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, d)| d.clone())
}

fn dedupe_in_probe_order(enumerated: Vec<CaptureDevice>) -> Vec<DeviceRef> {
    let mut seen = HashSet::new();
    let mut devices = Vec::new();

    for probe in PROBE_ORDER {
        for device in enumerated.iter().filter(|d| probe.matches(d)) {
            if seen.insert(device.id.clone()) {
                devices.push(Arc::new(device.clone()));
            }
        }
    }

    devices
}
