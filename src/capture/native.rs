//! Native camera enumeration using nokhwa
//!
//! Only discovery is covered here. nokhwa reports neither position nor
//! pairing support, so position is inferred from the device name and no
//! native device is treated as pairing-capable.

use crate::capture::traits::{
    CaptureDevice, DeviceFeed, DevicePosition, DeviceType, FormatDescriptor,
};
use nokhwa::utils::{ApiBackend, CameraIndex};

/// Enumerates the cameras the OS exposes
#[derive(Debug, Default)]
pub struct NativeDeviceFeed;

impl NativeDeviceFeed {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceFeed for NativeDeviceFeed {
    fn enumerate(&self) -> Vec<CaptureDevice> {
        match nokhwa::query(ApiBackend::Auto) {
            Ok(cameras) => cameras
                .into_iter()
                .map(|info| {
                    let id = match info.index() {
                        CameraIndex::Index(i) => i.to_string(),
                        CameraIndex::String(s) => s.to_string(),
                    };
                    let name = info.human_name().to_string();
                    let position = infer_position(&name);
                    let device_type = match position {
                        DevicePosition::External => DeviceType::External,
                        _ => DeviceType::WideAngle,
                    };

                    // Common resolutions
                    let formats = vec![
                        FormatDescriptor::new(1920, 1080, 30),
                        FormatDescriptor::new(1280, 720, 30),
                        FormatDescriptor::new(640, 480, 30),
                    ];

                    CaptureDevice::new(id, name, position, device_type).with_formats(formats)
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to enumerate cameras: {:?}", e);
                Vec::new()
            }
        }
    }
}

fn infer_position(name: &str) -> DevicePosition {
    let name = name.to_lowercase();
    if name.contains("front") || name.contains("facetime") || name.contains("integrated") {
        DevicePosition::Front
    } else if name.contains("back") || name.contains("rear") {
        DevicePosition::Back
    } else {
        DevicePosition::External
    }
}
