use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device};

use crate::capture::DeviceError;
use crate::params::{FourCc, CODECS};

const LOOPBACK_DRIVER: &str = "v4l2 loopback";
const MAX_VIDEO_NODES: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Camera,
    Loopback,
}

// Detected V4L2 node info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub card: String,
    pub driver: String,
    pub kind: DeviceKind,
    /// Catalog codecs the node can deliver
    pub codecs: Vec<FourCc>,
}

/// Every `/dev/videoN` node that is either a camera or a loopback device
pub fn list_devices() -> Vec<FoundDevice> {
    (0..MAX_VIDEO_NODES)
        .map(|i| format!("/dev/video{}", i))
        .filter(|path| Path::new(path).exists())
        .filter_map(|path| probe(&path))
        .collect()
}

fn probe(path: &str) -> Option<FoundDevice> {
    let dev = Device::with_path(path).ok()?;
    let caps = dev.query_caps().ok()?;
    let driver = caps.driver.to_string();

    let kind = if driver.contains(LOOPBACK_DRIVER) {
        DeviceKind::Loopback
    } else if caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        DeviceKind::Camera
    } else {
        debug!("Skipping {} ({}): no capture capability", path, driver);
        return None;
    };

    let codecs = dev
        .enum_formats()
        .map(|formats| {
            formats
                .into_iter()
                .map(|f| FourCc::from(f.fourcc))
                .filter(|fourcc| CODECS.contains(fourcc))
                .collect()
        })
        .unwrap_or_default();

    Some(FoundDevice {
        path: path.to_string(),
        card: caps.card,
        driver,
        kind,
        codecs,
    })
}

/// Auto-detect best capture device
pub fn auto_detect_device() -> Result<FoundDevice, DeviceError> {
    info!("Auto-detecting capture devices...");

    list_devices()
        .into_iter()
        .find(|d| d.kind == DeviceKind::Camera && !d.codecs.is_empty())
        .inspect(|d| info!("Found camera: {} - {}", d.path, d.card))
        .ok_or_else(|| DeviceError::OpenFailed {
            path: "/dev/video*".into(),
            reason: "no suitable capture device found".into(),
        })
}

/// v4l2loopback nodes, lowest number first
pub fn find_loopback_devices() -> Vec<FoundDevice> {
    list_devices()
        .into_iter()
        .filter(|d| d.kind == DeviceKind::Loopback)
        .collect()
}
