//! Runtime-adjustable capture parameters and the discrete catalogs they range over.
//!
//! Everything here is pure state: nothing touches a device. Pushing the values
//! to hardware is the reconfiguration coordinator's job.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Config;

/// A capture resolution from the fixed catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionOption {
    pub width: u32,
    pub height: u32,
}

impl ResolutionOption {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for ResolutionOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Four-byte pixel/codec format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const MJPG: FourCc = FourCc(*b"MJPG");
    pub const YUYV: FourCc = FourCc(*b"YUYV");
    pub const RGB3: FourCc = FourCc(*b"RGB3");
    pub const BGR3: FourCc = FourCc(*b"BGR3");
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            let c = if b.is_ascii_graphic() { b as char } else { '?' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl From<FourCc> for v4l::FourCC {
    fn from(fourcc: FourCc) -> Self {
        v4l::FourCC::new(&fourcc.0)
    }
}

impl From<v4l::FourCC> for FourCc {
    fn from(fourcc: v4l::FourCC) -> Self {
        FourCc(fourcc.repr)
    }
}

/// Resolutions the user can cycle through, largest first.
pub const RESOLUTIONS: [ResolutionOption; 5] = [
    ResolutionOption::new(1920, 1080),
    ResolutionOption::new(1280, 720),
    ResolutionOption::new(854, 480),
    ResolutionOption::new(640, 360),
    ResolutionOption::new(426, 240),
];

/// Capture codecs the user can cycle through.
pub const CODECS: [FourCc; 2] = [FourCc::MJPG, FourCc::YUYV];

/// Target values for the capture device plus the processing toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceParameters {
    pub resolution_index: usize,
    pub codec_index: usize,
    pub exposure_target: i32,
    pub gain_target: i32,
    pub focus_target: i32,
    pub auto_exposure: bool,
    pub auto_focus: bool,
    pub processing_enabled: bool,
}

impl Default for DeviceParameters {
    fn default() -> Self {
        Self {
            resolution_index: 0,
            codec_index: 0,
            exposure_target: 0,
            gain_target: 0,
            focus_target: 0,
            auto_exposure: true,
            auto_focus: true,
            processing_enabled: false,
        }
    }
}

impl DeviceParameters {
    pub fn from_config(config: &Config) -> Self {
        let capture = &config.capture;
        Self {
            resolution_index: capture.resolution_index,
            codec_index: capture.codec_index,
            exposure_target: capture.exposure,
            gain_target: capture.gain,
            focus_target: capture.focus,
            auto_exposure: capture.auto_exposure,
            auto_focus: capture.auto_focus,
            processing_enabled: config.processing.enabled,
        }
    }

    pub fn resolution(&self) -> ResolutionOption {
        RESOLUTIONS[self.resolution_index % RESOLUTIONS.len()]
    }

    pub fn codec(&self) -> FourCc {
        CODECS[self.codec_index % CODECS.len()]
    }
}

/// Owner of the process-wide [`DeviceParameters`]
#[derive(Debug, Clone)]
pub struct ParameterStore {
    params: DeviceParameters,
}

impl ParameterStore {
    /// Indices wrap into the catalogs and negative targets clamp to zero.
    pub fn new(initial: DeviceParameters) -> Self {
        Self {
            params: DeviceParameters {
                resolution_index: initial.resolution_index % RESOLUTIONS.len(),
                codec_index: initial.codec_index % CODECS.len(),
                exposure_target: initial.exposure_target.max(0),
                gain_target: initial.gain_target.max(0),
                focus_target: initial.focus_target.max(0),
                ..initial
            },
        }
    }

    pub fn params(&self) -> &DeviceParameters {
        &self.params
    }

    pub fn resolution(&self) -> ResolutionOption {
        self.params.resolution()
    }

    pub fn codec(&self) -> FourCc {
        self.params.codec()
    }

    pub fn next_resolution(&mut self) -> usize {
        self.params.resolution_index = (self.params.resolution_index + 1) % RESOLUTIONS.len();
        self.params.resolution_index
    }

    pub fn next_codec(&mut self) -> usize {
        self.params.codec_index = (self.params.codec_index + 1) % CODECS.len();
        self.params.codec_index
    }

    pub fn adjust_exposure(&mut self, delta: i32) -> i32 {
        clamped_adjust(&mut self.params.exposure_target, delta)
    }

    pub fn adjust_gain(&mut self, delta: i32) -> i32 {
        clamped_adjust(&mut self.params.gain_target, delta)
    }

    pub fn adjust_focus(&mut self, delta: i32) -> i32 {
        clamped_adjust(&mut self.params.focus_target, delta)
    }

    pub fn toggle_processing(&mut self) -> bool {
        self.params.processing_enabled = !self.params.processing_enabled;
        self.params.processing_enabled
    }

    pub fn toggle_auto_exposure(&mut self) -> bool {
        self.params.auto_exposure = !self.params.auto_exposure;
        self.params.auto_exposure
    }

    pub fn toggle_auto_focus(&mut self) -> bool {
        self.params.auto_focus = !self.params.auto_focus;
        self.params.auto_focus
    }
}

fn clamped_adjust(target: &mut i32, delta: i32) -> i32 {
    *target = target.saturating_add(delta).max(0);
    *target
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_resolution_wraps() {
        let mut store = ParameterStore::new(DeviceParameters {
            resolution_index: RESOLUTIONS.len() - 1,
            ..Default::default()
        });
        assert_eq!(store.next_resolution(), 0);
        assert_eq!(store.resolution(), RESOLUTIONS[0]);
    }

    #[test]
    fn out_of_range_index_wraps_on_construction() {
        let store = ParameterStore::new(DeviceParameters {
            resolution_index: 7,
            codec_index: 3,
            ..Default::default()
        });
        assert_eq!(store.params().resolution_index, 2);
        assert_eq!(store.params().codec_index, 1);
    }

    #[test]
    fn negative_initial_targets_clamp() {
        let store = ParameterStore::new(DeviceParameters {
            exposure_target: -5,
            gain_target: -1,
            focus_target: 3,
            ..Default::default()
        });
        assert_eq!(store.params().exposure_target, 0);
        assert_eq!(store.params().gain_target, 0);
        assert_eq!(store.params().focus_target, 3);
    }

    #[test]
    fn adjust_does_not_overflow() {
        let mut store = ParameterStore::new(DeviceParameters {
            gain_target: i32::MAX - 1,
            ..Default::default()
        });
        assert_eq!(store.adjust_gain(10), i32::MAX);
        assert_eq!(store.adjust_gain(i32::MIN), 0);
    }

    #[test]
    fn fourcc_display() {
        assert_eq!(FourCc::MJPG.to_string(), "MJPG");
        assert_eq!(FourCc([b'A', 0, b'B', b'C']).to_string(), "A?BC");
    }
}
