pub mod decoder;
pub mod frame;
pub mod v4l2;

use std::fmt;

pub use frame::Frame;
pub use frame::PixelLayout;
pub use v4l2::V4l2Capture;

use crate::params::{DeviceParameters, FourCc, ResolutionOption};

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to open {path}: {reason}")]
    OpenFailed { path: String, reason: String },
    #[error("capture stream ended: {0}")]
    EndOfStream(String),
    #[error("unsupported capture format {0}")]
    UnsupportedFormat(FourCc),
    #[error("failed to configure capture device: {0}")]
    ConfigureFailed(String),
}

/// A camera the pipeline can drive.
///
/// `apply` is best-effort: hardware may round or ignore values, so callers
/// read the accessors afterwards instead of trusting the request.
pub trait CaptureSource {
    /// Push resolution, codec, controls and the maximum frame rate to hardware.
    fn apply(&mut self, params: &DeviceParameters) -> Result<(), DeviceError>;

    /// Next decoded frame. Any empty or undecodable buffer is
    /// [`DeviceError::EndOfStream`].
    fn read_frame(&mut self) -> Result<Frame, DeviceError>;

    /// Resolution the device actually runs at.
    fn current_resolution(&self) -> ResolutionOption;

    /// Format the device actually delivers.
    fn current_fourcc(&self) -> FourCc;

    /// Values read back from the device for status reporting.
    fn readback(&self) -> DeviceReadback;
}

/// Applied device state as reported by the hardware
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReadback {
    pub resolution: ResolutionOption,
    pub fourcc: FourCc,
    pub fps: f64,
    pub exposure: Option<i64>,
    pub gain: Option<i64>,
    pub focus: Option<i64>,
    pub auto_exposure: Option<bool>,
    pub auto_focus: Option<bool>,
}

impl fmt::Display for DeviceReadback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {:.1} fps",
            self.resolution, self.fourcc, self.fps
        )?;
        write_control(f, "exposure", self.exposure, self.auto_exposure)?;
        write_control(f, "gain", self.gain, None)?;
        write_control(f, "focus", self.focus, self.auto_focus)
    }
}

fn write_control(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    value: Option<i64>,
    auto: Option<bool>,
) -> fmt::Result {
    match (value, auto) {
        (_, Some(true)) => write!(f, " | {name}: auto"),
        (Some(v), _) => write!(f, " | {name}: {v}"),
        (None, _) => write!(f, " | {name}: n/a"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readback_status_line() {
        let readback = DeviceReadback {
            resolution: ResolutionOption::new(640, 360),
            fourcc: FourCc::MJPG,
            fps: 30.0,
            exposure: Some(150),
            gain: None,
            focus: Some(10),
            auto_exposure: Some(false),
            auto_focus: Some(true),
        };
        assert_eq!(
            readback.to_string(),
            "640x360 MJPG @ 30.0 fps | exposure: 150 | gain: n/a | focus: auto"
        );
    }
}
