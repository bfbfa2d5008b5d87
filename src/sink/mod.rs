pub mod loopback;

pub use loopback::V4l2Loopback;

use crate::capture::{Frame, PixelLayout};
use crate::params::ResolutionOption;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to open {path}: {reason}")]
    OpenFailed { path: String, reason: String },
    #[error("output format rejected: {0}")]
    FormatRejected(String),
    #[error("frame write failed: {0}")]
    WriteFailed(String),
}

/// Format the virtual output device is configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_layout: PixelLayout,
    pub byte_size: usize,
}

impl LoopbackFormat {
    pub fn new(resolution: ResolutionOption, pixel_layout: PixelLayout) -> Self {
        Self {
            width: resolution.width,
            height: resolution.height,
            pixel_layout,
            byte_size: pixel_layout.frame_size(resolution.width, resolution.height),
        }
    }

    pub fn resolution(&self) -> ResolutionOption {
        ResolutionOption::new(self.width, self.height)
    }

    pub fn bytes_per_line(&self) -> u32 {
        self.width * self.pixel_layout.bytes_per_pixel() as u32
    }

    /// True when `frame` can be written as-is.
    pub fn accepts(&self, frame: &Frame) -> bool {
        frame.width == self.width
            && frame.height == self.height
            && frame.layout == self.pixel_layout
            && frame.data.len() == self.byte_size
    }
}

/// Virtual output device the pipeline writes finished frames to.
///
/// Every error is fatal to the pipeline.
pub trait FrameSink {
    /// Query-then-set format exchange on the open handle.
    fn configure(&mut self, format: LoopbackFormat) -> Result<(), SinkError>;

    /// Close the handle, reopen it and configure again, so readers that
    /// only notice format changes across a producer reopen pick it up.
    fn reconfigure(&mut self, format: LoopbackFormat) -> Result<(), SinkError>;

    /// Emit one frame; anything short of `byte_size` bytes is a failure.
    fn write(&mut self, frame: &Frame) -> Result<(), SinkError>;

    /// Currently configured format, if any.
    fn format(&self) -> Option<LoopbackFormat>;

    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_byte_size() {
        let format = LoopbackFormat::new(ResolutionOption::new(640, 360), PixelLayout::Rgb24);
        assert_eq!(format.byte_size, 691_200);
        assert_eq!(format.bytes_per_line(), 1920);
    }

    #[test]
    fn accepts_only_matching_frames() {
        let format = LoopbackFormat::new(ResolutionOption::new(2, 2), PixelLayout::Rgb24);
        assert!(format.accepts(&Frame::new(2, 2, PixelLayout::Rgb24, vec![0; 12])));
        assert!(!format.accepts(&Frame::new(2, 2, PixelLayout::Bgr24, vec![0; 12])));
        assert!(!format.accepts(&Frame::new(2, 1, PixelLayout::Rgb24, vec![0; 6])));
    }
}
