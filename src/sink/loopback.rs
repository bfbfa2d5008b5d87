//! V4L2 loopback output
//!
//! Requires the `v4l2loopback` kernel module:
//!
//! ```bash
//! sudo modprobe v4l2loopback devices=1 video_nr=10 card_label="edgecam" exclusive_caps=1
//! ```

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};
use v4l::capability::Flags as CapFlags;
use v4l::format::FieldOrder;
use v4l::video::Output;
use v4l::Device;

use super::{FrameSink, LoopbackFormat, SinkError};
use crate::capture::Frame;
use crate::params::FourCc;

/// Open producer-side handles
struct Handle {
    /// Format ioctls
    control: Device,
    /// Raw frame writes
    file: File,
}

/// Producer end of a v4l2loopback node
pub struct V4l2Loopback {
    path: PathBuf,
    handle: Option<Handle>,
    format: Option<LoopbackFormat>,
    frames_written: u64,
}

impl V4l2Loopback {
    /// Open the node for writing. No format is set until [`FrameSink::configure`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let handle = open_handle(&path)?;
        info!(path = %path.display(), "Loopback device opened");

        Ok(Self {
            path,
            handle: Some(handle),
            format: None,
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

fn open_handle(path: &Path) -> Result<Handle, SinkError> {
    let open_failed = |reason: String| SinkError::OpenFailed {
        path: path.display().to_string(),
        reason,
    };

    if !path.exists() {
        return Err(open_failed("device not found".into()));
    }

    let file = OpenOptions::new().write(true).open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            open_failed("permission denied, try adding user to the 'video' group".into())
        } else {
            open_failed(e.to_string())
        }
    })?;

    let control = Device::with_path(path).map_err(|e| open_failed(e.to_string()))?;
    match control.query_caps() {
        Ok(caps) if !caps.capabilities.contains(CapFlags::VIDEO_OUTPUT) => {
            warn!(driver = %caps.driver, "Device does not advertise video output");
        }
        Ok(caps) => debug!("Loopback: {} ({})", caps.card, caps.driver),
        Err(e) => return Err(open_failed(e.to_string())),
    }

    Ok(Handle { control, file })
}

impl FrameSink for V4l2Loopback {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn configure(&mut self, format: LoopbackFormat) -> Result<(), SinkError> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| SinkError::FormatRejected("device is not open".into()))?;

        let rejected = |e: io::Error| SinkError::FormatRejected(e.to_string());
        let fourcc = format.pixel_layout.fourcc();

        let mut fmt = handle.control.format().map_err(rejected)?;
        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = fourcc.into();
        fmt.field_order = FieldOrder::Progressive;
        fmt.stride = format.bytes_per_line();
        fmt.size = format.byte_size as u32;

        let actual = handle.control.set_format(&fmt).map_err(rejected)?;
        if actual.width != format.width
            || actual.height != format.height
            || FourCc::from(actual.fourcc) != fourcc
        {
            return Err(SinkError::FormatRejected(format!(
                "requested {}x{} {}, device set {}x{} {}",
                format.width,
                format.height,
                fourcc,
                actual.width,
                actual.height,
                FourCc::from(actual.fourcc)
            )));
        }

        info!(
            width = format.width,
            height = format.height,
            fourcc = %fourcc,
            bytes = format.byte_size,
            "Loopback format set"
        );
        self.format = Some(format);
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn reconfigure(&mut self, format: LoopbackFormat) -> Result<(), SinkError> {
        self.close();
        self.handle = Some(open_handle(&self.path)?);
        debug!("Loopback device reopened");
        self.configure(format)
    }

    fn write(&mut self, frame: &Frame) -> Result<(), SinkError> {
        let (Some(handle), Some(format)) = (self.handle.as_ref(), self.format) else {
            return Err(SinkError::WriteFailed("device is not configured".into()));
        };

        if !format.accepts(frame) {
            return Err(SinkError::WriteFailed(format!(
                "frame {}x{} {:?} ({} bytes) does not match output {}x{} {:?} ({} bytes)",
                frame.width,
                frame.height,
                frame.layout,
                frame.data.len(),
                format.width,
                format.height,
                format.pixel_layout,
                format.byte_size
            )));
        }

        // One write per frame; a partial frame is not retried.
        let written = nix::unistd::write(&handle.file, &frame.data)
            .map_err(|e| SinkError::WriteFailed(e.to_string()))?;
        if written < format.byte_size {
            return Err(SinkError::WriteFailed(format!(
                "short write: {written} of {} bytes",
                format.byte_size
            )));
        }

        self.frames_written += 1;
        Ok(())
    }

    fn format(&self) -> Option<LoopbackFormat> {
        self.format
    }

    fn close(&mut self) {
        if self.handle.take().is_some() {
            info!(
                path = %self.path.display(),
                "Closing loopback device (wrote {} frames)", self.frames_written
            );
        }
        self.format = None;
    }
}

impl Drop for V4l2Loopback {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_fails_to_open() {
        let err = V4l2Loopback::open("/dev/edgecam-does-not-exist").err().unwrap();
        assert!(matches!(err, SinkError::OpenFailed { .. }));
        assert!(err.to_string().contains("device not found"));
    }

    #[test]
    fn regular_file_is_not_a_loopback_device() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            V4l2Loopback::open(file.path()),
            Err(SinkError::OpenFailed { .. })
        ));
    }
}
