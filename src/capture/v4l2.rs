//! V4L2 camera capture with runtime format and control changes

use std::io;

use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control, Value};
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use super::decoder;
use super::frame::{Frame, PixelLayout};
use super::{CaptureSource, DeviceError, DeviceReadback};
use crate::params::{DeviceParameters, FourCc, ResolutionOption};

// V4L2 control ids (linux/v4l2-controls.h)
const CID_GAIN: u32 = 0x0098_0913;
const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
const CID_FOCUS_ABSOLUTE: u32 = 0x009a_090a;
const CID_FOCUS_AUTO: u32 = 0x009a_090c;

// V4L2_CID_EXPOSURE_AUTO menu entries
const EXPOSURE_MANUAL: i64 = 1;
const EXPOSURE_APERTURE_PRIORITY: i64 = 3;

/// Frame rate requested on every apply; the driver clamps it to its ceiling.
const MAX_FPS_REQUEST: u32 = 1000;

/// V4L2 capture device
pub struct V4l2Capture {
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    path: String,
    buffer_count: u32,
    /// Last (resolution, codec) pushed to the driver, before any rounding
    requested: Option<(ResolutionOption, FourCc)>,
    resolution: ResolutionOption,
    fourcc: FourCc,
    fps: f64,
}

impl V4l2Capture {
    /// Open a capture node. Nothing streams until the first [`CaptureSource::apply`].
    #[instrument]
    pub fn open(path: &str, buffer_count: u32) -> Result<Self, DeviceError> {
        info!("Opening capture device");

        let device = Device::with_path(path).map_err(|e| open_failed(path, e))?;

        let caps = device.query_caps().map_err(|e| open_failed(path, e))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(DeviceError::OpenFailed {
                path: path.to_string(),
                reason: "device doesn't support video capture".into(),
            });
        }

        let fmt = device.format().map_err(|e| open_failed(path, e))?;
        let fps = device.params().map(|p| fps_of(&p)).unwrap_or(0.0);

        Ok(Self {
            device: Box::new(device),
            stream: None,
            path: path.to_string(),
            buffer_count: buffer_count.max(1),
            requested: None,
            resolution: ResolutionOption::new(fmt.width, fmt.height),
            fourcc: fmt.fourcc.into(),
            fps,
        })
    }

    /// Stop streaming, push the format, request max fps and restart.
    fn apply_format(
        &mut self,
        resolution: ResolutionOption,
        codec: FourCc,
    ) -> Result<(), DeviceError> {
        // S_FMT is refused while buffers are mapped.
        self.stream = None;

        let mut fmt = self.device.format().map_err(configure_failed)?;
        fmt.width = resolution.width;
        fmt.height = resolution.height;
        fmt.fourcc = codec.into();

        let actual = self.device.set_format(&fmt).map_err(configure_failed)?;
        let actual_resolution = ResolutionOption::new(actual.width, actual.height);
        let actual_fourcc = FourCc::from(actual.fourcc);

        if actual_resolution != resolution || actual_fourcc != codec {
            warn!(
                requested = %format!("{resolution} {codec}"),
                applied = %format!("{actual_resolution} {actual_fourcc}"),
                "Device adjusted requested format"
            );
        }
        if !decoder::is_supported(actual_fourcc) {
            return Err(DeviceError::UnsupportedFormat(actual_fourcc));
        }

        self.requested = Some((resolution, codec));
        self.resolution = actual_resolution;
        self.fourcc = actual_fourcc;

        self.request_max_fps();
        self.start_stream()
    }

    fn request_max_fps(&mut self) {
        match self
            .device
            .set_params(&Parameters::with_fps(MAX_FPS_REQUEST))
        {
            Ok(params) => self.fps = fps_of(&params),
            Err(e) => debug!("Frame rate request ignored: {}", e),
        }
    }

    fn start_stream(&mut self) -> Result<(), DeviceError> {
        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count)
            .map_err(configure_failed)?;

        self.stream = Some(stream);
        info!("Capture stream started with {} buffers", self.buffer_count);
        Ok(())
    }

    fn apply_controls(&self, params: &DeviceParameters) {
        let exposure_mode = if params.auto_exposure {
            EXPOSURE_APERTURE_PRIORITY
        } else {
            EXPOSURE_MANUAL
        };
        self.set_control("exposure_auto", CID_EXPOSURE_AUTO, Value::Integer(exposure_mode));
        if !params.auto_exposure {
            self.set_control(
                "exposure_absolute",
                CID_EXPOSURE_ABSOLUTE,
                Value::Integer(params.exposure_target.max(0) as i64),
            );
        }

        self.set_control("gain", CID_GAIN, Value::Integer(params.gain_target.max(0) as i64));

        self.set_control("focus_auto", CID_FOCUS_AUTO, Value::Boolean(params.auto_focus));
        if !params.auto_focus {
            self.set_control(
                "focus_absolute",
                CID_FOCUS_ABSOLUTE,
                Value::Integer(params.focus_target.max(0) as i64),
            );
        }
    }

    /// Hardware may not expose a control at all; that is not an error.
    fn set_control(&self, name: &str, id: u32, value: Value) {
        if let Err(e) = self.device.set_control(Control { id, value }) {
            debug!(control = name, "Control not applied: {}", e);
        }
    }

    fn read_control(&self, id: u32) -> Option<i64> {
        match self.device.control(id).ok()?.value {
            Value::Integer(v) => Some(v),
            Value::Boolean(b) => Some(b as i64),
            _ => None,
        }
    }
}

impl CaptureSource for V4l2Capture {
    #[instrument(skip(self, params), fields(path = %self.path))]
    fn apply(&mut self, params: &DeviceParameters) -> Result<(), DeviceError> {
        let resolution = params.resolution();
        let codec = params.codec();

        if self.stream.is_none() || self.requested != Some((resolution, codec)) {
            self.apply_format(resolution, codec)?;
        } else {
            self.request_max_fps();
        }
        self.apply_controls(params);

        debug!(status = %self.readback(), "Capture parameters applied");
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, DeviceError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DeviceError::EndOfStream("stream not started".into()))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| DeviceError::EndOfStream(e.to_string()))?;

        let used = (meta.bytesused as usize).min(buf.len());
        let data = decoder::decode_frame(
            &buf[..used],
            self.fourcc,
            self.resolution.width,
            self.resolution.height,
        )
        .map_err(|e| DeviceError::EndOfStream(format!("invalid frame: {e}")))?;

        Ok(Frame::new(
            self.resolution.width,
            self.resolution.height,
            PixelLayout::Bgr24,
            data,
        ))
    }

    fn current_resolution(&self) -> ResolutionOption {
        self.resolution
    }

    fn current_fourcc(&self) -> FourCc {
        self.fourcc
    }

    fn readback(&self) -> DeviceReadback {
        let auto_exposure = self
            .read_control(CID_EXPOSURE_AUTO)
            .map(|mode| mode != EXPOSURE_MANUAL);
        DeviceReadback {
            resolution: self.resolution,
            fourcc: self.fourcc,
            fps: self.fps,
            exposure: self.read_control(CID_EXPOSURE_ABSOLUTE),
            gain: self.read_control(CID_GAIN),
            focus: self.read_control(CID_FOCUS_ABSOLUTE),
            auto_exposure,
            auto_focus: self.read_control(CID_FOCUS_AUTO).map(|v| v != 0),
        }
    }
}

fn fps_of(params: &Parameters) -> f64 {
    if params.interval.numerator == 0 {
        return 0.0;
    }
    params.interval.denominator as f64 / params.interval.numerator as f64
}

fn open_failed(path: &str, e: io::Error) -> DeviceError {
    DeviceError::OpenFailed {
        path: path.to_string(),
        reason: e.to_string(),
    }
}

fn configure_failed(e: io::Error) -> DeviceError {
    DeviceError::ConfigureFailed(e.to_string())
}
