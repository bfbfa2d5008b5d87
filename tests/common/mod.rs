//! Scripted devices shared by the integration tests
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use edgecam::capture::DeviceReadback;
use edgecam::input::{Command, CommandSource};
use edgecam::{
    CaptureSource, DeviceError, DeviceParameters, FourCc, Frame, FrameSink, LoopbackFormat,
    PixelLayout, ResolutionOption, SinkError,
};

/// Everything the fake devices saw, in call order
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Apply {
        requested: ResolutionOption,
        codec: FourCc,
        exposure: i32,
    },
    Read,
    Configure(LoopbackFormat),
    Reconfigure(LoopbackFormat),
    Write {
        resolution: ResolutionOption,
        layout: PixelLayout,
        len: usize,
    },
    Close,
}

pub type Log = Rc<RefCell<Vec<Event>>>;

pub fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

pub fn count(log: &Log, pred: impl Fn(&Event) -> bool) -> usize {
    log.borrow().iter().filter(|e| pred(e)).count()
}

/// Camera that delivers a fixed number of frames, then end-of-stream.
pub struct ScriptedCapture {
    log: Log,
    frames_left: usize,
    max_resolution: Option<ResolutionOption>,
    resolution: ResolutionOption,
    fourcc: FourCc,
}

impl ScriptedCapture {
    pub fn new(log: &Log, frames: usize) -> Self {
        Self {
            log: log.clone(),
            frames_left: frames,
            max_resolution: None,
            resolution: ResolutionOption::new(0, 0),
            fourcc: FourCc::MJPG,
        }
    }

    /// Hardware that cannot go above `max` and falls back to it.
    pub fn with_max_resolution(mut self, max: ResolutionOption) -> Self {
        self.max_resolution = Some(max);
        self
    }
}

impl CaptureSource for ScriptedCapture {
    fn apply(&mut self, params: &DeviceParameters) -> Result<(), DeviceError> {
        let requested = params.resolution();
        self.log.borrow_mut().push(Event::Apply {
            requested,
            codec: params.codec(),
            exposure: params.exposure_target,
        });

        self.resolution = match self.max_resolution {
            Some(max) if requested.pixels() > max.pixels() => max,
            _ => requested,
        };
        self.fourcc = params.codec();
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, DeviceError> {
        self.log.borrow_mut().push(Event::Read);
        if self.frames_left == 0 {
            return Err(DeviceError::EndOfStream("script exhausted".into()));
        }
        self.frames_left -= 1;

        let ResolutionOption { width, height } = self.resolution;
        let data = (0..height)
            .flat_map(|_| (0..width).flat_map(|x| if x < width / 2 { [10, 20, 30] } else { [200, 210, 220] }))
            .collect();
        Ok(Frame::new(width, height, PixelLayout::Bgr24, data))
    }

    fn current_resolution(&self) -> ResolutionOption {
        self.resolution
    }

    fn current_fourcc(&self) -> FourCc {
        self.fourcc
    }

    fn readback(&self) -> DeviceReadback {
        DeviceReadback {
            resolution: self.resolution,
            fourcc: self.fourcc,
            fps: 30.0,
            exposure: None,
            gain: None,
            focus: None,
            auto_exposure: None,
            auto_focus: None,
        }
    }
}

/// Loopback that records calls and rejects frames not matching its format.
pub struct RecordingSink {
    log: Log,
    format: Option<LoopbackFormat>,
    writes: usize,
    fail_write_at: Option<usize>,
    formats_accepted: usize,
    accept_formats: Option<usize>,
}

impl RecordingSink {
    pub fn new(log: &Log) -> Self {
        Self {
            log: log.clone(),
            format: None,
            writes: 0,
            fail_write_at: None,
            formats_accepted: 0,
            accept_formats: None,
        }
    }

    /// Fail the write call with this zero-based index.
    pub fn fail_write_at(mut self, index: usize) -> Self {
        self.fail_write_at = Some(index);
        self
    }

    /// Accept this many configure/reconfigure calls, reject the rest.
    pub fn reject_formats_after(mut self, accepted: usize) -> Self {
        self.accept_formats = Some(accepted);
        self
    }

    fn set_format(&mut self, format: LoopbackFormat) -> Result<(), SinkError> {
        if self.accept_formats.is_some_and(|n| self.formats_accepted >= n) {
            self.format = None;
            return Err(SinkError::FormatRejected(format!(
                "{}x{} refused",
                format.width, format.height
            )));
        }
        self.formats_accepted += 1;
        self.format = Some(format);
        Ok(())
    }
}

impl FrameSink for RecordingSink {
    fn configure(&mut self, format: LoopbackFormat) -> Result<(), SinkError> {
        self.log.borrow_mut().push(Event::Configure(format));
        self.set_format(format)
    }

    fn reconfigure(&mut self, format: LoopbackFormat) -> Result<(), SinkError> {
        self.log.borrow_mut().push(Event::Reconfigure(format));
        self.set_format(format)
    }

    fn write(&mut self, frame: &Frame) -> Result<(), SinkError> {
        let index = self.writes;
        self.writes += 1;
        if self.fail_write_at == Some(index) {
            return Err(SinkError::WriteFailed("injected".into()));
        }

        let format = self
            .format
            .ok_or_else(|| SinkError::WriteFailed("not configured".into()))?;
        if !format.accepts(frame) {
            return Err(SinkError::FormatRejected(format!(
                "{}x{} {:?} ({} bytes)",
                frame.width,
                frame.height,
                frame.layout,
                frame.data.len()
            )));
        }
        self.log.borrow_mut().push(Event::Write {
            resolution: frame.resolution(),
            layout: frame.layout,
            len: frame.data.len(),
        });
        Ok(())
    }

    fn format(&self) -> Option<LoopbackFormat> {
        self.format
    }

    fn close(&mut self) {
        self.log.borrow_mut().push(Event::Close);
        self.format = None;
    }
}

/// Commands keyed by the cycle whose poll returns them
#[derive(Default)]
pub struct ScriptedCommands {
    cycle: usize,
    script: HashMap<usize, Command>,
}

impl ScriptedCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, cycle: usize, command: Command) -> Self {
        self.script.insert(cycle, command);
        self
    }
}

impl CommandSource for ScriptedCommands {
    fn poll(&mut self, _timeout: Duration) -> Option<Command> {
        let command = self.script.remove(&self.cycle);
        self.cycle += 1;
        command
    }
}
