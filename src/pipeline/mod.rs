//! Capture → process → loopback loop
//!
//! Everything runs on the calling thread. The only suspension point besides
//! device I/O is the short command poll at the end of each cycle.

pub mod coordinator;
pub mod report;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info};

pub use coordinator::{Change, CoordinatorState, ReconfigurationCoordinator};
pub use report::{PerformanceReport, PerformanceWindow};

use crate::capture::{CaptureSource, DeviceError, PixelLayout};
use crate::input::{Command, CommandSource};
use crate::params::ParameterStore;
use crate::processing::{ProcessingError, Processor};
use crate::sink::{FrameSink, SinkError};
use crate::PipelineConfig;

/// Layout the loopback device is fed.
pub const SINK_LAYOUT: PixelLayout = PixelLayout::Rgb24;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Processing(#[from] ProcessingError),
}

/// Why the loop ended
#[derive(Debug)]
pub enum StopReason {
    Quit,
    /// Ctrl-C
    Interrupted,
    EndOfStream(DeviceError),
    Fatal(PipelineError),
}

#[derive(Debug)]
pub struct RunSummary {
    pub frames_captured: u64,
    pub reports_emitted: u64,
    /// Frames in the last, unreported window
    pub partial_window_frames: u64,
    pub stop: StopReason,
}

impl RunSummary {
    /// 0 when at least one frame was captured, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.frames_captured > 0 {
            0
        } else {
            1
        }
    }
}

pub struct PipelineLoop<C, S, I> {
    capture: C,
    sink: S,
    commands: I,
    processor: Processor,
    store: ParameterStore,
    coordinator: ReconfigurationCoordinator,
    window: PerformanceWindow,
    settings: PipelineConfig,
    shutdown: Option<Arc<AtomicBool>>,
    started: bool,
    /// Frames read from the device, whether or not they reached the sink
    frames_captured: u64,
    reports_emitted: u64,
}

impl<C, S, I> PipelineLoop<C, S, I>
where
    C: CaptureSource,
    S: FrameSink,
    I: CommandSource,
{
    pub fn new(
        capture: C,
        sink: S,
        commands: I,
        processor: Processor,
        store: ParameterStore,
        settings: PipelineConfig,
    ) -> Self {
        Self {
            capture,
            sink,
            commands,
            processor,
            store,
            coordinator: ReconfigurationCoordinator::new(SINK_LAYOUT),
            window: PerformanceWindow::new(settings.report_interval),
            settings,
            shutdown: None,
            started: false,
            frames_captured: 0,
            reports_emitted: 0,
        }
    }

    /// Stop at the top of the next cycle once `flag` is set.
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    pub fn coordinator(&self) -> &ReconfigurationCoordinator {
        &self.coordinator
    }

    /// Apply the initial parameters and configure the output. Called by
    /// [`PipelineLoop::run`] when not done already.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        self.coordinator
            .start(&mut self.capture, &mut self.sink, self.store.params())?;
        info!(
            stage = ?self.processor.stage(self.store.params().processing_enabled),
            "Start grabbing..."
        );
        self.started = true;
        Ok(())
    }

    pub fn run(mut self) -> RunSummary {
        let stop = if !self.started {
            match self.start() {
                Ok(()) => self.run_cycles(),
                Err(e) => StopReason::Fatal(e),
            }
        } else {
            self.run_cycles()
        };

        match &stop {
            StopReason::Fatal(e) => {
                error!(state = ?self.coordinator.state(), "Pipeline stopped: {}", e)
            }
            StopReason::EndOfStream(e) => error!("Can't grab camera frame: {}", e),
            StopReason::Quit | StopReason::Interrupted => debug!("Pipeline stopped: {:?}", stop),
        }
        self.sink.close();

        info!("Number of captured frames: {}", self.frames_captured);

        RunSummary {
            frames_captured: self.frames_captured,
            reports_emitted: self.reports_emitted,
            partial_window_frames: self.window.window_frames(),
            stop,
        }
    }

    fn run_cycles(&mut self) -> StopReason {
        loop {
            if let Err(e) = self.coordinator.apply_pending(
                &mut self.capture,
                &mut self.sink,
                self.store.params(),
            ) {
                return StopReason::Fatal(e);
            }

            if self
                .shutdown
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::SeqCst))
            {
                return StopReason::Interrupted;
            }

            if let Err(stop) = self.cycle() {
                return stop;
            }

            if let Some(command) = self.commands.poll(self.settings.poll_timeout()) {
                if !self.dispatch(command) {
                    return StopReason::Quit;
                }
            }
        }
    }

    /// acquire → process → convert → write → report
    fn cycle(&mut self) -> Result<(), StopReason> {
        debug_assert!(self.coordinator.is_idle());

        let frame = self
            .capture
            .read_frame()
            .map_err(StopReason::EndOfStream)?;
        self.frames_captured += 1;
        metrics::counter!("frames_captured").increment(1);

        let enabled = self.store.params().processing_enabled;
        let processed = self
            .processor
            .process(frame, enabled)
            .map_err(|e| StopReason::Fatal(e.into()))?;

        let output = processed.frame.into_layout(self.coordinator.sink_layout());
        self.sink
            .write(&output)
            .map_err(|e| StopReason::Fatal(e.into()))?;

        if let Some(report) = self.window.record(processed.elapsed) {
            info!("{}", report);
            self.reports_emitted += 1;
        }
        Ok(())
    }

    /// Route a command; returns false on quit.
    fn dispatch(&mut self, command: Command) -> bool {
        let settings = &self.settings;
        match command {
            Command::Quit => return false,
            Command::ToggleProcessing => {
                let enabled = self.store.toggle_processing();
                info!(
                    stage = ?self.processor.stage(enabled),
                    "Enable frame processing: {}", enabled
                );
            }
            Command::CycleResolution => {
                let index = self.store.next_resolution();
                info!(index, "Resolution -> {}", self.store.resolution());
                self.coordinator.request(Change::Resolution);
            }
            Command::CycleCodec => {
                let index = self.store.next_codec();
                info!(index, "Codec -> {}", self.store.codec());
                self.coordinator.request(Change::Codec);
            }
            Command::ToggleAutoExposure => {
                let auto = self.store.toggle_auto_exposure();
                info!("Auto exposure: {}", auto);
                self.coordinator.request(Change::Controls);
            }
            Command::AdjustExposure(step) => {
                let target = self.store.adjust_exposure(step.signed(settings.exposure_step));
                info!("Exposure target: {}", target);
                self.coordinator.request(Change::Controls);
            }
            Command::AdjustGain(step) => {
                let target = self.store.adjust_gain(step.signed(settings.gain_step));
                info!("Gain target: {}", target);
                self.coordinator.request(Change::Controls);
            }
            Command::ToggleAutoFocus => {
                let auto = self.store.toggle_auto_focus();
                info!("Auto focus: {}", auto);
                self.coordinator.request(Change::Controls);
            }
            Command::AdjustFocus(step) => {
                let target = self.store.adjust_focus(step.signed(settings.focus_step));
                info!("Focus target: {}", target);
                self.coordinator.request(Change::Controls);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_depends_on_frames() {
        let summary = |frames| RunSummary {
            frames_captured: frames,
            reports_emitted: 0,
            partial_window_frames: 0,
            stop: StopReason::Quit,
        };
        assert_eq!(summary(0).exit_code(), 1);
        assert_eq!(summary(1).exit_code(), 0);
    }
}
