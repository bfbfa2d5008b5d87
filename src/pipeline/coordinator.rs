use tracing::{debug, info, instrument, warn};

use super::PipelineError;
use crate::capture::{CaptureSource, PixelLayout};
use crate::params::{DeviceParameters, FourCc};
use crate::sink::{FrameSink, LoopbackFormat};

/// What a user action changed on the capture side
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Change {
    /// Exposure, gain, focus or their auto flags
    Controls,
    Codec,
    Resolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Reconfiguring(Change),
}

/// Keeps the capture device and the loopback format consistent across
/// live parameter changes.
///
/// Requests are queued and applied at the top of the next cycle. A failed
/// reconfiguration leaves the state at `Reconfiguring`.
#[derive(Debug)]
pub struct ReconfigurationCoordinator {
    state: CoordinatorState,
    sink_layout: PixelLayout,
    pending: Option<Change>,
}

impl ReconfigurationCoordinator {
    pub fn new(sink_layout: PixelLayout) -> Self {
        Self {
            state: CoordinatorState::Idle,
            sink_layout,
            pending: None,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == CoordinatorState::Idle
    }

    pub fn sink_layout(&self) -> PixelLayout {
        self.sink_layout
    }

    /// Queue a change. Every apply pushes the full parameter set, so only
    /// the widest pending change is kept.
    pub fn request(&mut self, change: Change) {
        self.pending = Some(self.pending.map_or(change, |queued| queued.max(change)));
    }

    pub fn pending(&self) -> Option<Change> {
        self.pending
    }

    /// Format matching what the capture device actually delivers.
    pub fn format_for<C: CaptureSource>(&self, capture: &C) -> LoopbackFormat {
        LoopbackFormat::new(capture.current_resolution(), self.sink_layout)
    }

    /// FOURCC the device settled on, when it differs from the requested codec.
    pub fn codec_drift<C: CaptureSource>(capture: &C, params: &DeviceParameters) -> Option<FourCc> {
        let applied = capture.current_fourcc();
        (applied != params.codec()).then_some(applied)
    }

    fn warn_codec_drift<C: CaptureSource>(capture: &C, params: &DeviceParameters) {
        if let Some(applied) = Self::codec_drift(capture, params) {
            warn!(
                requested = %params.codec(),
                applied = %applied,
                "Capture device kept a different codec"
            );
        }
    }

    /// Initial apply + configure before the first frame.
    #[instrument(skip_all)]
    pub fn start<C: CaptureSource, S: FrameSink>(
        &mut self,
        capture: &mut C,
        sink: &mut S,
        params: &DeviceParameters,
    ) -> Result<(), PipelineError> {
        self.state = CoordinatorState::Reconfiguring(Change::Resolution);
        capture.apply(params)?;
        Self::warn_codec_drift(capture, params);
        sink.configure(self.format_for(capture))?;
        self.state = CoordinatorState::Idle;

        info!(status = %capture.readback(), "Capture started");
        Ok(())
    }

    /// Apply the queued change, if any. Returns what was applied.
    pub fn apply_pending<C: CaptureSource, S: FrameSink>(
        &mut self,
        capture: &mut C,
        sink: &mut S,
        params: &DeviceParameters,
    ) -> Result<Option<Change>, PipelineError> {
        let Some(change) = self.pending.take() else {
            return Ok(None);
        };
        self.reconfigure(change, capture, sink, params)?;
        Ok(Some(change))
    }

    #[instrument(skip(self, capture, sink, params))]
    pub fn reconfigure<C: CaptureSource, S: FrameSink>(
        &mut self,
        change: Change,
        capture: &mut C,
        sink: &mut S,
        params: &DeviceParameters,
    ) -> Result<(), PipelineError> {
        self.state = CoordinatorState::Reconfiguring(change);
        debug!(
            requested = %params.resolution(),
            codec = %params.codec(),
            "Applying capture parameters"
        );

        capture.apply(params)?;
        if change == Change::Codec {
            Self::warn_codec_drift(capture, params);
        }
        let format = self.format_for(capture);

        match change {
            Change::Resolution => sink.reconfigure(format)?,
            Change::Codec | Change::Controls => {
                let current = sink.format().map(|f| f.resolution());
                if current != Some(format.resolution()) {
                    warn!(
                        output = ?current,
                        capture = %format.resolution(),
                        "Capture resolution moved without a resolution change; reconfiguring output"
                    );
                    sink.reconfigure(format)?;
                }
            }
        }

        self.state = CoordinatorState::Idle;
        metrics::counter!("reconfigurations").increment(1);
        info!(status = %capture.readback(), "Reconfigured ({:?})", change);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{DeviceError, DeviceReadback, Frame};
    use crate::params::{ParameterStore, ResolutionOption};

    /// Device that always delivers YUYV at 640x360
    struct YuyvOnly;

    impl CaptureSource for YuyvOnly {
        fn apply(&mut self, _: &DeviceParameters) -> Result<(), DeviceError> {
            Ok(())
        }

        fn read_frame(&mut self) -> Result<Frame, DeviceError> {
            Err(DeviceError::EndOfStream("none".into()))
        }

        fn current_resolution(&self) -> ResolutionOption {
            ResolutionOption::new(640, 360)
        }

        fn current_fourcc(&self) -> FourCc {
            FourCc::YUYV
        }

        fn readback(&self) -> DeviceReadback {
            DeviceReadback {
                resolution: self.current_resolution(),
                fourcc: FourCc::YUYV,
                fps: 30.0,
                exposure: None,
                gain: None,
                focus: None,
                auto_exposure: None,
                auto_focus: None,
            }
        }
    }

    #[test]
    fn codec_drift_reports_the_applied_fourcc() {
        let mut store = ParameterStore::new(DeviceParameters::default());
        assert_eq!(store.codec(), FourCc::MJPG);
        assert_eq!(
            ReconfigurationCoordinator::codec_drift(&YuyvOnly, store.params()),
            Some(FourCc::YUYV)
        );

        store.next_codec();
        assert_eq!(
            ReconfigurationCoordinator::codec_drift(&YuyvOnly, store.params()),
            None
        );
    }

    #[test]
    fn format_follows_the_device_not_the_request() {
        let coordinator = ReconfigurationCoordinator::new(PixelLayout::Rgb24);
        let format = coordinator.format_for(&YuyvOnly);
        assert_eq!(format.resolution(), ResolutionOption::new(640, 360));
        assert_eq!(format.byte_size, 691_200);
    }

    #[test]
    fn widest_change_wins() {
        let mut coordinator = ReconfigurationCoordinator::new(PixelLayout::Rgb24);
        coordinator.request(Change::Controls);
        coordinator.request(Change::Resolution);
        coordinator.request(Change::Codec);
        assert_eq!(coordinator.pending(), Some(Change::Resolution));
    }

    #[test]
    fn starts_idle() {
        let coordinator = ReconfigurationCoordinator::new(PixelLayout::Rgb24);
        assert!(coordinator.is_idle());
        assert_eq!(coordinator.pending(), None);
    }
}
