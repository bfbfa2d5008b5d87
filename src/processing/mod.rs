//! Per-frame processing stage: pass-through or Canny on CPU or GPU.
//!
//! The edge backend is chosen once at start-up; only the pass-through /
//! edge-detect switch follows `processing_enabled` per cycle.

pub mod cpu;
pub mod gpu;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use cpu::CpuEdgeDetector;
pub use gpu::GpuEdgeDetector;

use crate::capture::Frame;

/// Preferred execution target for edge detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Cpu,
    Gpu,
}

/// Fixed Canny configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeParams {
    pub low_threshold: f32,
    pub high_threshold: f32,
    /// Sobel aperture: 5, otherwise 3
    pub aperture: u32,
}

impl EdgeParams {
    pub const DEFAULT: EdgeParams = EdgeParams {
        low_threshold: 400.0,
        high_threshold: 1000.0,
        aperture: 5,
    };
}

impl Default for EdgeParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Variant that handles a given cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    PassThrough,
    EdgeDetectCpu,
    EdgeDetectGpu,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("GPU backend unavailable: {0}")]
    GpuUnavailable(String),
    #[error("GPU processing failed: {0}")]
    Gpu(String),
    #[error("frame buffer of {len} bytes does not fit {width}x{height}")]
    FrameShape { width: u32, height: u32, len: usize },
}

/// Output of one processing step
#[derive(Debug)]
pub struct Processed {
    pub frame: Frame,
    pub stage: ProcessingStage,
    /// Transform time only, excluding capture and sink
    pub elapsed: Duration,
}

enum EdgeDetector {
    Cpu(CpuEdgeDetector),
    Gpu(Box<GpuEdgeDetector>),
}

/// Processing stage with its start-up selected edge backend
pub struct Processor {
    detector: EdgeDetector,
}

impl Processor {
    /// Select the backend, probing for a GPU when preferred.
    pub fn new(preference: Backend, params: EdgeParams) -> Self {
        Self::with_gpu_probe(preference, params, GpuEdgeDetector::new)
    }

    /// Like [`Processor::new`] with a caller-supplied GPU probe. A failed
    /// probe degrades to the CPU backend with a warning.
    pub fn with_gpu_probe<F>(preference: Backend, params: EdgeParams, probe: F) -> Self
    where
        F: FnOnce(EdgeParams) -> Result<GpuEdgeDetector, ProcessingError>,
    {
        let detector = match preference {
            Backend::Cpu => EdgeDetector::Cpu(CpuEdgeDetector::new(params)),
            Backend::Gpu => match probe(params) {
                Ok(gpu) => {
                    info!(adapter = gpu.adapter_name(), "Edge detection on GPU");
                    EdgeDetector::Gpu(Box::new(gpu))
                }
                Err(e) => {
                    warn!("{}; falling back to CPU edge detection", e);
                    EdgeDetector::Cpu(CpuEdgeDetector::new(params))
                }
            },
        };
        Self { detector }
    }

    pub fn cpu(params: EdgeParams) -> Self {
        Self::with_gpu_probe(Backend::Cpu, params, GpuEdgeDetector::new)
    }

    /// Stage used when processing is enabled.
    pub fn edge_stage(&self) -> ProcessingStage {
        match self.detector {
            EdgeDetector::Cpu(_) => ProcessingStage::EdgeDetectCpu,
            EdgeDetector::Gpu(_) => ProcessingStage::EdgeDetectGpu,
        }
    }

    pub fn stage(&self, enabled: bool) -> ProcessingStage {
        if enabled {
            self.edge_stage()
        } else {
            ProcessingStage::PassThrough
        }
    }

    /// Run the stage selected by `enabled`. Output keeps the input's
    /// dimensions and multi-channel layout.
    pub fn process(&mut self, mut frame: Frame, enabled: bool) -> Result<Processed, ProcessingError> {
        let stage = self.stage(enabled);
        if stage == ProcessingStage::PassThrough {
            return Ok(Processed {
                frame,
                stage,
                elapsed: Duration::ZERO,
            });
        }

        let start = Instant::now();
        let (width, height) = (frame.width, frame.height);
        let gray = frame.to_gray();
        let edges = match &mut self.detector {
            EdgeDetector::Cpu(cpu) => cpu.detect(gray, width, height)?,
            EdgeDetector::Gpu(gpu) => gpu.detect(&gray, width, height)?,
        };
        let layout = frame.layout;
        frame.replace_with_gray(&edges, layout);
        let elapsed = start.elapsed();

        metrics::histogram!("processing_time_us").record(elapsed.as_micros() as f64);

        Ok(Processed {
            frame,
            stage,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelLayout;

    fn no_gpu(_: EdgeParams) -> Result<GpuEdgeDetector, ProcessingError> {
        Err(ProcessingError::GpuUnavailable("test".into()))
    }

    #[test]
    fn gpu_preference_degrades_to_cpu() {
        let processor = Processor::with_gpu_probe(Backend::Gpu, EdgeParams::DEFAULT, no_gpu);
        assert_eq!(processor.edge_stage(), ProcessingStage::EdgeDetectCpu);
    }

    #[test]
    fn cpu_preference_never_probes() {
        let processor = Processor::with_gpu_probe(Backend::Cpu, EdgeParams::DEFAULT, |_| {
            panic!("probe must not run for the CPU backend")
        });
        assert_eq!(processor.stage(true), ProcessingStage::EdgeDetectCpu);
    }

    #[test]
    fn disabled_is_pass_through() {
        let mut processor = Processor::cpu(EdgeParams::DEFAULT);
        let frame = Frame::new(4, 2, PixelLayout::Bgr24, (0..24).collect());
        let out = processor.process(frame, false).unwrap();
        assert_eq!(out.stage, ProcessingStage::PassThrough);
        assert_eq!(out.elapsed, Duration::ZERO);
        assert_eq!(out.frame.data, (0..24).collect::<Vec<u8>>());
    }

    #[test]
    fn edge_output_keeps_shape_and_layout() {
        let mut processor = Processor::cpu(EdgeParams::DEFAULT);
        let frame = Frame::new(8, 6, PixelLayout::Bgr24, vec![90; 8 * 6 * 3]);
        let out = processor.process(frame, true).unwrap();
        assert_eq!(out.stage, ProcessingStage::EdgeDetectCpu);
        assert_eq!((out.frame.width, out.frame.height), (8, 6));
        assert_eq!(out.frame.layout, PixelLayout::Bgr24);
        assert!(out.frame.is_well_formed());
    }
}
