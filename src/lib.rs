pub mod capture;
pub mod input;
pub mod params;
pub mod pipeline;
pub mod processing;
pub mod sink;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{CaptureSource, DeviceError, Frame, PixelLayout};
pub use params::{DeviceParameters, FourCc, ParameterStore, ResolutionOption};
pub use pipeline::{PipelineLoop, RunSummary, StopReason};
pub use processing::{Backend, EdgeParams, ProcessingStage, Processor};
pub use sink::{FrameSink, LoopbackFormat, SinkError};

/// Environment variable prefix for configuration overrides
/// (`EDGECAM_CAPTURE__DEVICE=/dev/video2`).
pub const ENV_PREFIX: &str = "EDGECAM";

/// Config file picked up from the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "edgecam.toml";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub loopback: LoopbackConfig,
    pub processing: ProcessingConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device node; empty means auto-detect.
    pub device: String,
    pub resolution_index: usize,
    pub codec_index: usize,
    pub buffer_count: u32,
    pub exposure: i32,
    pub gain: i32,
    pub focus: i32,
    pub auto_exposure: bool,
    pub auto_focus: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// v4l2loopback node; empty means the first one discovered.
    pub device: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub backend: Backend,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frames per performance report window.
    pub report_interval: u64,
    pub poll_timeout_ms: u64,
    pub exposure_step: i32,
    pub gain_step: i32,
    pub focus_step: i32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            resolution_index: 3, // 640x360
            codec_index: 0,
            buffer_count: 4,
            exposure: 150,
            gain: 0,
            focus: 0,
            auto_exposure: true,
            auto_focus: true,
        }
    }
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video10".into(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Gpu,
            enabled: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            report_interval: 20,
            poll_timeout_ms: 1,
            exposure_step: 10,
            gain_step: 1,
            focus_step: 5,
        }
    }
}

impl PipelineConfig {
    /// Input poll timeout; never zero so the loop always yields briefly.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `EDGECAM_*` environment
    /// variables, in that order.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let defaults = config::Config::try_from(&Config::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(
                config::File::new(DEFAULT_CONFIG_FILE, config::FileFormat::Toml).required(false),
            ),
        };

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
