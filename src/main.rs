//! edgecam: camera → optional edge detection → v4l2loopback

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use edgecam::capture::V4l2Capture;
use edgecam::input::{StdinCommands, HELP};
use edgecam::params::RESOLUTIONS;
use edgecam::sink::V4l2Loopback;
use edgecam::utils::{self, DeviceKind};
use edgecam::{
    Backend, Config, DeviceParameters, EdgeParams, ParameterStore, PipelineLoop, Processor,
};

#[derive(Parser)]
#[command(name = "edgecam")]
#[command(about = "Re-inject a camera into a v4l2loopback device, optionally edge-detected")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (default: ./edgecam.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Capture device, e.g. /dev/video0 (empty string auto-detects)
    #[arg(short, long)]
    device: Option<String>,

    /// v4l2loopback output device, e.g. /dev/video10
    #[arg(short, long)]
    loopback: Option<String>,

    /// Edge detection backend
    #[arg(short, long, value_enum)]
    backend: Option<CliBackend>,

    /// Start-up resolution, index into the resolution catalog
    #[arg(long)]
    resolution_index: Option<usize>,

    /// Start-up codec: 0 = MJPG, 1 = YUYV
    #[arg(long)]
    codec_index: Option<usize>,

    /// Start with edge detection enabled
    #[arg(short, long)]
    process: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List cameras and loopback devices
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliBackend {
    Cpu,
    Gpu,
}

impl From<CliBackend> for Backend {
    fn from(backend: CliBackend) -> Self {
        match backend {
            CliBackend::Cpu => Backend::Cpu,
            CliBackend::Gpu => Backend::Gpu,
        }
    }
}

impl Cli {
    /// CLI flags override file and environment settings.
    fn override_config(&self, mut config: Config) -> Config {
        if let Some(device) = &self.device {
            config.capture.device = device.clone();
        }
        if let Some(loopback) = &self.loopback {
            config.loopback.device = loopback.clone();
        }
        if let Some(backend) = self.backend {
            config.processing.backend = backend.into();
        }
        if let Some(index) = self.resolution_index {
            config.capture.resolution_index = index;
        }
        if let Some(index) = self.codec_index {
            config.capture.codec_index = index;
        }
        if self.process {
            config.processing.enabled = true;
        }
        config
    }
}

fn main() -> Result<ExitCode> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("edgecam=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();

    if let Some(Commands::List) = cli.command {
        list_devices();
        return Ok(ExitCode::SUCCESS);
    }

    let config = cli.override_config(Config::load(cli.config.as_deref())?);
    run(config)
}

fn run(mut config: Config) -> Result<ExitCode> {
    info!("edgecam launching...");

    if config.capture.device.is_empty() {
        config.capture.device = utils::auto_detect_device()?.path;
    }
    if config.loopback.device.is_empty() {
        config.loopback.device = utils::find_loopback_devices()
            .into_iter()
            .next()
            .map(|d| d.path)
            .ok_or_else(|| eyre!("No v4l2loopback device found; is the module loaded?"))?;
    }

    info!("Opening camera {}...", config.capture.device);
    let capture = V4l2Capture::open(&config.capture.device, config.capture.buffer_count)?;
    let sink = V4l2Loopback::open(&config.loopback.device)?;

    let processor = Processor::new(config.processing.backend, EdgeParams::DEFAULT);
    let store = ParameterStore::new(DeviceParameters::from_config(&config));

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

    info!("{}", HELP);

    let summary = PipelineLoop::new(
        capture,
        sink,
        StdinCommands::new(),
        processor,
        store,
        config.pipeline.clone(),
    )
    .with_shutdown_flag(shutdown)
    .run();

    info!("edgecam shutting down ({:?})", summary.stop);
    Ok(ExitCode::from(summary.exit_code()))
}

fn list_devices() {
    let devices = utils::list_devices();
    if devices.is_empty() {
        println!("No video devices found.");
        return;
    }

    for kind in [DeviceKind::Camera, DeviceKind::Loopback] {
        println!("{:?} devices:", kind);
        for device in devices.iter().filter(|d| d.kind == kind) {
            let codecs: Vec<String> = device.codecs.iter().map(|c| c.to_string()).collect();
            println!(
                "  {}  {} ({})  {}",
                device.path,
                device.card,
                device.driver,
                codecs.join(", ")
            );
        }
        println!();
    }

    let catalog: Vec<String> = RESOLUTIONS
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[{i}] {r}"))
        .collect();
    println!("Resolutions: {}", catalog.join("  "));
}
