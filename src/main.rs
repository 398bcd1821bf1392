use anyhow::{Context, Result};
use backdrop_fx::capture::StillCapture;
use backdrop_fx::config::{Enhancement, EnhancementMode, PipelineConfig, SchedulerConfig, DEFAULT_GAMMA};
use backdrop_fx::control::{self, Command};
use backdrop_fx::output::{DisplaySlot, OutputSink};
use backdrop_fx::readiness::ReadinessState;
use backdrop_fx::{segmentation, Controller};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Replay a still image instead of opening a webcam
    #[arg(long)]
    input_image: Option<PathBuf>,

    /// Output v4l2loopback device path (e.g. /dev/video10).
    /// If not provided, frames are kept in memory only
    #[arg(short, long)]
    output_device: Option<String>,

    /// Capture resolution width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Refresh rate driving the frame loop
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to segmentation model (ONNX file)
    /// If not provided, runs in passthrough mode without segmentation
    #[arg(long)]
    model: Option<PathBuf>,

    /// Show matte visualization (grayscale silhouette) instead of the composite
    #[arg(long)]
    show_matte: bool,

    /// Background image composited behind the foreground
    #[arg(short, long)]
    background: Option<PathBuf>,

    /// Foreground enhancement
    #[arg(long, value_enum, default_value_t = EnhancementMode::None)]
    enhancement: EnhancementMode,

    /// Gamma exponent for the gamma enhancement
    #[arg(long, default_value_t = DEFAULT_GAMMA)]
    gamma: f32,

    /// Give up on a single inference call after this many milliseconds
    #[arg(long, default_value_t = 500)]
    inference_timeout_ms: u64,

    /// Start with the frame loop paused
    #[arg(long)]
    paused: bool,

    /// Save the last displayed frame to this file on exit
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            scheduler: SchedulerConfig {
                tick_interval: Duration::from_secs_f64(1.0 / self.fps.max(1) as f64),
                inference_timeout: Duration::from_millis(self.inference_timeout_ms),
                show_matte: self.show_matte,
                ..SchedulerConfig::default()
            },
            enhancement: Enhancement::from_mode(self.enhancement, self.gamma),
            background: self.background.clone(),
            start_running: !self.paused,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = args.pipeline_config();
    config.validate().context("Invalid configuration")?;

    tracing::info!("backdrop-fx starting");
    tracing::info!("Capture: {}x{}", args.capture_width, args.capture_height);
    tracing::info!("Output: {}x{}", args.output_width, args.output_height);
    tracing::info!("Target FPS: {}", args.fps);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let result = runtime.block_on(run(args, config));
    // stdin reads park a blocking thread that never returns on its own
    runtime.shutdown_timeout(Duration::from_millis(500));
    result
}

async fn run(args: Args, config: PipelineConfig) -> Result<()> {
    let (display, display_watch) = DisplaySlot::new();
    let sink = build_sink(&args, display)?;

    let mut controller = Controller::new(config, sink);
    controller.start();
    let status = tokio::spawn(report_status(controller.status()));

    let factory = match &args.model {
        Some(path) => {
            tracing::info!("Loading segmentation model from {}", path.display());
            segmentation::create_default_model(path.clone())
        }
        None => {
            tracing::info!("Running in passthrough mode (no segmentation)");
            segmentation::passthrough_factory()
        }
    };
    // A failure is reported on the status channel; `retry` tries again
    let _ = controller.initialize_model(factory).await;

    open_camera(&args, &mut controller);

    tracing::info!("{}", control::HELP);
    tracing::info!("Press Ctrl+C to stop");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match line.parse::<Command>() {
                        Ok(command) => {
                            if control::execute(&mut controller, command).await.is_break() {
                                break;
                            }
                        }
                        Err(err) => tracing::warn!("{err:#}"),
                    }
                }
                Ok(None) => stdin_open = false,
                Err(err) => {
                    tracing::warn!("Stopped reading commands: {err}");
                    stdin_open = false;
                }
            },
        }
    }

    controller.shutdown().await;
    status.abort();

    if let Some(path) = &args.snapshot {
        if display_watch.save_latest(path)? {
            tracing::info!("Saved last frame to {}", path.display());
        } else {
            tracing::warn!("No frame was displayed; snapshot not written");
        }
    }
    Ok(())
}

#[cfg(feature = "loopback")]
fn build_sink(args: &Args, display: DisplaySlot) -> Result<Box<dyn OutputSink>> {
    match &args.output_device {
        Some(device) => {
            let output = backdrop_fx::output::V4L2Output::new(device, args.output_width, args.output_height)
                .context("Failed to initialize v4l2loopback output")?;
            Ok(Box::new(output))
        }
        None => Ok(Box::new(display)),
    }
}

#[cfg(not(feature = "loopback"))]
fn build_sink(args: &Args, display: DisplaySlot) -> Result<Box<dyn OutputSink>> {
    if let Some(device) = &args.output_device {
        anyhow::bail!("cannot write to {device}: built without the `loopback` feature");
    }
    Ok(Box::new(display))
}

fn open_camera(args: &Args, controller: &mut Controller) {
    if let Some(path) = args.input_image.clone() {
        let fps = args.fps;
        controller.start_camera(move || StillCapture::open(path, fps));
        return;
    }

    #[cfg(feature = "camera")]
    {
        let (index, width, height, fps) =
            (args.input_device, args.capture_width, args.capture_height, args.fps);
        controller.start_camera(move || {
            backdrop_fx::capture::WebcamCapture::new(index, width, height, fps)
                .context("Failed to initialize webcam capture")
        });
    }

    #[cfg(not(feature = "camera"))]
    controller
        .readiness()
        .camera_failed(&backdrop_fx::PipelineError::CameraAccess(format!(
            "webcam {} requested but built without the `camera` feature; use --input-image",
            args.input_device
        )));
}

/// Log surfaced faults and gate transitions as they happen.
async fn report_status(mut rx: watch::Receiver<ReadinessState>) {
    let mut last = rx.borrow_and_update().clone();
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        if state.fault != last.fault {
            if let Some(fault) = &state.fault {
                tracing::error!("{}", fault);
            }
        }
        if state.can_run() != last.can_run() {
            tracing::info!(
                "Frame loop {}",
                if state.can_run() { "running" } else { "paused" }
            );
        }
        last = state;
    }
}
