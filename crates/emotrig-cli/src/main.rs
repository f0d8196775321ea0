use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use emotrig_core::{FaceEmotionClassifier, SequenceTracker, Session, SignalEmitter, SignalMap};
use emotrig_hw::{Camera, SerialPort};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod display;
mod pipeline;
mod replay;

use config::Config;
use display::TerminalDisplay;
use pipeline::{ExitReason, FrameSource, RunSummary};
use replay::ImageDirSource;

#[derive(Parser)]
#[command(
    name = "emotrig",
    version,
    about = "Signal a microcontroller when a sequence of facial emotions is observed"
)]
struct Cli {
    /// TOML configuration file (EMOTRIG_* environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the camera and signal each target emotion in order
    Run {
        /// Log signal bytes instead of writing them to the serial port
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the same pipeline over a directory of images
    Replay {
        /// Directory of png/jpg/bmp frames, processed in name order
        dir: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
    /// Send the byte mapped to one emotion label and exit
    Send {
        /// Emotion label, e.g. "happy"
        label: String,
    },
    /// List V4L2 capture devices
    Devices {
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config,
}

/// Signal sink for `--dry-run`: logs each byte instead of sending it.
struct DryRunSink;

impl Write for DryRunSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for &b in buf {
            tracing::info!(byte = %char::from(b), "dry run: signal not sent");
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Run { dry_run } => {
            let classifier = load_classifier(&config)?;
            let sink = open_sink(&config, dry_run)?;

            let mut camera =
                Camera::open(config.camera_index, config.camera_width, config.camera_height)
                    .with_context(|| format!("failed to open camera {}", config.camera_device()))?;
            camera
                .warmup(config.warmup_frames)
                .context("camera warmup failed")?;

            let summary = run_pipeline(&config, camera, classifier, sink)?;
            report(&summary);
        }
        Commands::Replay { dir, dry_run } => {
            let classifier = load_classifier(&config)?;
            let sink = open_sink(&config, dry_run)?;
            let source = ImageDirSource::open(&dir)
                .with_context(|| format!("failed to read replay directory {}", dir.display()))?;

            let summary = run_pipeline(&config, source, classifier, sink)?;
            report(&summary);
        }
        Commands::Send { label } => {
            let port = SerialPort::open(&config.serial_port, config.baud_rate)?;
            let mut emitter = SignalEmitter::new(config.signal_map()?, port);
            match emitter.emit(&label)? {
                Some(byte) => {
                    let port = emitter.sink();
                    println!(
                        "sent {:?} for {label} on {} at {} baud",
                        char::from(byte),
                        port.path(),
                        port.baud()
                    );
                }
                None => bail!(
                    "no signal mapped for label {label:?} (mapped: {})",
                    mapped_labels(emitter.map())
                ),
            }
        }
        Commands::Devices { json } => {
            let devices = Camera::list_devices();
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("no V4L2 capture devices found");
            } else {
                for d in &devices {
                    println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
                }
            }
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn load_classifier(config: &Config) -> Result<FaceEmotionClassifier> {
    let classifier = FaceEmotionClassifier::load(
        &config.detector_model_path(),
        &config.emotion_model_path(),
        config.emotion_input_layout,
        config.no_face_policy,
    )
    .with_context(|| format!("failed to load models from {}", config.model_dir.display()))?;
    Ok(classifier)
}

fn open_sink(config: &Config, dry_run: bool) -> Result<Box<dyn Write>> {
    if dry_run {
        tracing::info!("dry run: serial port not opened");
        return Ok(Box::new(DryRunSink));
    }
    let port = SerialPort::open(&config.serial_port, config.baud_rate)
        .with_context(|| format!("failed to open serial port {}", config.serial_port))?;
    Ok(Box::new(port))
}

fn run_pipeline<S: FrameSource>(
    config: &Config,
    source: S,
    classifier: FaceEmotionClassifier,
    sink: Box<dyn Write>,
) -> Result<RunSummary> {
    let tracker = SequenceTracker::new(config.target_sequence()?);
    let session = Session::new(tracker, SignalEmitter::new(config.signal_map()?, sink));
    let display = TerminalDisplay::stdout(
        config.quit_byte(),
        config.preview_path.clone(),
        config.preview_every,
    )?;

    tracing::info!(
        targets = ?config.targets,
        quit_key = %config.quit_key,
        "watching for target sequence"
    );
    Ok(pipeline::run(source, classifier, session, display)?)
}

fn mapped_labels(map: &SignalMap) -> String {
    map.iter()
        .map(|(emotion, byte)| format!("{emotion}={}", char::from(byte)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn report(summary: &RunSummary) {
    let outcome = match summary.reason {
        ExitReason::SequenceComplete => "sequence complete",
        ExitReason::QuitKey => "quit",
        ExitReason::EndOfStream => "end of stream",
    };
    println!(
        "{outcome}: {}/{} targets, {} signals, {} frames",
        summary.matched,
        summary.total,
        summary.signals,
        summary.frames
    );
}
