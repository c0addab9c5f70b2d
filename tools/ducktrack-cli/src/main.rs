//! DuckTrack CLI: record input-event sessions alongside a screen recording.
//!
//! Usage:
//!   ducktrack record [OPTIONS]     Start a recording session
//!   ducktrack inspect <DIR>        Summarize a recorded session
//!   ducktrack check                Check input devices and ffmpeg

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use ducktrack_common::config::{AppConfig, BackendKind};

mod commands;

#[derive(Parser)]
#[command(
    name = "ducktrack",
    about = "Capture time-stamped input events alongside a screen recording",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/ducktrack/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a recording session
    Record {
        /// Directory to create the session under
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Video backend
        #[arg(long, value_enum)]
        backend: Option<BackendArg>,

        /// Mark the session as recorded with natural scrolling
        #[arg(long)]
        natural_scrolling: bool,

        /// Screen capture frame rate
        #[arg(long)]
        fps: Option<u32>,
    },

    /// Summarize a recorded session
    Inspect {
        /// Path to the session directory
        path: PathBuf,
    },

    /// Check input devices and the video backend
    Check,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Ffmpeg,
    None,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Ffmpeg => BackendKind::Ffmpeg,
            BackendArg::None => BackendKind::None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    let dispatch = ducktrack_common::logging::init_logging(&config.logging)?;

    match cli.command {
        Commands::Record {
            output,
            backend,
            natural_scrolling,
            fps,
        } => {
            if let Some(output) = output {
                config.recordings_dir = output;
            }
            if let Some(backend) = backend {
                config.video.backend = backend.into();
            }
            if let Some(fps) = fps {
                config.video.fps = fps;
            }
            config.capture.natural_scrolling |= natural_scrolling;

            commands::record::run(config, dispatch).await
        }
        Commands::Inspect { path } => commands::inspect::run(path),
        Commands::Check => commands::check::run(&config),
    }
}
