mod acquisition;
mod buffers;
mod device;
mod session;

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use line_stitch_common::config::{Backend, Config, ConfigError};
use line_stitch_stitcher::StitchError;
use tracing::{error, info};

use crate::acquisition::CancelToken;
use crate::device::DeviceError;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    #[error("stitch error: {0}")]
    Stitch(#[from] StitchError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Simulated,
    Replay,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Simulated => Backend::Simulated,
            BackendArg::Replay => Backend::Replay,
        }
    }
}

/// Stitch line-scan camera frames into composite PNG images.
#[derive(Debug, Parser)]
#[command(name = "line-stitch", version)]
struct Args {
    /// TOML configuration file. Defaults to ./config.toml when present.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Frames stacked into each composite.
    #[arg(short, long)]
    frames: Option<u32>,

    /// Directory receiving composite PNGs.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Stop after this many composites (0 runs until Ctrl-C).
    #[arg(long)]
    composites: Option<u32>,

    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    /// Directory of images served by the replay backend.
    #[arg(long)]
    replay_dir: Option<PathBuf>,
}

/// Load the config file and apply command line overrides on top.
fn load_config(args: &Args) -> Result<Config, CaptureError> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => {
            let path = Path::new(DEFAULT_CONFIG_PATH);
            if path.exists() {
                Config::load(path)?
            } else {
                Config::default()
            }
        }
    };

    if let Some(frames) = args.frames {
        config.stitch.frames_per_composite = frames;
    }
    if let Some(dir) = &args.output_dir {
        config.output.directory = dir.clone();
    }
    if let Some(composites) = args.composites {
        config.acquisition.stop_after_composites = composites;
    }
    if let Some(backend) = args.backend {
        config.camera.backend = backend.into();
    }
    if let Some(dir) = &args.replay_dir {
        config.camera.replay_dir = Some(dir.clone());
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        backend = ?config.camera.backend,
        frames_per_composite = config.stitch.frames_per_composite,
        output = %config.output.directory.display(),
        "starting line-stitch"
    );

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping acquisition");
            on_interrupt.cancel();
        }
    });

    let outcome = tokio::task::spawn_blocking(move || session::run(&config, &cancel)).await;

    match outcome {
        Ok(Ok(summary)) => {
            info!(
                device = summary.device.connection_id,
                packet_size = ?summary.packet_size,
                buffers = summary.buffers.allocated,
                released = summary.released,
                composites = summary.stats.composites,
                dropped = summary.stats.dropped,
                bad_status = summary.stats.bad_status,
                encode_failures = summary.stats.encode_failures,
                "capture complete"
            );
            for path in &summary.stats.written {
                info!(path = %path.display(), "composite saved");
            }
        }
        Ok(Err(e)) => {
            error!(error = %e, "capture failed");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "capture task did not complete");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_defaults() {
        let args = Args::parse_from([
            "line-stitch",
            "--frames",
            "25",
            "--output-dir",
            "/tmp/out",
            "--composites",
            "0",
        ]);
        let config = load_config(&args).unwrap();

        assert_eq!(config.stitch.frames_per_composite, 25);
        assert_eq!(config.output.directory, PathBuf::from("/tmp/out"));
        assert_eq!(config.acquisition.stop_after_composites, 0);
    }

    #[test]
    fn replay_backend_requires_directory() {
        let args = Args::parse_from(["line-stitch", "--backend", "replay"]);
        assert!(matches!(
            load_config(&args),
            Err(CaptureError::Config(ConfigError::Invalid(_)))
        ));

        let args = Args::parse_from([
            "line-stitch",
            "--backend",
            "replay",
            "--replay-dir",
            "frames",
        ]);
        assert_eq!(load_config(&args).unwrap().camera.backend, Backend::Replay);
    }

    #[test]
    fn zero_frames_flag_is_rejected() {
        let args = Args::parse_from(["line-stitch", "--frames", "0"]);
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let args = Args::parse_from(["line-stitch", "--config", "/nonexistent/line-stitch.toml"]);
        assert!(matches!(
            load_config(&args),
            Err(CaptureError::Config(ConfigError::ReadFile(..)))
        ));
    }
}
