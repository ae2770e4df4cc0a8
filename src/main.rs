//! CLI entry point for flipro
//!
//! Drives the simulated FLI Pro camera without hardware:
//! - `info`: capabilities, sensor modes and the configured frame geometry
//! - `capture`: a short unpacked capture with per-plane statistics
//! - `stream`: a stream of raw frames to disk with throughput statistics
//!
//! # Usage
//!
//! ```bash
//! flipro info
//! flipro capture --frames 3
//! flipro stream --frames 100 --out /data/run1 --prefix run1_
//! flipro --config config/flipro.toml --log-level debug stream --duration-secs 10
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flipro_daq::camera::{self, StreamRun};
use flipro_daq::config::{FliproConfig, DEFAULT_CONFIG_PATH};
use flipro_daq::telemetry;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "flipro")]
#[command(about = "Capture and stream frames from FLI Pro cameras", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override logging.level (none, error, warning, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print camera capabilities and the configured frame geometry
    Info,

    /// Capture frames and print per-plane statistics
    Capture {
        /// Frames to capture
        #[arg(long, default_value = "1")]
        frames: u32,

        /// Per-frame timeout in milliseconds (defaults to capture.default_timeout_ms)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Stream raw frames to disk
    Stream {
        /// Frames to stream; 0 streams until --duration-secs elapses
        #[arg(long, default_value = "10")]
        frames: u32,

        /// Output directory
        #[arg(long, default_value = "flipro-stream")]
        out: PathBuf,

        /// Frame file prefix
        #[arg(long, default_value = "frame_")]
        prefix: String,

        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Statistics print period in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = FliproConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    let log = telemetry::build(&config.logging).context("setting up logging")?;
    telemetry::install_global(&log);
    info!(config = %cli.config.display(), "flipro starting");

    let device = camera::simulated_camera(&config.camera);
    let mut session = camera::open_session(device, &config, log.clone())?;

    match cli.command {
        Commands::Info => {
            let caps = session.capabilities();
            println!("Device:       {:?}", caps.device_type);
            println!("Sensor:       {}x{}", caps.max_width, caps.max_height);
            println!("Metadata:     {} bytes", caps.metadata_size);
            println!(
                "Reference:    {} pre / {} post rows",
                caps.pre_frame_reference_rows, caps.post_frame_reference_rows
            );
            for mode in session.sensor_modes() {
                let hdr = if mode.hdr { " (HDR)" } else { "" };
                println!("Mode {}:       {}{}", mode.index, mode.name.as_str(), hdr);
            }
            if let Some(geometry) = session.geometry() {
                println!(
                    "Frame:        {}x{} at {} bits, {} bytes",
                    geometry.width(),
                    geometry.height(),
                    geometry.pixel_depth(),
                    geometry.total_bytes()
                );
            }
        }

        Commands::Capture { frames, timeout_ms } => {
            if frames == 0 {
                bail!("--frames must be at least 1");
            }
            let timeout = timeout_ms.map_or(config.capture.default_timeout(), Duration::from_millis);
            let reports = camera::capture_frames(&mut session, frames, timeout)?;
            for report in &reports {
                println!(
                    "frame {}: {} bytes, {}x{}",
                    report.index, report.bytes, report.width, report.height
                );
                for (kind, mean, median, min, max) in &report.planes {
                    println!("  {kind}: mean {mean:.2} median {median:.1} min {min} max {max}");
                }
                if let Some(err) = &report.unpack_error {
                    println!("  unpack failed: {err}");
                }
            }
        }

        Commands::Stream {
            frames,
            out,
            prefix,
            duration_secs,
            interval_ms,
        } => {
            if frames == 0 && duration_secs.is_none() {
                bail!("continuous streaming (--frames 0) requires --duration-secs");
            }
            let run = StreamRun {
                frames,
                duration: duration_secs.map(Duration::from_secs),
                poll: Duration::from_millis(interval_ms.max(1)),
            };
            let stats = camera::stream_to_disk(&session, &config, run, &out, &prefix, log.clone(), |s| {
                println!(
                    "received {:>6}  written {:>6}  avg {:.1} MB/s  peak {:.1} MB/s",
                    s.frames_received, s.disk_frames_written, s.avg_disk_mbps, s.peak_disk_mbps
                );
            })?;

            println!(
                "stream finished: status {} ({} of {} frames on disk)",
                stats.status.code(),
                stats.disk_frames_written,
                stats.frames_received
            );
            if let Some(err) = &stats.last_error {
                bail!("stream failed: {err}");
            }
            if frames > 0 && stats.disk_frames_written < frames {
                bail!("only {} of {frames} frames were written", stats.disk_frames_written);
            }
        }
    }

    session.close()?;
    info!("flipro done");
    Ok(())
}
