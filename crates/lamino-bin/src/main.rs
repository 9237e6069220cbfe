//! CLI entry point for lamino
//!
//! # Usage
//!
//! Run the scan described in a session file:
//! ```bash
//! lamino --config config/lamino.toml scan --mode continuous
//! ```
//!
//! Show device states, move the sample, or validate a configuration:
//! ```bash
//! lamino status
//! lamino move-sample --axis x --distance 0.5
//! lamino check-config
//! ```
//!
//! Ctrl-C during a scan aborts it; the running acquisition still closes the
//! shutter and returns the rotation stage before the process exits.

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lamino_core::DeviceError;
use lamino_experiment::{sequence_from_session, AbortHandle, Experiment, Walker};
use lamino_hardware::config::{load_session_config, ScanMode};
use lamino_hardware::Session;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lamino")]
#[command(about = "Laminography beamline control", long_about = None)]
struct Cli {
    /// Session configuration file (TOML)
    #[arg(long, global = true, default_value = "config/lamino.toml")]
    config: PathBuf,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take darks, flats and radios
    Scan {
        /// Override the rotation mode of the configuration
        #[arg(long, value_enum)]
        mode: Option<Mode>,

        /// Number of consecutive runs
        #[arg(long, default_value = "1")]
        runs: u32,
    },

    /// Print motor, shutter and storage ring state
    Status,

    /// Move the sample along a beamline axis through the 45° pushers
    MoveSample {
        /// Beamline axis
        #[arg(long, value_enum)]
        axis: Axis,

        /// Relative distance (mm)
        #[arg(long, allow_hyphen_values = true)]
        distance: f64,
    },

    /// Load and validate the configuration without opening devices
    CheckConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Stepped,
    Continuous,
}

impl From<Mode> for ScanMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Stepped => ScanMode::Stepped,
            Mode::Continuous => ScanMode::Continuous,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Axis {
    X,
    Y,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Commands::Scan { mode, runs } => scan(&cli.config, mode.map(Into::into), runs).await,
        Commands::Status => status(&cli.config).await,
        Commands::MoveSample { axis, distance } => move_sample(&cli.config, axis, distance).await,
        Commands::CheckConfig => check_config(&cli.config),
    }
}

async fn scan(config: &Path, mode: Option<ScanMode>, runs: u32) -> Result<()> {
    let session = Session::from_file(config).await?;
    let session_info = &session.config().session;
    let mode = mode.unwrap_or(session.config().scan.mode);
    let sequence = sequence_from_session(&session, mode)?;
    let walker = Arc::new(Walker::new(&session_info.data_root));

    let abort = AbortHandle::new();
    {
        let abort = abort.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received, aborting");
                abort.abort();
            }
        });
    }

    let experiment = Experiment::new(session_info.name.clone(), sequence, walker)
        .with_abort_handle(abort)
        .with_storage_ring(session.storage_ring());

    for run in 1..=runs {
        info!(run, runs, "starting run");
        match experiment.run().await {
            Ok(manifest) => {
                let frames: u64 = manifest.frames.values().sum();
                println!(
                    "{}: {} frames in {}",
                    manifest.scan,
                    frames,
                    session_info.data_root.join(&manifest.scan).display()
                );
            }
            Err(e) if DeviceError::is_abort(&e) => {
                println!("Scan aborted");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn status(config: &Path) -> Result<()> {
    let session = Session::from_file(config).await?;

    println!("Session: {}", session.config().session.name);
    println!("Motors:");
    for name in session.motor_names() {
        let motor = session.motor(name)?;
        let position = motor.position().await?;
        let state = motor.state().await?;
        println!(
            "  {:<12} {:>10.3} {:<4} {}",
            name,
            position,
            motor.kind().position_unit(),
            state
        );
    }

    let mut magnets: Vec<&String> = session.config().magnets.keys().collect();
    magnets.sort();
    if !magnets.is_empty() {
        println!("Magnets:");
    }
    for name in magnets {
        let magnet = session.magnet(name)?;
        let out = magnet.is_magnet_out().await?;
        println!("  {:<12} {}", name, if out { "out" } else { "in" });
    }

    println!("Shutter: {}", session.shutter().state().await?);
    let ring = session.storage_ring();
    println!(
        "Storage ring: {:.1} mA, {:.1} GeV, lifetime {:.0} s, {}",
        ring.current().await?,
        ring.energy().await?,
        ring.lifetime().await?,
        ring.state().await?
    );
    Ok(())
}

async fn move_sample(config: &Path, axis: Axis, distance: f64) -> Result<()> {
    let session = Session::from_file(config).await?;
    let stage = session.sample_translation()?;
    let moved = match axis {
        Axis::X => stage.move_sample_x(distance).await,
        Axis::Y => stage.move_sample_y(distance).await,
    };
    moved.context("Sample move failed")?;
    println!("Sample moved by {} mm", distance);
    Ok(())
}

fn check_config(config: &Path) -> Result<()> {
    let config = load_session_config(config)?;
    println!("Session '{}' is valid", config.session.name);
    println!("  Micos servers: {}", config.micos.len());
    println!("  Motors:        {}", config.motors.len());
    println!("  Magnets:       {}", config.magnets.len());
    println!(
        "  Scan:          {:?}, {} projections over {} deg on '{}'",
        config.scan.mode,
        config.scan.num_projections,
        config.scan.angular_range,
        config.scan.rotation_motor
    );
    Ok(())
}
