//! CLI entry point for conveyor-daq
//!
//! Runs the operator loop of the conveyor sample station:
//! - `run`: connect to the controller board, open the webcam, tare once, then
//!   one cycle per ENTER until `q` (or end of input). `--simulate` swaps both
//!   devices for the in-process simulator.
//! - `check-config`: load and validate the configuration, print the result
//!
//! # Usage
//!
//! ```bash
//! conveyor-daq run --config config/conveyor.toml --port /dev/ttyACM0
//! conveyor-daq run --simulate
//! conveyor-daq check-config
//! ```

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use conveyor_daq::config::Settings;
use conveyor_daq::data::CsvSink;
use conveyor_daq::experiment::{CycleOrchestrator, OperatorCommand, OperatorPrompt};
use conveyor_daq::hardware::mock::{MockCamera, MockConveyor};
use conveyor_daq::hardware::{self, FrameSource, LineChannel};
use conveyor_daq::imaging::CaptureService;
use conveyor_daq::logging;
use conveyor_daq::session::DeviceSession;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "conveyor-daq")]
#[command(about = "Conveyor sample station: capture, weigh, and log samples", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the interactive operator loop
    Run {
        /// Configuration file (defaults to config/conveyor.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Serial port of the controller board, overrides the configuration
        #[arg(long)]
        port: Option<String>,

        /// Use the simulated conveyor and camera instead of real hardware
        #[arg(long)]
        simulate: bool,
    },

    /// Load and validate the configuration
    CheckConfig {
        /// Configuration file (defaults to config/conveyor.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            port,
            simulate,
        } => run_station(config, port, simulate).await,
        Commands::CheckConfig { config } => check_config(config),
    }
}

fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
    let settings = match path {
        Some(path) => Settings::load_from(&path)?,
        None => Settings::load()?,
    };
    settings.validate()?;
    Ok(settings)
}

fn check_config(path: Option<PathBuf>) -> Result<()> {
    let settings = load_settings(path)?;
    println!("{}", toml::to_string_pretty(&settings)?);
    println!("Configuration OK");
    Ok(())
}

async fn run_station(config: Option<PathBuf>, port: Option<String>, simulate: bool) -> Result<()> {
    let mut settings = load_settings(config)?;
    if let Some(port) = port {
        settings.serial.port = port;
    }
    logging::init_from_settings(&settings).map_err(|e| anyhow!(e))?;
    let settings = Arc::new(settings);

    info!(
        port = %settings.serial.port,
        simulate,
        "Starting {}",
        settings.application.name
    );

    // `_board` keeps the simulated controller alive for the whole run.
    let (mut session, _board) = if simulate {
        let (host, board) = MockConveyor::new().spawn();
        let channel = LineChannel::from_stream("simulator", host);
        (DeviceSession::establish(channel, &settings).await?, Some(board))
    } else {
        (DeviceSession::connect(&settings).await?, None)
    };

    let camera: Box<dyn FrameSource> = if simulate {
        Box::new(MockCamera::new(settings.camera.width, settings.camera.height))
    } else {
        match hardware::open_camera(&settings.camera).await {
            Ok(camera) => camera,
            Err(e) => {
                error!("Camera unavailable, closing the serial link: {}", e);
                session.close().await;
                return Err(e.into());
            }
        }
    };
    let capture = CaptureService::new(camera, Arc::clone(&settings));
    let sink = CsvSink::new(&settings.storage.csv_log);

    let mut orchestrator =
        CycleOrchestrator::new(session, capture, Box::new(sink), Arc::clone(&settings));
    let mut prompt = StdinPrompt::new();
    let cycles = orchestrator.run(&mut prompt).await?;

    println!("Done. {} sample(s) recorded.", cycles);
    Ok(())
}

/// Reads operator decisions from stdin: ENTER runs, `q` quits, end of input quits.
struct StdinPrompt {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinPrompt {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

#[async_trait]
impl OperatorPrompt for StdinPrompt {
    async fn next_command(&mut self, next_index: u32) -> OperatorCommand {
        println!();
        print!(
            "Load sample {} and press ENTER to run (q to quit): ",
            next_index
        );
        let _ = std::io::stdout().flush();

        match self.lines.next_line().await {
            Ok(Some(line)) if line.trim().eq_ignore_ascii_case("q") => OperatorCommand::Quit,
            Ok(Some(_)) => OperatorCommand::Run,
            Ok(None) => OperatorCommand::Quit,
            Err(e) => {
                warn!("Failed to read operator input: {}", e);
                OperatorCommand::Quit
            }
        }
    }
}
