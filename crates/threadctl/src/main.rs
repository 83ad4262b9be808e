//! threadctl - command-line client for the Thread glove driver
//!
//! Subcommands:
//! - `threadctl status` - Glove connection, calibration and battery
//! - `threadctl calibrate` - Run a calibration and save the result
//! - `threadctl load-calibration <path>` - Load a saved calibration
//! - `threadctl listen` - Print gesture events as JSON lines
//! - `threadctl record` - Have the driver record gestures to a file
//! - `threadctl config` - Print the effective configuration

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use threadconf::ThreadConfig;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "threadctl")]
#[command(about = "Command-line client for the Thread gesture glove driver")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./threadglove.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Driver address, overriding the config (e.g. 127.0.0.1:7777)
    #[arg(long, global = true)]
    driver: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Show glove connection, calibration state and battery
    Status,

    /// Calibrate the glove and write the driver's result to a file
    Calibrate {
        /// Seconds to hold the hand at rest (default from config)
        #[arg(short, long)]
        delay: Option<u64>,

        /// Where to write the result (default from config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Use the background flow and report its final state
        #[arg(long)]
        background: bool,
    },

    /// Ask the driver to load a previously saved calibration
    LoadCalibration {
        /// Calibration file path, as seen by the driver
        path: PathBuf,
    },

    /// Print gesture events as JSON lines
    Listen {
        /// Stop after this many events
        #[arg(short = 'n', long)]
        count: Option<u64>,
    },

    /// Record gestures for a while; the driver writes the file
    Record {
        /// Recording length in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Path the driver writes its recording to
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the effective configuration and where it came from
    Config,
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = ThreadConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(driver) = &cli.driver {
        let (host, port) = driver
            .rsplit_once(':')
            .with_context(|| format!("Driver address '{}' is not host:port", driver))?;
        config.driver.host = host.to_string();
        config.driver.port = port
            .parse()
            .with_context(|| format!("Invalid driver port '{}'", port))?;
    }

    init_logging(&config.logging.level);
    tracing::debug!(
        "Loaded config from {:?} (env overrides: {:?})",
        sources.files,
        sources.env_overrides
    );

    match cli.command {
        Commands::Status => commands::status(&config).await?,
        Commands::Calibrate {
            delay,
            output,
            background,
        } => {
            commands::calibrate(&config, delay, output, background).await?;
        }
        Commands::LoadCalibration { path } => {
            commands::load_calibration(&config, &path).await?;
        }
        Commands::Listen { count } => commands::listen(&config, count).await?,
        Commands::Record { duration, output } => {
            commands::record(&config, duration, &output).await?;
        }
        Commands::Config => commands::show_config(&config, &sources)?,
    }

    Ok(())
}
