//! CLI command implementations

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use threadconf::{ConfigSources, ThreadConfig};
use threadproto::{CalibrationState, ClientConfig, Session};

/// Open a session and perform the handshake
async fn connect(config: &ThreadConfig) -> Result<Session> {
    let client = ClientConfig::from_config(config)
        .context("Invalid client configuration")?
        .with_name("threadctl");
    let session = Session::new(client);
    session
        .connect()
        .await
        .with_context(|| format!("Failed to connect to driver at {}", config.driver.address()))?;
    Ok(session)
}

/// Print glove connection, calibration and battery
pub async fn status(config: &ThreadConfig) -> Result<()> {
    let session = connect(config).await?;

    let glove = session.is_glove_connected().await;
    let calibrated = session.is_calibrated().await;
    let battery = match session.battery_life().await {
        Ok(percent) => format!("{}%", percent),
        Err(e) => {
            tracing::warn!("Battery query failed: {}", e);
            "unknown".to_string()
        }
    };

    println!("session:    {}", session.session_id());
    if let Some(endpoint) = session.telemetry_endpoint() {
        println!("telemetry:  {}", endpoint);
    }
    println!("glove:      {}", if glove { "connected" } else { "not connected" });
    println!("calibrated: {}", if calibrated { "yes" } else { "no" });
    println!("battery:    {}", battery);

    session.close().await;
    Ok(())
}

/// Run a calibration and write the driver's result
pub async fn calibrate(
    config: &ThreadConfig,
    delay: Option<u64>,
    output: Option<PathBuf>,
    background: bool,
) -> Result<()> {
    let delay = Duration::from_secs(delay.unwrap_or(config.calibration.delay_secs));
    let output = output.unwrap_or_else(|| config.calibration.output.clone());
    let session = connect(config).await?;

    eprintln!("Hold the glove still for {}s...", delay.as_secs());
    let result = if background {
        calibrate_background(&session, delay, &output).await
    } else {
        session
            .calibrate(delay, &output)
            .await
            .map(|path| println!("Calibration written to {}", path.display()))
            .context("Calibration failed")
    };

    session.close().await;
    result
}

async fn calibrate_background(session: &Session, delay: Duration, output: &Path) -> Result<()> {
    session
        .start_calibration(delay, output)
        .await
        .context("Driver did not start calibration")?;

    let state = session.wait_for_calibration().await;
    println!("{}", serde_json::to_string(&state)?);
    match state {
        CalibrationState::Persisted { path, bytes, .. } => {
            eprintln!("Calibration written to {} ({} bytes)", path.display(), bytes);
            Ok(())
        }
        CalibrationState::Failed { reason } => bail!("Calibration failed: {}", reason),
        other => bail!("Calibration ended in unexpected state {}", other.as_str()),
    }
}

/// Ask the driver to load a saved calibration
pub async fn load_calibration(config: &ThreadConfig, path: &Path) -> Result<()> {
    let session = connect(config).await?;
    let result = session
        .load_calibration_file(path)
        .await
        .with_context(|| format!("Driver could not load {}", path.display()));
    session.close().await;
    result?;

    println!("Loaded calibration from {}", path.display());
    Ok(())
}

/// Print gesture events as JSON lines until the channel closes, `count`
/// events have been printed, or Ctrl-C
pub async fn listen(config: &ThreadConfig, count: Option<u64>) -> Result<()> {
    let session = connect(config).await?;
    let mut events = session
        .spawn_listener()
        .context("Failed to start telemetry listener")?;

    let mut printed = 0u64;
    loop {
        if count.is_some_and(|limit| printed >= limit) {
            break;
        }
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(event) = event else {
            break;
        };
        println!("{}", serde_json::to_string(&event)?);
        printed += 1;
    }

    let summary = events.join().await;
    session.close().await;
    let summary = summary.context("Telemetry channel failed")?;
    tracing::info!(
        "Printed {} events ({} lines skipped)",
        printed,
        summary.skipped
    );
    Ok(())
}

/// Bracket a driver-side recording around a fixed duration
pub async fn record(config: &ThreadConfig, duration_secs: u64, output: &Path) -> Result<()> {
    let session = connect(config).await?;

    if !session.start_gesture_recording().await {
        session.close().await;
        bail!("Driver refused to start recording");
    }
    eprintln!("Recording for {}s...", duration_secs);
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(duration_secs)) => {}
        _ = tokio::signal::ctrl_c() => eprintln!("Interrupted, ending recording"),
    }

    let ended = session.end_gesture_recording(output).await;
    session.close().await;
    if !ended {
        bail!("Driver did not write the recording to {}", output.display());
    }
    println!("Recording written to {}", output.display());
    Ok(())
}

/// Print the merged configuration as TOML
pub fn show_config(config: &ThreadConfig, sources: &ConfigSources) -> Result<()> {
    for file in &sources.files {
        eprintln!("# from {}", file.display());
    }
    for var in &sources.env_overrides {
        eprintln!("# env {}", var);
    }
    print!("{}", config.to_toml()?);
    Ok(())
}
