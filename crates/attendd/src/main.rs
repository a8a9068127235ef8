use anyhow::{Context, Result};
use std::io::BufRead;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod scanner;
mod sink;

use config::Config;
use scanner::ScannerCommand;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("attendd starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        camera = %config.camera_device,
        trigger = ?config.trigger,
        sink = ?config.sink,
        sink_path = %config.sink_path.display(),
        threshold = config.confidence_threshold,
        cooldown_secs = config.cooldown_secs,
        "configuration loaded"
    );

    let handle = scanner::spawn_scanner(&config).context("failed to start scanner")?;
    let tx = handle.sender();
    spawn_key_reader(handle.sender()).context("failed to start console reader")?;
    tracing::info!("attendd ready; 'p' + Enter scans, 'q' + Enter quits");

    let mut scanner = tokio::task::spawn_blocking(move || handle.join());
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            tracing::info!("interrupt received");
            // The scanner may already be gone if a quit key raced the signal.
            let _ = tx.send(ScannerCommand::Quit).await;
            scanner
                .await
                .context("scanner join task failed")?
                .context("scanner thread failed")?;
        }
        res = &mut scanner => {
            res.context("scanner join task failed")?
                .context("scanner thread failed")?;
        }
    }

    tracing::info!("attendd shut down");
    Ok(())
}

/// Forward console keys to the scanner until `q` or end of input.
///
/// Runs on its own thread: a blocking stdin read must not hold up runtime
/// shutdown.
fn spawn_key_reader(tx: mpsc::Sender<ScannerCommand>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("attend-console".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed; console controls disabled");
                        return;
                    }
                };
                let command = match parse_key(&line) {
                    Some(command) => command,
                    None => continue,
                };
                if tx.blocking_send(command).is_err() || command == ScannerCommand::Quit {
                    return;
                }
            }
            tracing::debug!("stdin closed; console controls disabled");
        })?;
    Ok(())
}

fn parse_key(line: &str) -> Option<ScannerCommand> {
    match line.trim() {
        "p" | "P" => Some(ScannerCommand::Trigger),
        "q" | "Q" => Some(ScannerCommand::Quit),
        "" => None,
        other => {
            tracing::debug!(input = other, "ignoring console input");
            None
        }
    }
}
