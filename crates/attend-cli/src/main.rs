use anyhow::{Context, Result};
use attend_core::IdentityRegistry;
use attend_hw::ports::{self, SerialCandidate};
use attend_hw::Camera;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "attend", about = "Attendance scanner diagnostics")]
struct Cli {
    /// Print machine-readable JSON instead of a table
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List enrolled identities from the registry file
    Registry {
        /// Path to labels.json
        #[arg(short, long, env = "ATTEND_REGISTRY_PATH", default_value = "labels.json")]
        path: PathBuf,
    },
    /// List V4L2 capture devices
    Cameras,
    /// List USB serial ports that may carry the motion sensor
    Ports,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Registry { path } => {
            let registry = IdentityRegistry::load(&path)
                .with_context(|| format!("failed to load registry {}", path.display()))?;
            if cli.json {
                let entries: Vec<_> = registry
                    .iter()
                    .map(|(id, name)| json!({ "id": id, "name": name }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                println!("{} identities in {}", registry.len(), path.display());
                for (id, name) in registry.iter() {
                    println!("  {id:>4}  {name}");
                }
            }
        }
        Commands::Cameras => {
            let devices = Camera::list_devices();
            if cli.json {
                let entries: Vec<_> = devices
                    .iter()
                    .map(|d| {
                        json!({ "path": d.path, "name": d.name, "driver": d.driver, "bus": d.bus })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if devices.is_empty() {
                println!("No capture devices found");
            } else {
                for d in &devices {
                    println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
                }
            }
        }
        Commands::Ports => {
            let candidates = ports::list_candidates();
            if cli.json {
                let entries: Vec<_> = candidates.iter().map(candidate_json).collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if candidates.is_empty() {
                println!("No USB serial ports found; attendd will run with manual triggering");
            } else {
                for c in &candidates {
                    println!("{}  {}", c.path, describe(c));
                }
            }
        }
    }

    Ok(())
}

fn describe(c: &SerialCandidate) -> String {
    match (c.usb_ids, c.bridge) {
        (Some((vid, pid)), Some(bridge)) => format!("{vid:04x}:{pid:04x} {}", bridge.name),
        (Some((vid, pid)), None) => format!("{vid:04x}:{pid:04x} unknown bridge"),
        (None, _) => "no USB ids".to_string(),
    }
}

fn candidate_json(c: &SerialCandidate) -> serde_json::Value {
    json!({
        "path": c.path,
        "vendor_id": c.usb_ids.map(|(vid, _)| format!("{vid:04x}")),
        "product_id": c.usb_ids.map(|(_, pid)| format!("{pid:04x}")),
        "bridge": c.bridge.map(|b| b.name.as_str()),
    })
}
