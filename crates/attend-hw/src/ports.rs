//! Serial trigger port discovery.
//!
//! Walks the kernel's tty class in sysfs and matches USB vendor:product ids
//! against a table of known USB-serial bridges, embedded at compile time
//! from `contrib/hw/serial-bridges.toml`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const BRIDGE_TABLE: &str = include_str!("../../../contrib/hw/serial-bridges.toml");

static BRIDGES: OnceLock<Vec<BridgeInfo>> = OnceLock::new();

#[derive(Debug, Deserialize)]
struct BridgeTable {
    bridge: Vec<BridgeInfo>,
}

/// A known USB-serial bridge chip.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: String,
}

/// A tty device that might carry the motion sensor.
#[derive(Debug, Clone)]
pub struct SerialCandidate {
    /// `/dev/ttyUSB0`, `/dev/ttyACM0`, ...
    pub path: String,
    pub usb_ids: Option<(u16, u16)>,
    pub bridge: Option<&'static BridgeInfo>,
}

fn bridges() -> &'static [BridgeInfo] {
    BRIDGES.get_or_init(|| match toml::from_str::<BridgeTable>(BRIDGE_TABLE) {
        Ok(table) => table.bridge,
        Err(e) => {
            tracing::error!(error = %e, "bad serial bridge table");
            Vec::new()
        }
    })
}

/// Look up a bridge by USB vendor:product id.
pub fn lookup_bridge(vid: u16, pid: u16) -> Option<&'static BridgeInfo> {
    bridges()
        .iter()
        .find(|b| b.vendor_id == vid && b.product_id == pid)
}

pub fn known_bridges() -> &'static [BridgeInfo] {
    bridges()
}

/// USB-attached serial ttys, known bridges first, then by path.
pub fn list_candidates() -> Vec<SerialCandidate> {
    list_candidates_in(Path::new("/sys/class/tty"))
}

/// Best guess at the trigger port, or `None` to run without a sensor.
pub fn discover_serial_bridge() -> Option<SerialCandidate> {
    let found = list_candidates().into_iter().next();
    match &found {
        Some(c) => tracing::info!(
            path = %c.path,
            bridge = c.bridge.map(|b| b.name.as_str()).unwrap_or("unknown"),
            "serial trigger candidate found"
        ),
        None => tracing::debug!("no USB serial devices found"),
    }
    found
}

fn list_candidates_in(tty_class: &Path) -> Vec<SerialCandidate> {
    let Ok(entries) = std::fs::read_dir(tty_class) else {
        return Vec::new();
    };

    let mut candidates: Vec<SerialCandidate> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            if !(name.starts_with("ttyUSB") || name.starts_with("ttyACM")) {
                return None;
            }
            let usb_ids = usb_ids_for(&entry.path().join("device"));
            Some(SerialCandidate {
                path: format!("/dev/{name}"),
                usb_ids,
                bridge: usb_ids.and_then(|(vid, pid)| lookup_bridge(vid, pid)),
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.bridge
            .is_some()
            .cmp(&a.bridge.is_some())
            .then_with(|| a.path.cmp(&b.path))
    });
    candidates
}

/// Climb from the tty's `device` link to the USB device directory holding
/// `idVendor` / `idProduct`.
fn usb_ids_for(device_link: &Path) -> Option<(u16, u16)> {
    let mut dir: PathBuf = std::fs::canonicalize(device_link).ok()?;
    for _ in 0..4 {
        if let Some(ids) = read_usb_ids(&dir) {
            return Some(ids);
        }
        dir = dir.parent()?.to_path_buf();
    }
    None
}

fn read_usb_ids(dir: &Path) -> Option<(u16, u16)> {
    let vid = std::fs::read_to_string(dir.join("idVendor")).ok()?;
    let pid = std::fs::read_to_string(dir.join("idProduct")).ok()?;
    let vid = u16::from_str_radix(vid.trim(), 16).ok()?;
    let pid = u16::from_str_radix(pid.trim(), 16).ok()?;
    Some((vid, pid))
}
