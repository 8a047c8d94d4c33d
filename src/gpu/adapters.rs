//! Display adapter enumeration from the PCI sysfs tree.

use super::GpuError;
use crate::core::AdapterEnumerator;
use std::fs;
use std::path::{Path, PathBuf};

/// PCI base class for display controllers.
const DISPLAY_CLASS_PREFIX: &str = "0x03";

/// Lists display controllers under a PCI sysfs root
/// (normally `/sys/bus/pci/devices`).
#[derive(Debug, Clone)]
pub struct PciAdapterEnumerator {
    root: PathBuf,
}

impl PciAdapterEnumerator {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

fn vendor_label(vendor_id: u16) -> &'static str {
    match vendor_id {
        0x10de => "NVIDIA Corporation",
        0x1002 | 0x1022 => "Advanced Micro Devices, Inc. [AMD/ATI] Radeon",
        0x8086 => "Intel Corporation",
        _ => "Unrecognized vendor",
    }
}

fn read_hex_id(path: &Path) -> Option<u16> {
    let raw = fs::read_to_string(path).ok()?;
    let raw = raw.trim();
    u16::from_str_radix(raw.trim_start_matches("0x"), 16).ok()
}

impl AdapterEnumerator for PciAdapterEnumerator {
    fn adapter_names(&self) -> Result<Vec<String>, GpuError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| GpuError::Enumeration(format!("{}: {}", self.root.display(), e)))?;

        let mut devices: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .collect();
        devices.sort();

        let names = devices
            .iter()
            .filter(|device| {
                fs::read_to_string(device.join("class"))
                    .is_ok_and(|class| class.trim().starts_with(DISPLAY_CLASS_PREFIX))
            })
            .filter_map(|device| {
                let vendor = read_hex_id(&device.join("vendor"))?;
                let product = read_hex_id(&device.join("device")).unwrap_or(0);
                Some(format!(
                    "{} [{:04x}:{:04x}]",
                    vendor_label(vendor),
                    vendor,
                    product
                ))
            })
            .collect();
        Ok(names)
    }
}
