//! Touchpad toggle through the Linux input class in sysfs
//!
//! Every input device exposes `/sys/class/input/inputN/name`, and kernels
//! since 5.11 also expose `inhibited`. Writing "1" there stops the device
//! from producing events; writing "0" restores it.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{DeviceError, DeviceToggle};

/// Default sysfs input class directory
pub const SYSFS_INPUT_ROOT: &str = "/sys/class/input";

/// A touchpad found under the sysfs input class
#[derive(Debug, Clone)]
pub struct SysfsTouchpad {
    name: String,
    inhibit_path: PathBuf,
}

impl SysfsTouchpad {
    /// Locate the first touchpad in the system input class
    pub fn discover() -> Result<Self, DeviceError> {
        Self::discover_in(Path::new(SYSFS_INPUT_ROOT))
    }

    /// Locate the first input device under `root` whose name mentions a touchpad
    pub fn discover_in(root: &Path) -> Result<Self, DeviceError> {
        let mut entries: Vec<PathBuf> = fs::read_dir(root)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("input"))
            })
            .collect();
        entries.sort();

        for dir in entries {
            let Ok(name) = fs::read_to_string(dir.join("name")) else {
                continue;
            };
            let name = name.trim().to_string();
            let inhibit_path = dir.join("inhibited");

            if name.to_lowercase().contains("touchpad") && inhibit_path.exists() {
                info!(%name, path = ?dir, "touchpad device found");
                return Ok(Self { name, inhibit_path });
            }
            debug!(%name, "skipping input device");
        }

        Err(DeviceError::NotFound)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl DeviceToggle for SysfsTouchpad {
    fn set_enabled(&self, enabled: bool) -> Result<(), DeviceError> {
        fs::write(&self.inhibit_path, if enabled { "0" } else { "1" })?;
        debug!(device = %self.name, enabled, "touchpad switched");
        Ok(())
    }
}
