//! Platform capabilities used by the hotkey machine
//!
//! The machine never talks to the OS directly. It is handed a key event
//! source, a device toggle and a click emulator, chosen once at startup by
//! `create_backends` according to the platform it was built for.

use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::hotkey::{
    BindingAction, BindingHandle, BindingTable, Key, KeyEventSource, KeyHook, MouseButton,
    SourceError,
};

#[cfg(target_os = "macos")]
pub mod macos;
pub mod sysfs;

/// Errors reported by a device toggle backend
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no touchpad device found")]
    NotFound,

    #[error("touchpad control is not supported on {0}")]
    Unsupported(&'static str),

    #[error("failed to switch touchpad: {0}")]
    Io(#[from] std::io::Error),
}

/// Enables or disables the touchpad
pub trait DeviceToggle: Send + Sync {
    fn set_enabled(&self, enabled: bool) -> Result<(), DeviceError>;

    /// Release backend resources before exit
    fn cleanup(&self) {}
}

/// Emulates mouse button presses
pub trait ClickEmulator: Send + Sync {
    fn press(&self, button: MouseButton);
    fn release(&self, button: MouseButton);
}

/// The capabilities selected for this platform
pub struct Backends {
    pub source: Arc<dyn KeyEventSource>,
    pub device: Arc<dyn DeviceToggle>,
    pub clicks: Arc<dyn ClickEmulator>,
}

/// Select the capabilities for the platform this binary was built for
#[cfg(target_os = "macos")]
pub fn create_backends() -> Backends {
    // No public API inhibits the built-in trackpad
    tracing::info!("touchpad device control unavailable, running with click emulation only");
    Backends {
        source: Arc::new(macos::EventTapSource::new()),
        device: Arc::new(UnsupportedDevice),
        clicks: Arc::new(macos::CgClickEmulator),
    }
}

/// Select the capabilities for the platform this binary was built for
#[cfg(target_os = "linux")]
pub fn create_backends() -> Backends {
    let device: Arc<dyn DeviceToggle> = match sysfs::SysfsTouchpad::discover() {
        Ok(touchpad) => {
            tracing::info!(device = touchpad.name(), "using sysfs touchpad");
            Arc::new(touchpad)
        }
        Err(e) => {
            warn!(%e, "touchpad device unavailable");
            Arc::new(UnsupportedDevice)
        }
    };

    Backends {
        source: Arc::new(UnavailableSource::default()),
        device,
        clicks: Arc::new(NoClicks),
    }
}

/// Select the capabilities for the platform this binary was built for
#[cfg(not(any(target_os = "macos", target_os = "linux")))]
pub fn create_backends() -> Backends {
    Backends {
        source: Arc::new(UnavailableSource::default()),
        device: Arc::new(UnsupportedDevice),
        clicks: Arc::new(NoClicks),
    }
}

/// Device toggle for platforms without touchpad control
pub struct UnsupportedDevice;

impl DeviceToggle for UnsupportedDevice {
    fn set_enabled(&self, _enabled: bool) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported(std::env::consts::OS))
    }
}

/// Click emulator for platforms without one
pub struct NoClicks;

impl ClickEmulator for NoClicks {
    fn press(&self, button: MouseButton) {
        warn!(%button, "mouse emulation not supported on this platform");
    }

    fn release(&self, _button: MouseButton) {}
}

/// Key source for platforms without a global key hook
///
/// Bindings are still tracked so the machine's bookkeeping stays honest,
/// but no events are ever delivered.
#[derive(Default)]
pub struct UnavailableSource {
    bindings: Mutex<BindingTable>,
}

impl KeyEventSource for UnavailableSource {
    fn attach(&self, _hook: KeyHook) -> Result<(), SourceError> {
        Err(SourceError::Unavailable(format!(
            "no global key hook on {}",
            std::env::consts::OS
        )))
    }

    fn detach(&self) {}

    fn add_binding(
        &self,
        key: &Key,
        action: BindingAction,
        suppress: bool,
    ) -> Result<BindingHandle, SourceError> {
        let mut table = self.bindings.lock().unwrap_or_else(|e| e.into_inner());
        Ok(table.insert(key, action, suppress))
    }

    fn remove_binding(&self, handle: BindingHandle) -> Result<(), SourceError> {
        let mut table = self.bindings.lock().unwrap_or_else(|e| e.into_inner());
        table.remove(handle).map(|_| ())
    }

    fn synthesize_tap(&self, key: &Key) -> Result<(), SourceError> {
        Err(SourceError::UnknownKey(key.clone()))
    }
}
