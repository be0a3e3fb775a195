//! Events module for touchpad activation changes
//!
//! The hotkey machine is the only writer of the touchpad state. Tray icons,
//! on-screen indicators and other observers learn about it exclusively
//! through these events.

use serde::{Deserialize, Serialize};

use crate::config::Mode;

/// Events emitted by the hotkey machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TouchpadEvent {
    /// Touchpad became active (long press, or toggle on)
    TouchpadActivated,

    /// Touchpad became inactive
    TouchpadDeactivated {
        /// Duration in milliseconds that the touchpad was active
        duration_ms: u64,
    },

    /// Operating mode changed
    ModeChanged { mode: Mode },

    /// The device backend refused an enable/disable request
    DeviceFailed {
        /// Requested device state
        enabled: bool,
        message: String,
    },

    /// A new configuration was installed
    ConfigApplied,
}

impl TouchpadEvent {
    /// Activation state carried by this event, if any
    pub fn activation(&self) -> Option<bool> {
        match self {
            TouchpadEvent::TouchpadActivated => Some(true),
            TouchpadEvent::TouchpadDeactivated { .. } => Some(false),
            _ => None,
        }
    }
}

impl std::fmt::Display for TouchpadEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TouchpadEvent::TouchpadActivated => write!(f, "TOUCHPAD_ACTIVATED"),
            TouchpadEvent::TouchpadDeactivated { duration_ms } => {
                write!(f, "TOUCHPAD_DEACTIVATED ({}ms)", duration_ms)
            }
            TouchpadEvent::ModeChanged { mode } => write!(f, "MODE_CHANGED ({})", mode),
            TouchpadEvent::DeviceFailed { enabled, message } => {
                write!(f, "DEVICE_FAILED (enable={}): {}", enabled, message)
            }
            TouchpadEvent::ConfigApplied => write!(f, "CONFIG_APPLIED"),
        }
    }
}
