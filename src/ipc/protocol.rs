//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::config::{Config, Mode};
use crate::events::TouchpadEvent;
use crate::hotkey::Key;
use crate::state::MachineStatus;

/// Requests from UI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Flip between hold and toggle mode
    ToggleMode,

    /// Replace the whole configuration
    Reconfigure { config: Config },

    /// Re-read the configuration file
    ReloadConfig,

    /// Subscribe to touchpad event notifications
    Subscribe,

    /// Stop the daemon
    Shutdown,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Mode after a toggle
    ModeChanged { mode: Mode },

    /// Configuration now in effect
    ConfigApplied { config: Config },

    /// Subscription confirmed
    Subscribed,

    /// Daemon is stopping
    ShuttingDown,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl ToString) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Touchpad event occurred
    Event { event: TouchpadEvent },

    /// Notifications were dropped because the client fell behind
    Lagged { skipped: u64 },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Hotkey classification state
    pub state: String,

    /// Whether the touchpad is enabled
    pub touchpad_active: bool,

    /// Configuration in effect
    pub config: Config,

    /// Keys currently intercepted, hotkey first
    pub bound_keys: Vec<Key>,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl DaemonStatus {
    pub fn new(status: MachineStatus, uptime_secs: u64) -> Self {
        let bindings = status.bindings;
        let bound_keys = [
            bindings.hotkey_intercept,
            bindings.left,
            bindings.right,
        ]
        .into_iter()
        .flatten()
        .collect();

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: status.state.to_string(),
            touchpad_active: status.touchpad_active,
            config: (*status.config).clone(),
            bound_keys,
            uptime_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parsing() {
        let req: Request = serde_json::from_str(
            r#"{"type":"reconfigure","config":{"hot_key":"F5","mode":"toggle"}}"#,
        )
        .unwrap();
        match req {
            Request::Reconfigure { config } => {
                assert_eq!(config.hotkey, Key::new("f5"));
                assert_eq!(config.mode, Mode::Toggle);
                assert_eq!(config.left_click_key, Key::new("f2"));
            }
            other => panic!("unexpected request {:?}", other),
        }

        let req: Request = serde_json::from_str(r#"{"type":"toggle_mode"}"#).unwrap();
        assert!(matches!(req, Request::ToggleMode));
    }

    #[test]
    fn test_response_serialization() {
        let json = serde_json::to_string(&Response::ModeChanged { mode: Mode::Hold }).unwrap();
        assert_eq!(json, r#"{"type":"mode_changed","mode":"hold"}"#);

        let json = serde_json::to_string(&Response::error("invalid_config", "bad")).unwrap();
        assert!(json.contains(r#""code":"invalid_config""#));
    }

    #[test]
    fn test_notification_wraps_event() {
        let note = Notification::Event {
            event: TouchpadEvent::TouchpadDeactivated { duration_ms: 12 },
        };
        let value: serde_json::Value = serde_json::to_value(&note).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"]["type"], "touchpad_deactivated");
        assert_eq!(value["event"]["duration_ms"], 12);
    }
}
