//! Key identifiers and key event definitions
//!
//! Keys are identified by their lower-cased name ("f1", "space", "a"), the
//! same names the configuration file uses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A key identifier, normalised to lower case
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Key(String);

impl Key {
    /// Create a key from any spelling of its name
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    /// The normalised key name
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Check if the name is empty after normalisation
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direction of a key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDirection {
    Down,
    Up,
}

/// A single key transition delivered by the key event source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub direction: KeyDirection,
}

impl KeyEvent {
    pub fn down(key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            direction: KeyDirection::Down,
        }
    }

    pub fn up(key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            direction: KeyDirection::Up,
        }
    }
}

/// Mouse buttons the auxiliary keys can emulate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MouseButton::Left => write!(f, "left"),
            MouseButton::Right => write!(f, "right"),
        }
    }
}
