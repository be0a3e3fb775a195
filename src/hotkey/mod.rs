//! Hotkey module for keyboard capture
//!
//! Key identifiers and the `KeyEventSource` capability the platform
//! backends implement. Sources report key transitions to a single hook and
//! keep per-key bindings that decide which events are kept from the OS.

mod keys;
mod source;

pub use keys::{Key, KeyDirection, KeyEvent, MouseButton};
pub use source::{
    BindingAction, BindingHandle, BindingTable, KeyEventSource, KeyHook, SourceError, Verdict,
};
