//! State machine module for hotkey classification
//!
//! Provides an explicit state machine with three states:
//! - Idle: hotkey released
//! - Pressed: hotkey down, still within the response time
//! - LongPressTriggered: hotkey held past the response time; the touchpad
//!   was switched and stays that way until release (Hold) or the next long
//!   press (Toggle)

mod bindings;
mod machine;
mod timer;

pub use bindings::BindingConflict;
pub use machine::{HotkeyMachine, HotkeyState, MachineStatus};
