//! The key event source seam
//!
//! A `KeyEventSource` delivers every system-wide key transition to a single
//! hook and lets the hook decide, synchronously, whether the event reaches
//! the OS. It also keeps a table of intercept bindings: a registered binding
//! suppresses its key at the platform level until it is removed.

use std::collections::HashMap;
use std::sync::Arc;

use super::keys::{Key, KeyEvent, MouseButton};

/// Decision returned by the hook for each key event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Let the event propagate to the OS
    Pass,
    /// Swallow the event
    Suppress,
}

/// Callback invoked by the source for every key event
pub type KeyHook = Arc<dyn Fn(&KeyEvent) -> Verdict + Send + Sync>;

/// Opaque handle for a registered binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingHandle(u64);

impl BindingHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// What a binding does with its key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingAction {
    /// Swallow the key and do nothing else
    Intercept,
    /// Swallow the key and emulate a mouse button with it
    Click(MouseButton),
}

/// Errors reported by key event sources
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("binding {0:?} is not registered")]
    NotRegistered(BindingHandle),

    #[error("key '{0}' is not known to this key source")]
    UnknownKey(Key),

    #[error("key event source unavailable: {0}")]
    Unavailable(String),

    #[error("key event source failed: {0}")]
    Backend(String),
}

/// System-wide key event stream with selective suppression
pub trait KeyEventSource: Send + Sync {
    /// Install the hook that receives every key event
    fn attach(&self, hook: KeyHook) -> Result<(), SourceError>;

    /// Stop delivering events to the hook
    fn detach(&self);

    /// Register an intercept binding for `key`
    fn add_binding(
        &self,
        key: &Key,
        action: BindingAction,
        suppress: bool,
    ) -> Result<BindingHandle, SourceError>;

    /// Remove a binding. Returns `NotRegistered` if the handle is unknown.
    fn remove_binding(&self, handle: BindingHandle) -> Result<(), SourceError>;

    /// Emit a programmatic down+up pair for `key`
    fn synthesize_tap(&self, key: &Key) -> Result<(), SourceError>;

    /// Release `key` at the OS level if the platform is holding it down.
    /// Must not deliver a hook event for the key.
    fn force_release(&self, _key: &Key) -> Result<(), SourceError> {
        Ok(())
    }
}

/// A registered binding as stored by a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredBinding {
    pub key: Key,
    pub action: BindingAction,
    pub suppress: bool,
}

/// Binding bookkeeping shared by source implementations
#[derive(Debug, Default)]
pub struct BindingTable {
    next_id: u64,
    bindings: HashMap<BindingHandle, RegisteredBinding>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &Key, action: BindingAction, suppress: bool) -> BindingHandle {
        self.next_id += 1;
        let handle = BindingHandle(self.next_id);
        self.bindings.insert(
            handle,
            RegisteredBinding {
                key: key.clone(),
                action,
                suppress,
            },
        );
        handle
    }

    pub fn remove(&mut self, handle: BindingHandle) -> Result<RegisteredBinding, SourceError> {
        self.bindings
            .remove(&handle)
            .ok_or(SourceError::NotRegistered(handle))
    }

    /// Check if any live binding suppresses `key`
    pub fn suppresses(&self, key: &Key) -> bool {
        self.bindings.values().any(|b| b.suppress && &b.key == key)
    }

    /// Number of live bindings for `key`
    #[cfg(test)]
    pub fn count_for(&self, key: &Key) -> usize {
        self.bindings.values().filter(|b| &b.key == key).count()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_insert_and_remove() {
        let mut table = BindingTable::new();
        let key = Key::new("f2");

        let handle = table.insert(&key, BindingAction::Click(MouseButton::Left), true);
        assert!(table.suppresses(&key));
        assert_eq!(table.count_for(&key), 1);

        let removed = table.remove(handle).unwrap();
        assert_eq!(removed.action, BindingAction::Click(MouseButton::Left));
        assert!(!table.suppresses(&key));
        assert!(table.is_empty());
    }

    #[test]
    fn test_table_remove_unknown_handle() {
        let mut table = BindingTable::new();
        let handle = table.insert(&Key::new("f1"), BindingAction::Intercept, true);
        table.remove(handle).unwrap();

        let err = table.remove(handle).unwrap_err();
        assert!(matches!(err, SourceError::NotRegistered(h) if h == handle));
    }

    #[test]
    fn test_handles_are_unique() {
        let mut table = BindingTable::new();
        let key = Key::new("f1");
        let a = table.insert(&key, BindingAction::Intercept, true);
        let b = table.insert(&key, BindingAction::Intercept, false);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }
}
