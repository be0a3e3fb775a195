//! Registry of the bindings the machine holds with the key source
//!
//! Every slot holds a live handle iff that binding is currently registered
//! with the `KeyEventSource`. Installing into an occupied slot always
//! removes the previous registration first, so a key can never end up with
//! two suppressors each claiming its events.

use tracing::{debug, warn};

use crate::config::Config;
use crate::hotkey::{BindingAction, BindingHandle, Key, KeyEventSource, MouseButton, SourceError};

/// Two configuration roles claim the same key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{first} and {second} are both bound to '{key}'")]
pub struct BindingConflict {
    pub key: Key,
    pub first: &'static str,
    pub second: &'static str,
}

impl BindingConflict {
    /// Fail on the first pair of roles sharing a key
    pub fn check(roles: &[(&'static str, &Key)]) -> Result<(), BindingConflict> {
        for (i, (first, key)) in roles.iter().enumerate() {
            if let Some((second, _)) = roles[i + 1..].iter().find(|(_, other)| other == key) {
                return Err(BindingConflict {
                    key: (*key).clone(),
                    first: *first,
                    second: *second,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Binding {
    handle: BindingHandle,
    key: Key,
    action: BindingAction,
}

/// Keys currently bound, by role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingSnapshot {
    pub hotkey_intercept: Option<Key>,
    pub repeat_guard: Option<Key>,
    pub left: Option<Key>,
    pub right: Option<Key>,
}

/// The machine's binding set
#[derive(Debug, Default)]
pub struct BindingRegistry {
    hotkey_intercept: Option<Binding>,
    repeat_guard: Option<Binding>,
    left: Option<Binding>,
    right: Option<Binding>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppress the hotkey so its presses never reach the OS unannounced
    pub fn install_intercept(
        &mut self,
        source: &dyn KeyEventSource,
        hotkey: &Key,
    ) -> Result<(), SourceError> {
        install(&mut self.hotkey_intercept, source, hotkey, BindingAction::Intercept)
    }

    pub fn remove_intercept(&mut self, source: &dyn KeyEventSource) {
        release(&mut self.hotkey_intercept, source);
    }

    /// Swallow OS key-repeat downs of the hotkey while a long press is held
    pub fn install_repeat_guard(
        &mut self,
        source: &dyn KeyEventSource,
        hotkey: &Key,
    ) -> Result<(), SourceError> {
        install(&mut self.repeat_guard, source, hotkey, BindingAction::Intercept)
    }

    pub fn remove_repeat_guard(&mut self, source: &dyn KeyEventSource) {
        release(&mut self.repeat_guard, source);
    }

    /// Bind the click keys, replacing any stale click bindings
    pub fn install_clicks(
        &mut self,
        source: &dyn KeyEventSource,
        left: &Key,
        right: &Key,
    ) -> Result<(), SourceError> {
        self.remove_clicks(source);
        install(
            &mut self.left,
            source,
            left,
            BindingAction::Click(MouseButton::Left),
        )?;
        install(
            &mut self.right,
            source,
            right,
            BindingAction::Click(MouseButton::Right),
        )
    }

    pub fn remove_clicks(&mut self, source: &dyn KeyEventSource) {
        release(&mut self.left, source);
        release(&mut self.right, source);
    }

    /// Remove every binding
    pub fn clear(&mut self, source: &dyn KeyEventSource) {
        self.remove_intercept(source);
        self.remove_repeat_guard(source);
        self.remove_clicks(source);
    }

    /// Replace all bindings with those derived from `config`
    ///
    /// Conflicting keys reject the configuration before anything is
    /// touched. Source failures leave the affected slot empty and are
    /// logged; they do not abort the rebind.
    pub fn rebind(
        &mut self,
        source: &dyn KeyEventSource,
        config: &Config,
        touchpad_active: bool,
        intercept_hotkey: bool,
    ) -> Result<(), BindingConflict> {
        BindingConflict::check(&config.roles())?;

        self.clear(source);

        if intercept_hotkey {
            if let Err(e) = self.install_intercept(source, &config.hotkey) {
                warn!(%e, hotkey = %config.hotkey, "failed to intercept hotkey");
            }
        }

        if touchpad_active {
            if let Err(e) =
                self.install_clicks(source, &config.left_click_key, &config.right_click_key)
            {
                warn!(%e, "failed to bind click keys");
            }
        }

        Ok(())
    }

    /// Mouse button emulated by `key`, if it is currently bound to one
    pub fn button_for(&self, key: &Key) -> Option<MouseButton> {
        [&self.left, &self.right]
            .into_iter()
            .flatten()
            .find(|b| &b.key == key)
            .and_then(|b| match b.action {
                BindingAction::Click(button) => Some(button),
                BindingAction::Intercept => None,
            })
    }

    pub fn snapshot(&self) -> BindingSnapshot {
        let key = |slot: &Option<Binding>| slot.as_ref().map(|b| b.key.clone());
        BindingSnapshot {
            hotkey_intercept: key(&self.hotkey_intercept),
            repeat_guard: key(&self.repeat_guard),
            left: key(&self.left),
            right: key(&self.right),
        }
    }
}

fn install(
    slot: &mut Option<Binding>,
    source: &dyn KeyEventSource,
    key: &Key,
    action: BindingAction,
) -> Result<(), SourceError> {
    release(slot, source);
    let handle = source.add_binding(key, action, true)?;
    debug!(%key, ?action, handle = handle.id(), "binding installed");
    *slot = Some(Binding {
        handle,
        key: key.clone(),
        action,
    });
    Ok(())
}

fn release(slot: &mut Option<Binding>, source: &dyn KeyEventSource) {
    let Some(binding) = slot.take() else {
        return;
    };
    match source.remove_binding(binding.handle) {
        Ok(()) => debug!(key = %binding.key, "binding removed"),
        Err(SourceError::NotRegistered(_)) => {
            debug!(key = %binding.key, "binding was already gone")
        }
        Err(e) => warn!(%e, key = %binding.key, "failed to remove binding"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSource;

    fn config() -> Config {
        Config::default()
    }

    #[test]
    fn test_conflict_check() {
        let a = Key::new("f1");
        let b = Key::new("f2");
        assert!(BindingConflict::check(&[("hotkey", &a), ("left click", &b)]).is_ok());

        let err = BindingConflict::check(&[("hotkey", &a), ("left click", &b), ("right click", &a)])
            .unwrap_err();
        assert_eq!(err.key, a);
        assert_eq!(err.first, "hotkey");
        assert_eq!(err.second, "right click");
    }

    #[test]
    fn test_rebind_inactive_binds_only_hotkey() {
        let source = RecordingSource::new();
        let mut registry = BindingRegistry::new();

        registry.rebind(&source, &config(), false, true).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.hotkey_intercept, Some(Key::new("f1")));
        assert_eq!(snapshot.left, None);
        assert_eq!(source.total_bindings(), 1);
    }

    #[test]
    fn test_rebind_twice_is_idempotent() {
        let source = RecordingSource::new();
        let mut registry = BindingRegistry::new();

        registry.rebind(&source, &config(), true, true).unwrap();
        let first = registry.snapshot();
        let count = source.total_bindings();

        registry.rebind(&source, &config(), true, true).unwrap();
        assert_eq!(registry.snapshot(), first);
        assert_eq!(source.total_bindings(), count);
        assert_eq!(source.binding_count(&Key::new("f2")), 1);
        assert_eq!(source.binding_count(&Key::new("f3")), 1);
    }

    #[test]
    fn test_rebind_conflict_leaves_bindings_untouched() {
        let source = RecordingSource::new();
        let mut registry = BindingRegistry::new();
        registry.rebind(&source, &config(), true, true).unwrap();
        let before = registry.snapshot();

        let bad = Config {
            right_click_key: Key::new("f2"),
            ..config()
        };
        assert!(registry.rebind(&source, &bad, true, true).is_err());
        assert_eq!(registry.snapshot(), before);
        assert_eq!(source.total_bindings(), 3);
    }

    #[test]
    fn test_install_clicks_replaces_stale_bindings() {
        let source = RecordingSource::new();
        let mut registry = BindingRegistry::new();

        registry
            .install_clicks(&source, &Key::new("f2"), &Key::new("f3"))
            .unwrap();
        registry
            .install_clicks(&source, &Key::new("j"), &Key::new("k"))
            .unwrap();

        assert_eq!(source.binding_count(&Key::new("f2")), 0);
        assert_eq!(registry.button_for(&Key::new("j")), Some(MouseButton::Left));
        assert_eq!(registry.button_for(&Key::new("k")), Some(MouseButton::Right));
        assert_eq!(registry.button_for(&Key::new("f2")), None);
    }

    #[test]
    fn test_release_tolerates_missing_registration() {
        let source = RecordingSource::new();
        let mut registry = BindingRegistry::new();
        registry.install_intercept(&source, &Key::new("f1")).unwrap();

        source.forget_all();
        registry.clear(&source);

        assert_eq!(registry.snapshot(), BindingSnapshot::default());
    }
}
