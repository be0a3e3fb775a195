//! Core hotkey state machine
//!
//! Classifies hotkey presses as short taps or long presses and drives the
//! touchpad and click bindings accordingly.
//!
//! Three threads race here: the key source's hook thread, the timer task,
//! and control commands from the UI side. Press tracking, the pending timer,
//! the hotkey state, the touchpad flag and the binding set all live behind
//! one mutex. Device and click calls are made under it and must be fast;
//! synthetic key injection is made after it is released, because the source
//! may deliver the injected events straight back into the hook.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::{Backends, ClickEmulator, DeviceError, DeviceToggle};
use crate::config::{Config, ConfigError, Mode};
use crate::events::TouchpadEvent;
use crate::hotkey::{Key, KeyDirection, KeyEvent, KeyEventSource, KeyHook, MouseButton, SourceError, Verdict};

use super::bindings::{BindingRegistry, BindingSnapshot};
use super::timer::LongPressTimer;

/// Hotkey press classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HotkeyState {
    /// Hotkey released
    #[default]
    Idle,
    /// Hotkey down, long-press threshold not yet reached
    Pressed,
    /// Hotkey held past the threshold and the long press was handled
    LongPressTriggered,
}

impl std::fmt::Display for HotkeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HotkeyState::Idle => write!(f, "Idle"),
            HotkeyState::Pressed => write!(f, "Pressed"),
            HotkeyState::LongPressTriggered => write!(f, "LongPressTriggered"),
        }
    }
}

/// A tracked hotkey down
#[derive(Debug, Clone, Copy)]
struct PressRecord {
    id: u64,
    pressed_at: Instant,
}

/// Work that must run after the lock is released
enum Followup {
    None,
    SynthesizeTap(Key),
    ForceRelease(Key),
}

struct Inner {
    config: Arc<Config>,
    state: HotkeyState,
    press: Option<PressRecord>,
    timer: Option<LongPressTimer>,
    next_press_id: u64,
    touchpad_active: bool,
    active_since: Option<Instant>,
    /// Set while our own synthetic hotkey tap is in flight
    simulating: bool,
    bindings: BindingRegistry,
    held_buttons: HashSet<MouseButton>,
    shut_down: bool,
}

/// Point-in-time view of the machine
#[derive(Debug, Clone)]
pub struct MachineStatus {
    pub state: HotkeyState,
    pub touchpad_active: bool,
    pub config: Arc<Config>,
    pub bindings: BindingSnapshot,
}

/// The hotkey state machine
pub struct HotkeyMachine {
    inner: Mutex<Inner>,
    source: Arc<dyn KeyEventSource>,
    device: Arc<dyn DeviceToggle>,
    clicks: Arc<dyn ClickEmulator>,
    event_tx: broadcast::Sender<TouchpadEvent>,
    runtime: Handle,
    this: Weak<HotkeyMachine>,
}

impl HotkeyMachine {
    /// Create a machine; timers are spawned on `runtime`
    pub fn new(
        config: Config,
        backends: Backends,
        event_tx: broadcast::Sender<TouchpadEvent>,
        runtime: Handle,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;

        Ok(Arc::new_cyclic(|this| Self {
            inner: Mutex::new(Inner {
                config: Arc::new(config),
                state: HotkeyState::Idle,
                press: None,
                timer: None,
                next_press_id: 0,
                touchpad_active: false,
                active_since: None,
                simulating: false,
                bindings: BindingRegistry::new(),
                held_buttons: HashSet::new(),
                shut_down: false,
            }),
            source: backends.source,
            device: backends.device,
            clicks: backends.clicks,
            event_tx,
            runtime,
            this: this.clone(),
        }))
    }

    /// Intercept the hotkey and attach to the key source
    pub fn start(&self) -> Result<(), SourceError> {
        {
            let mut inner = self.lock();
            let hotkey = inner.config.hotkey.clone();
            inner.bindings.install_intercept(&*self.source, &hotkey)?;
            info!(
                hotkey = %hotkey,
                left = %inner.config.left_click_key,
                right = %inner.config.right_click_key,
                mode = %inner.config.mode,
                "hotkey machine started"
            );
        }
        self.source.attach(self.hook())
    }

    /// The callback the key source invokes for every event
    pub fn hook(&self) -> KeyHook {
        let this = self.this.clone();
        Arc::new(move |event: &KeyEvent| match this.upgrade() {
            Some(machine) => machine.handle_key_event(event),
            None => Verdict::Pass,
        })
    }

    /// Classify one key event and decide whether it reaches the OS
    pub fn handle_key_event(&self, event: &KeyEvent) -> Verdict {
        let (verdict, followup) = {
            let mut inner = self.lock();
            if inner.shut_down {
                return Verdict::Pass;
            }

            if event.key == inner.config.hotkey {
                match event.direction {
                    KeyDirection::Down => self.on_hotkey_down(&mut inner),
                    KeyDirection::Up => self.on_hotkey_up(&mut inner),
                }
            } else if let Some(button) = inner.bindings.button_for(&event.key) {
                self.dispatch_click(&mut inner, button, event.direction);
                (Verdict::Suppress, Followup::None)
            } else {
                (Verdict::Pass, Followup::None)
            }
        };

        self.run_followup(followup);
        verdict
    }

    fn on_hotkey_down(&self, inner: &mut Inner) -> (Verdict, Followup) {
        if inner.simulating {
            debug!("passing synthetic hotkey down");
            return (Verdict::Pass, Followup::None);
        }

        // OS key repeat while held
        if inner.press.is_some() {
            return (Verdict::Suppress, Followup::None);
        }

        inner.next_press_id += 1;
        let id = inner.next_press_id;
        let pressed_at = Instant::now();
        inner.press = Some(PressRecord { id, pressed_at });
        inner.state = HotkeyState::Pressed;

        self.arm_timer(inner, id, pressed_at);

        debug!(press_id = id, "hotkey pressed");
        (Verdict::Suppress, Followup::None)
    }

    /// Replace any pending timer with one for `press_id` at the current threshold
    fn arm_timer(&self, inner: &mut Inner, press_id: u64, pressed_at: Instant) {
        if let Some(stale) = inner.timer.take() {
            stale.cancel();
        }
        let this = self.this.clone();
        inner.timer = Some(LongPressTimer::arm(
            &self.runtime,
            pressed_at + inner.config.response_time,
            move || {
                if let Some(machine) = this.upgrade() {
                    machine.on_long_press(press_id);
                }
            },
        ));
    }

    fn on_hotkey_up(&self, inner: &mut Inner) -> (Verdict, Followup) {
        if inner.simulating {
            inner.simulating = false;
            self.reinstall_intercept(inner);
            debug!("passing synthetic hotkey up");
            return (Verdict::Pass, Followup::None);
        }

        let Some(press) = inner.press.take() else {
            debug!("ignoring hotkey release without a tracked press");
            return (Verdict::Pass, Followup::None);
        };
        if let Some(timer) = inner.timer.take() {
            timer.cancel();
        }

        let held_ms = press.pressed_at.elapsed().as_millis() as u64;
        match std::mem::take(&mut inner.state) {
            HotkeyState::LongPressTriggered => {
                inner.bindings.remove_repeat_guard(&*self.source);
                match inner.config.mode {
                    Mode::Hold => self.apply_activation(inner, false),
                    Mode::Toggle => debug!(held_ms, "long press released, toggle state kept"),
                }
                (Verdict::Suppress, Followup::None)
            }
            HotkeyState::Pressed | HotkeyState::Idle => {
                info!(held_ms, hotkey = %inner.config.hotkey, "short tap, forwarding hotkey");
                inner.simulating = true;
                inner.bindings.remove_intercept(&*self.source);
                (
                    Verdict::Suppress,
                    Followup::SynthesizeTap(inner.config.hotkey.clone()),
                )
            }
        }
    }

    /// Long-press timer callback
    fn on_long_press(&self, press_id: u64) {
        let followup = {
            let mut inner = self.lock();
            let press = match inner.press {
                Some(p) if p.id == press_id => p,
                _ => {
                    debug!(press_id, "stale long-press timer ignored");
                    return;
                }
            };
            if inner.shut_down || inner.state != HotkeyState::Pressed {
                debug!(press_id, "stale long-press timer ignored");
                return;
            }
            // Armed for an earlier, shorter threshold
            if press.pressed_at.elapsed() < inner.config.response_time {
                debug!(press_id, "long-press timer fired early, re-arming");
                self.arm_timer(&mut inner, press_id, press.pressed_at);
                return;
            }

            inner.timer = None;
            inner.state = HotkeyState::LongPressTriggered;

            let hotkey = inner.config.hotkey.clone();
            if let Err(e) = inner.bindings.install_repeat_guard(&*self.source, &hotkey) {
                warn!(%e, "failed to guard hotkey repeats");
            }

            let active = match inner.config.mode {
                Mode::Toggle => !inner.touchpad_active,
                Mode::Hold => true,
            };
            info!(press_id, mode = %inner.config.mode, active, "long press");
            self.apply_activation(&mut inner, active);

            Followup::ForceRelease(hotkey)
        };

        self.run_followup(followup);
    }

    /// Switch the touchpad and the click bindings together
    fn apply_activation(&self, inner: &mut Inner, active: bool) {
        if inner.touchpad_active == active {
            debug!(active, "touchpad already in requested state");
            return;
        }
        inner.touchpad_active = active;

        // The logical state stands even if the device refuses
        if let Err(e) = self.device.set_enabled(active) {
            match e {
                DeviceError::Unsupported(_) => warn!(%e, active, "touchpad left unchanged"),
                _ => error!(%e, active, "touchpad device switch failed"),
            }
            let _ = self.event_tx.send(TouchpadEvent::DeviceFailed {
                enabled: active,
                message: e.to_string(),
            });
        }

        let config = Arc::clone(&inner.config);
        if active {
            if let Err(e) = inner.bindings.install_clicks(
                &*self.source,
                &config.left_click_key,
                &config.right_click_key,
            ) {
                warn!(%e, "failed to bind click keys");
            }
            inner.active_since = Some(Instant::now());
            info!(left = %config.left_click_key, right = %config.right_click_key, "touchpad active, click keys bound");
            let _ = self.event_tx.send(TouchpadEvent::TouchpadActivated);
        } else {
            inner.bindings.remove_clicks(&*self.source);
            self.release_held_buttons(inner);
            let duration_ms = inner
                .active_since
                .take()
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0);
            info!(duration_ms, "touchpad inactive, click keys unbound");
            let _ = self
                .event_tx
                .send(TouchpadEvent::TouchpadDeactivated { duration_ms });
        }
    }

    fn dispatch_click(&self, inner: &mut Inner, button: MouseButton, direction: KeyDirection) {
        match direction {
            KeyDirection::Down => {
                if inner.held_buttons.insert(button) {
                    self.clicks.press(button);
                }
            }
            KeyDirection::Up => {
                if inner.held_buttons.remove(&button) {
                    self.clicks.release(button);
                }
            }
        }
    }

    fn release_held_buttons(&self, inner: &mut Inner) {
        for button in inner.held_buttons.drain() {
            debug!(%button, "releasing held mouse button");
            self.clicks.release(button);
        }
    }

    fn reinstall_intercept(&self, inner: &mut Inner) {
        let hotkey = inner.config.hotkey.clone();
        if let Err(e) = inner.bindings.install_intercept(&*self.source, &hotkey) {
            warn!(%e, %hotkey, "failed to intercept hotkey");
        }
    }

    fn run_followup(&self, followup: Followup) {
        match followup {
            Followup::None => {}
            Followup::SynthesizeTap(key) => {
                if let Err(e) = self.source.synthesize_tap(&key) {
                    warn!(%e, %key, "failed to forward hotkey tap");
                    self.finish_simulation();
                }
            }
            Followup::ForceRelease(key) => {
                if let Err(e) = self.source.force_release(&key) {
                    debug!(%e, %key, "hotkey force-release failed");
                }
            }
        }
    }

    /// Restore the intercept if the synthetic up never came back
    fn finish_simulation(&self) {
        let mut inner = self.lock();
        if inner.simulating && !inner.shut_down {
            inner.simulating = false;
            self.reinstall_intercept(&mut inner);
        }
    }

    /// Hold mode has no pending release to deactivate an active touchpad
    /// unless a long press is being held right now.
    fn settle_mode(&self, inner: &mut Inner) {
        if inner.config.mode == Mode::Hold
            && inner.touchpad_active
            && inner.state != HotkeyState::LongPressTriggered
        {
            info!("hold mode without a held hotkey, deactivating touchpad");
            self.apply_activation(inner, false);
        }
    }

    /// Atomically replace the configuration and all bindings
    pub fn reconfigure(&self, config: Config) -> Result<(), ConfigError> {
        config.validate()?;

        let mut inner = self.lock();
        let old = Arc::clone(&inner.config);
        let new = Arc::new(config);

        if inner.shut_down {
            inner.config = new;
            return Ok(());
        }

        let hotkey_changed = old.hotkey != new.hotkey;
        let intercept = hotkey_changed || !inner.simulating;
        let active = inner.touchpad_active;
        inner.bindings.rebind(&*self.source, &new, active, intercept)?;
        inner.config = Arc::clone(&new);

        if hotkey_changed {
            // Any tracked press belongs to the old hotkey
            if let Some(timer) = inner.timer.take() {
                timer.cancel();
            }
            inner.press = None;
            inner.state = HotkeyState::Idle;
            inner.simulating = false;
        } else {
            match (inner.state, inner.press) {
                (HotkeyState::LongPressTriggered, _) => {
                    if let Err(e) = inner.bindings.install_repeat_guard(&*self.source, &new.hotkey)
                    {
                        warn!(%e, "failed to guard hotkey repeats");
                    }
                }
                (HotkeyState::Pressed, Some(press)) if old.response_time != new.response_time => {
                    debug!(press_id = press.id, "re-arming long-press timer for new threshold");
                    self.arm_timer(&mut inner, press.id, press.pressed_at);
                }
                _ => {}
            }
        }

        info!(
            hotkey = %new.hotkey,
            left = %new.left_click_key,
            right = %new.right_click_key,
            mode = %new.mode,
            response_ms = new.response_time.as_millis() as u64,
            "configuration applied"
        );
        let _ = self.event_tx.send(TouchpadEvent::ConfigApplied);
        if old.mode != new.mode {
            let _ = self.event_tx.send(TouchpadEvent::ModeChanged { mode: new.mode });
        }

        self.settle_mode(&mut inner);
        Ok(())
    }

    /// Flip between Hold and Toggle mode; returns the new mode
    pub fn request_mode_toggle(&self) -> Mode {
        let mut inner = self.lock();
        let mut next = (*inner.config).clone();
        next.mode = next.mode.flipped();
        let mode = next.mode;
        inner.config = Arc::new(next);

        info!(%mode, "mode toggled");
        let _ = self.event_tx.send(TouchpadEvent::ModeChanged { mode });

        if !inner.shut_down {
            self.settle_mode(&mut inner);
        }
        mode
    }

    /// Cancel the timer, drop all bindings and force the touchpad inactive
    pub fn shutdown(&self) {
        {
            let mut inner = self.lock();
            if inner.shut_down {
                return;
            }
            inner.shut_down = true;

            if let Some(timer) = inner.timer.take() {
                timer.cancel();
            }
            inner.press = None;
            inner.state = HotkeyState::Idle;
            inner.simulating = false;
            inner.bindings.clear(&*self.source);
            self.release_held_buttons(&mut inner);

            let was_active = std::mem::replace(&mut inner.touchpad_active, false);
            if let Err(e) = self.device.set_enabled(false) {
                error!(%e, "failed to switch touchpad off during shutdown");
                let _ = self.event_tx.send(TouchpadEvent::DeviceFailed {
                    enabled: false,
                    message: e.to_string(),
                });
            }
            if was_active {
                let duration_ms = inner
                    .active_since
                    .take()
                    .map(|t| t.elapsed().as_millis() as u64)
                    .unwrap_or(0);
                let _ = self
                    .event_tx
                    .send(TouchpadEvent::TouchpadDeactivated { duration_ms });
            }
        }

        self.source.detach();
        self.device.cleanup();
        info!("hotkey machine shut down");
    }

    #[cfg(test)]
    pub fn state(&self) -> HotkeyState {
        self.lock().state
    }

    #[cfg(test)]
    pub fn touchpad_active(&self) -> bool {
        self.lock().touchpad_active
    }

    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.lock().config)
    }

    pub fn status(&self) -> MachineStatus {
        let inner = self.lock();
        MachineStatus {
            state: inner.state,
            touchpad_active: inner.touchpad_active,
            config: Arc::clone(&inner.config),
            bindings: inner.bindings.snapshot(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
