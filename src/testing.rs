//! Recording implementations of the platform capabilities for tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::backend::{Backends, ClickEmulator, DeviceError, DeviceToggle};
use crate::config::Config;
use crate::events::TouchpadEvent;
use crate::hotkey::{
    BindingAction, BindingHandle, BindingTable, Key, KeyEvent, KeyEventSource, KeyHook,
    MouseButton, SourceError, Verdict,
};
use crate::state::HotkeyMachine;

/// Key source that records bindings and synthetic taps
///
/// When echoing, a synthetic tap is delivered back to the attached hook as
/// a down+up pair, the way a real OS hook sees injected input.
#[derive(Default)]
pub struct RecordingSource {
    table: Mutex<BindingTable>,
    hook: Mutex<Option<KeyHook>>,
    taps: Mutex<Vec<Key>>,
    releases: Mutex<Vec<Key>>,
    echo: AtomicBool,
}

impl RecordingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn echoing() -> Self {
        let source = Self::default();
        source.echo.store(true, Ordering::SeqCst);
        source
    }

    /// Deliver an event to the attached hook as if it came from the OS
    pub fn send(&self, event: KeyEvent) -> Verdict {
        let hook = self.hook.lock().unwrap().clone();
        match hook {
            Some(hook) => hook(&event),
            None => Verdict::Pass,
        }
    }

    pub fn taps(&self) -> Vec<Key> {
        self.taps.lock().unwrap().clone()
    }

    pub fn releases(&self) -> Vec<Key> {
        self.releases.lock().unwrap().clone()
    }

    pub fn binding_count(&self, key: &Key) -> usize {
        self.table.lock().unwrap().count_for(key)
    }

    pub fn total_bindings(&self) -> usize {
        self.table.lock().unwrap().len()
    }

    pub fn is_attached(&self) -> bool {
        self.hook.lock().unwrap().is_some()
    }

    /// Drop every registration behind the registry's back
    pub fn forget_all(&self) {
        *self.table.lock().unwrap() = BindingTable::new();
    }
}

impl KeyEventSource for RecordingSource {
    fn attach(&self, hook: KeyHook) -> Result<(), SourceError> {
        *self.hook.lock().unwrap() = Some(hook);
        Ok(())
    }

    fn detach(&self) {
        *self.hook.lock().unwrap() = None;
    }

    fn add_binding(
        &self,
        key: &Key,
        action: BindingAction,
        suppress: bool,
    ) -> Result<BindingHandle, SourceError> {
        Ok(self.table.lock().unwrap().insert(key, action, suppress))
    }

    fn remove_binding(&self, handle: BindingHandle) -> Result<(), SourceError> {
        self.table.lock().unwrap().remove(handle).map(|_| ())
    }

    fn synthesize_tap(&self, key: &Key) -> Result<(), SourceError> {
        self.taps.lock().unwrap().push(key.clone());
        if self.echo.load(Ordering::SeqCst) {
            self.send(KeyEvent::down(key.clone()));
            self.send(KeyEvent::up(key.clone()));
        }
        Ok(())
    }

    fn force_release(&self, key: &Key) -> Result<(), SourceError> {
        self.releases.lock().unwrap().push(key.clone());
        Ok(())
    }
}

/// Device toggle that records every request
#[derive(Default)]
pub struct RecordingDevice {
    calls: Mutex<Vec<bool>>,
    fail: AtomicBool,
    cleanups: AtomicUsize,
}

impl RecordingDevice {
    pub fn calls(&self) -> Vec<bool> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

impl DeviceToggle for RecordingDevice {
    fn set_enabled(&self, enabled: bool) -> Result<(), DeviceError> {
        self.calls.lock().unwrap().push(enabled);
        if self.fail.load(Ordering::SeqCst) {
            Err(DeviceError::NotFound)
        } else {
            Ok(())
        }
    }

    fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

/// Click emulator that records (button, pressed) pairs
#[derive(Default)]
pub struct RecordingClicks {
    log: Mutex<Vec<(MouseButton, bool)>>,
}

impl RecordingClicks {
    pub fn log(&self) -> Vec<(MouseButton, bool)> {
        self.log.lock().unwrap().clone()
    }
}

impl ClickEmulator for RecordingClicks {
    fn press(&self, button: MouseButton) {
        self.log.lock().unwrap().push((button, true));
    }

    fn release(&self, button: MouseButton) {
        self.log.lock().unwrap().push((button, false));
    }
}

/// A started machine wired to recording capabilities
pub struct Harness {
    pub machine: Arc<HotkeyMachine>,
    pub source: Arc<RecordingSource>,
    pub device: Arc<RecordingDevice>,
    pub clicks: Arc<RecordingClicks>,
    pub events: broadcast::Receiver<TouchpadEvent>,
    pub event_tx: broadcast::Sender<TouchpadEvent>,
}

impl Harness {
    /// Build and start a machine on the current tokio runtime
    pub fn start(config: Config) -> Self {
        let source = Arc::new(RecordingSource::echoing());
        let device = Arc::new(RecordingDevice::default());
        let clicks = Arc::new(RecordingClicks::default());
        let (event_tx, events) = broadcast::channel(64);

        let backends = Backends {
            source: source.clone(),
            device: device.clone(),
            clicks: clicks.clone(),
        };
        let machine = HotkeyMachine::new(
            config,
            backends,
            event_tx.clone(),
            tokio::runtime::Handle::current(),
        )
        .unwrap();
        machine.start().unwrap();

        Self {
            machine,
            source,
            device,
            clicks,
            events,
            event_tx,
        }
    }

    pub fn press(&self, key: &str) -> Verdict {
        self.source.send(KeyEvent::down(key))
    }

    pub fn release(&self, key: &str) -> Verdict {
        self.source.send(KeyEvent::up(key))
    }

    /// Everything broadcast so far
    pub fn drain_events(&mut self) -> Vec<TouchpadEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
