//! macOS key capture and mouse emulation using CGEventTap
//!
//! The tap runs on a dedicated thread with its own CFRunLoop. Unlike a
//! listen-only tap it is installed as an active filter, so the hook's
//! verdict decides whether each key event reaches the focused app.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement,
    CGEventTapProxy, CGEventType, CGKeyCode, CGMouseButton, EventField,
};
use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};
use tracing::{debug, error, info, warn};

use super::ClickEmulator;
use crate::hotkey::{
    BindingAction, BindingHandle, BindingTable, Key, KeyDirection, KeyEvent, KeyEventSource,
    KeyHook, MouseButton, SourceError, Verdict,
};

/// Virtual keycodes of the ANSI layout, by configuration name
const KEYCODES: &[(CGKeyCode, &str)] = &[
    (0, "a"), (1, "s"), (2, "d"), (3, "f"), (4, "h"), (5, "g"), (6, "z"),
    (7, "x"), (8, "c"), (9, "v"), (11, "b"), (12, "q"), (13, "w"), (14, "e"),
    (15, "r"), (16, "y"), (17, "t"), (31, "o"), (32, "u"), (34, "i"),
    (35, "p"), (37, "l"), (38, "j"), (40, "k"), (45, "n"), (46, "m"),
    (18, "1"), (19, "2"), (20, "3"), (21, "4"), (23, "5"), (22, "6"),
    (26, "7"), (28, "8"), (25, "9"), (29, "0"),
    (36, "enter"), (48, "tab"), (49, "space"), (51, "backspace"), (53, "esc"),
    (122, "f1"), (120, "f2"), (99, "f3"), (118, "f4"), (96, "f5"), (97, "f6"),
    (98, "f7"), (100, "f8"), (101, "f9"), (109, "f10"), (103, "f11"),
    (111, "f12"), (105, "f13"), (107, "f14"), (113, "f15"), (106, "f16"),
    (64, "f17"), (79, "f18"), (80, "f19"),
    (123, "left"), (124, "right"), (125, "down"), (126, "up"),
    (115, "home"), (116, "page_up"), (117, "delete"), (119, "end"),
    (121, "page_down"),
];

fn key_for_code(code: CGKeyCode) -> Option<Key> {
    KEYCODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| Key::new(name))
}

fn code_for_key(key: &Key) -> Option<CGKeyCode> {
    KEYCODES
        .iter()
        .find(|(_, name)| *name == key.name())
        .map(|(c, _)| *c)
}

/// State shared between the source handle and the tap thread
#[derive(Default)]
struct Shared {
    hook: Mutex<Option<KeyHook>>,
    bindings: Mutex<BindingTable>,
}

impl Shared {
    fn filter(&self, event: &KeyEvent) -> Verdict {
        let hook = self
            .hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let verdict = hook.map_or(Verdict::Pass, |hook| hook(event));

        let bound = self
            .bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .suppresses(&event.key);
        if verdict == Verdict::Suppress || bound {
            Verdict::Suppress
        } else {
            Verdict::Pass
        }
    }
}

/// Global key source backed by an active CGEventTap
pub struct EventTapSource {
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
}

impl EventTapSource {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn post_key(&self, code: CGKeyCode, down: bool) -> Result<(), SourceError> {
        let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState)
            .map_err(|_| SourceError::Backend("failed to create event source".to_string()))?;
        let event = CGEvent::new_keyboard_event(source, code, down)
            .map_err(|_| SourceError::Backend("failed to create key event".to_string()))?;
        event.post(CGEventTapLocation::HID);
        Ok(())
    }
}

impl Default for EventTapSource {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyEventSource for EventTapSource {
    fn attach(&self, hook: KeyHook) -> Result<(), SourceError> {
        *self
            .shared
            .hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(hook);

        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let running = Arc::clone(&self.running);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        thread::Builder::new()
            .name("key-tap".to_string())
            .spawn(move || {
                info!("key tap thread started");
                let result = run_event_loop(shared, Arc::clone(&running), &ready_tx);
                if let Err(e) = &result {
                    error!(%e, "key tap stopped");
                    let _ = ready_tx.send(Err(e.to_string()));
                }
                running.store(false, Ordering::SeqCst);
                info!("key tap thread stopped");
            })
            .map_err(|e| SourceError::Backend(format!("failed to spawn tap thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(SourceError::Unavailable(message)),
            Err(_) => Err(SourceError::Unavailable("tap thread exited".to_string())),
        }
    }

    fn detach(&self) {
        self.running.store(false, Ordering::SeqCst);
        *self
            .shared
            .hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn add_binding(
        &self,
        key: &Key,
        action: BindingAction,
        suppress: bool,
    ) -> Result<BindingHandle, SourceError> {
        if code_for_key(key).is_none() {
            return Err(SourceError::UnknownKey(key.clone()));
        }
        let mut table = self
            .shared
            .bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(table.insert(key, action, suppress))
    }

    fn remove_binding(&self, handle: BindingHandle) -> Result<(), SourceError> {
        let mut table = self
            .shared
            .bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        table.remove(handle).map(|_| ())
    }

    fn synthesize_tap(&self, key: &Key) -> Result<(), SourceError> {
        let code = code_for_key(key).ok_or_else(|| SourceError::UnknownKey(key.clone()))?;
        self.post_key(code, true)?;
        self.post_key(code, false)?;
        debug!(%key, code, "synthetic tap posted");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
enum TapError {
    #[error("failed to create event tap - check Accessibility permissions")]
    Creation,

    #[error("failed to create run loop source")]
    RunLoopSource,
}

/// Run the CFRunLoop with the event tap until `running` is cleared
fn run_event_loop(
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    ready_tx: &std::sync::mpsc::Sender<Result<(), String>>,
) -> Result<(), TapError> {
    // Must stay fast: the OS disables taps that stall the event stream
    let callback = move |_proxy: CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
          -> Option<CGEvent> {
        let direction = match event_type {
            CGEventType::KeyDown => KeyDirection::Down,
            CGEventType::KeyUp => KeyDirection::Up,
            CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                warn!("event tap disabled by the system");
                return Some(event.clone());
            }
            _ => return Some(event.clone()),
        };

        let code = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE);
        let Some(key) = CGKeyCode::try_from(code).ok().and_then(key_for_code) else {
            return Some(event.clone());
        };

        match shared.filter(&KeyEvent { key, direction }) {
            Verdict::Pass => Some(event.clone()),
            Verdict::Suppress => None,
        }
    };

    let tap = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::Default,
        vec![CGEventType::KeyDown, CGEventType::KeyUp],
        callback,
    )
    .map_err(|_| TapError::Creation)?;

    tap.enable();

    let run_loop_source = tap
        .mach_port
        .create_runloop_source(0)
        .map_err(|_| TapError::RunLoopSource)?;
    let run_loop = CFRunLoop::get_current();

    unsafe {
        run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
    }

    info!("event tap created and enabled");
    let _ = ready_tx.send(Ok(()));

    while running.load(Ordering::SeqCst) {
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, Duration::from_millis(100), true);
        }
    }

    Ok(())
}

/// Mouse button emulation through synthesized CGEvents
pub struct CgClickEmulator;

impl CgClickEmulator {
    fn post(&self, button: MouseButton, down: bool) -> Result<(), SourceError> {
        let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState)
            .map_err(|_| SourceError::Backend("failed to create event source".to_string()))?;

        // A null event carries the current cursor position
        let location = CGEvent::new(source.clone())
            .map_err(|_| SourceError::Backend("failed to read cursor position".to_string()))?
            .location();

        let (event_type, cg_button) = match (button, down) {
            (MouseButton::Left, true) => (CGEventType::LeftMouseDown, CGMouseButton::Left),
            (MouseButton::Left, false) => (CGEventType::LeftMouseUp, CGMouseButton::Left),
            (MouseButton::Right, true) => (CGEventType::RightMouseDown, CGMouseButton::Right),
            (MouseButton::Right, false) => (CGEventType::RightMouseUp, CGMouseButton::Right),
        };

        let event = CGEvent::new_mouse_event(source, event_type, location, cg_button)
            .map_err(|_| SourceError::Backend("failed to create mouse event".to_string()))?;
        event.post(CGEventTapLocation::HID);
        Ok(())
    }
}

impl ClickEmulator for CgClickEmulator {
    fn press(&self, button: MouseButton) {
        if let Err(e) = self.post(button, true) {
            warn!(%e, %button, "mouse press failed");
        }
    }

    fn release(&self, button: MouseButton) {
        if let Err(e) = self.post(button, false) {
            warn!(%e, %button, "mouse release failed");
        }
    }
}
