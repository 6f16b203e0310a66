use rdev::{self, Event, EventType, Key as RdevKey};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use xpander_core::engine::{Disposition, Engine};
use xpander_core::error::XpanderError;
use xpander_core::keyboard::rdev_key_to_char;
use xpander_core::models::{KeyEvent, KeyInput, ModState, Modifier};
use xpander_core::window::{WindowProvider, XWindowProvider};

/// Mutable listener state shared by the grab callback's clones: the held
/// modifiers and the focused-window cache.
struct ListenerState {
    modifiers: ModState,
    windows: Box<dyn WindowProvider>,
}

const MAX_GRAB_RETRIES: usize = 3;
const GRAB_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Starts the global input tap and routes every key event through the
/// engine. A suppressed event never reaches the focused application.
///
/// Tap installation can fail (missing input permissions, no display); the
/// returned receiver delivers the `InputTapUnavailable` error in that case
/// so the daemon can refuse to run a service that intercepts nothing.
pub fn start_keyboard_listener(
    engine: Arc<Engine>,
    window_cache: Duration,
) -> (JoinHandle<()>, Receiver<XpanderError>) {
    let state = Arc::new(Mutex::new(ListenerState {
        modifiers: ModState::default(),
        windows: Box::new(XWindowProvider::new(window_cache)),
    }));
    let (status_tx, status_rx) = mpsc::channel();

    let handle = thread::spawn(move || {
        let engine_cb = Arc::clone(&engine);
        let state_cb = Arc::clone(&state);
        let callback = move |event: Event| handle_event(&engine_cb, &state_cb, event);

        install_tap_with_retries(|| rdev::grab(callback.clone()), &status_tx);
    });
    (handle, status_rx)
}

/// grab() blocks for the life of the tap; a failure usually means missing
/// input permissions, so retry a few times before reporting defeat.
fn install_tap_with_retries<E: std::fmt::Debug>(
    mut grab: impl FnMut() -> std::result::Result<(), E>,
    status: &Sender<XpanderError>,
) {
    let mut retry_count = 0;
    while retry_count < MAX_GRAB_RETRIES {
        match grab() {
            Ok(_) => return,
            Err(err) => {
                retry_count += 1;
                log::error!(
                    "input tap failed ({:?}), retrying ({}/{})",
                    err,
                    retry_count,
                    MAX_GRAB_RETRIES
                );
                thread::sleep(GRAB_RETRY_DELAY);
            }
        }
    }
    let err = XpanderError::InputTapUnavailable(format!(
        "gave up after {} attempts; check input permissions",
        MAX_GRAB_RETRIES
    ));
    log::error!("{}", err);
    let _ = status.send(err);
}

fn handle_event(engine: &Engine, state: &Mutex<ListenerState>, event: Event) -> Option<Event> {
    let (key, is_press) = match event.event_type {
        EventType::KeyPress(key) => (key, true),
        EventType::KeyRelease(key) => (key, false),
        EventType::ButtonPress(_) => {
            engine.on_pointer_click();
            return Some(event);
        }
        _ => return Some(event),
    };

    let mut state = match state.lock() {
        Ok(state) => state,
        Err(_) => return Some(event), // poisoned; never hold keys hostage
    };

    if let Some(modifier) = modifier_for(&key) {
        state.modifiers.set(modifier, is_press);
        return Some(event);
    }

    let key_event = KeyEvent {
        input: translate_key(&key, &event),
        modifiers: state.modifiers,
        is_press,
        window: state.windows.active_window(),
    };
    drop(state);

    // A panic anywhere in the engine must never swallow the user's key.
    match panic::catch_unwind(AssertUnwindSafe(|| engine.on_key(&key_event))) {
        Ok(Disposition::Suppress) => None,
        Ok(Disposition::Propagate) => Some(event),
        Err(_) => {
            log::error!("engine panicked on a key event, propagating untouched");
            Some(event)
        }
    }
}

fn modifier_for(key: &RdevKey) -> Option<Modifier> {
    match key {
        RdevKey::ShiftLeft | RdevKey::ShiftRight => Some(Modifier::Shift),
        RdevKey::ControlLeft | RdevKey::ControlRight => Some(Modifier::Control),
        RdevKey::Alt | RdevKey::AltGr => Some(Modifier::Alt),
        RdevKey::MetaLeft | RdevKey::MetaRight => Some(Modifier::Super),
        _ => None,
    }
}

/// Map a raw key to the engine's view of it. Space, Return and Tab become
/// their characters so trigger classes can tell them apart.
fn translate_key(key: &RdevKey, event: &Event) -> KeyInput {
    match key {
        RdevKey::Space => KeyInput::Char(' '),
        RdevKey::Return => KeyInput::Char('\n'),
        RdevKey::Tab => KeyInput::Char('\t'),
        RdevKey::Backspace => KeyInput::Backspace,
        RdevKey::LeftArrow => KeyInput::Left,
        RdevKey::RightArrow => KeyInput::Right,
        RdevKey::UpArrow => KeyInput::Up,
        RdevKey::DownArrow => KeyInput::Down,
        RdevKey::Home => KeyInput::Home,
        RdevKey::End => KeyInput::End,
        RdevKey::PageUp => KeyInput::PageUp,
        RdevKey::PageDown => KeyInput::PageDown,
        _ => match rdev_key_to_char(key, event) {
            Some(c) => KeyInput::Char(c),
            None => KeyInput::Other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn event_with_name(key: RdevKey, name: Option<&str>) -> Event {
        Event {
            event_type: EventType::KeyPress(key),
            time: SystemTime::now(),
            name: name.map(|s| s.to_string()),
        }
    }

    #[test]
    fn space_return_tab_become_characters() {
        let ev = event_with_name(RdevKey::Space, Some(" "));
        assert_eq!(translate_key(&RdevKey::Space, &ev), KeyInput::Char(' '));
        assert_eq!(translate_key(&RdevKey::Return, &ev), KeyInput::Char('\n'));
        assert_eq!(translate_key(&RdevKey::Tab, &ev), KeyInput::Char('\t'));
    }

    #[test]
    fn named_keys_use_the_layout_resolved_name() {
        let ev = event_with_name(RdevKey::KeyA, Some("ä"));
        assert_eq!(translate_key(&RdevKey::KeyA, &ev), KeyInput::Char('ä'));
    }

    #[test]
    fn unnameable_keys_are_other() {
        let ev = event_with_name(RdevKey::F5, None);
        assert_eq!(translate_key(&RdevKey::F5, &ev), KeyInput::Other);
    }

    #[test]
    fn modifier_keys_are_recognized() {
        assert_eq!(modifier_for(&RdevKey::ShiftLeft), Some(Modifier::Shift));
        assert_eq!(modifier_for(&RdevKey::MetaRight), Some(Modifier::Super));
        assert_eq!(modifier_for(&RdevKey::KeyA), None);
    }

    #[test]
    fn exhausted_grab_retries_report_tap_unavailable() {
        let (tx, rx) = mpsc::channel();
        install_tap_with_retries(|| Err("no display"), &tx);
        assert!(matches!(
            rx.try_recv(),
            Ok(XpanderError::InputTapUnavailable(_))
        ));
    }

    #[test]
    fn installed_grab_reports_nothing() {
        let (tx, rx) = mpsc::channel();
        install_tap_with_retries(|| Ok::<(), &str>(()), &tx);
        assert!(rx.try_recv().is_err());
    }
}
