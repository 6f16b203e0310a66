use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use arboard::Clipboard;

use crate::error::{Result, XpanderError};

/// Get the current clipboard content as text.
pub fn get_clipboard_text() -> Result<String> {
    let mut clipboard = Clipboard::new().map_err(|e| XpanderError::ClipboardUnavailable(e.to_string()))?;
    clipboard
        .get_text()
        .map_err(|e| XpanderError::ClipboardUnavailable(e.to_string()))
}

/// Set the clipboard content as text.
pub fn set_clipboard_text(text: &str) -> Result<()> {
    let mut clipboard = Clipboard::new().map_err(|e| XpanderError::ClipboardUnavailable(e.to_string()))?;
    clipboard
        .set_text(text)
        .map_err(|e| XpanderError::ClipboardUnavailable(e.to_string()))
}

/// Clipboard read with a hard deadline, for the expansion path: a wedged
/// clipboard owner must not stall injection. Empty string on failure or
/// timeout.
pub fn read_clipboard(timeout: Duration) -> String {
    read_with_timeout(timeout, get_clipboard_text)
}

/// Primary-selection read with the same deadline rules. Platforms without a
/// primary selection yield an empty string.
pub fn read_selection(timeout: Duration) -> String {
    read_with_timeout(timeout, get_selection_text)
}

#[cfg(target_os = "linux")]
fn get_selection_text() -> Result<String> {
    use arboard::{GetExtLinux, LinuxClipboardKind};

    let mut clipboard = Clipboard::new().map_err(|e| XpanderError::ClipboardUnavailable(e.to_string()))?;
    clipboard
        .get()
        .clipboard(LinuxClipboardKind::Primary)
        .text()
        .map_err(|e| XpanderError::ClipboardUnavailable(e.to_string()))
}

#[cfg(not(target_os = "linux"))]
fn get_selection_text() -> Result<String> {
    Ok(String::new())
}

fn read_with_timeout(timeout: Duration, read: fn() -> Result<String>) -> String {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(read());
    });
    match rx.recv_timeout(timeout) {
        Ok(Ok(text)) => text,
        Ok(Err(err)) => {
            log::warn!("clipboard read failed: {}", err);
            String::new()
        }
        Err(_) => {
            log::warn!("clipboard read timed out after {:?}", timeout);
            String::new()
        }
    }
}
