use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Result, XpanderError};

/// One configured keyboard layout: group plus optional variant,
/// e.g. `us(intl)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    pub group: String,
    pub variant: String,
}

impl Layout {
    pub fn label(&self) -> String {
        if self.variant.is_empty() {
            self.group.clone()
        } else {
            format!("{}({})", self.group, self.variant)
        }
    }
}

/// Queries the active keyboard layout on demand and watches for switches.
/// Backed by `setxkbmap -query` and `xkb-switch`; query failures fall back
/// to the last-known layout.
pub struct LayoutMonitor {
    current: Mutex<Layout>,
    configured: Vec<Layout>,
}

impl LayoutMonitor {
    pub fn new() -> Arc<Self> {
        let configured = query_configured().unwrap_or_else(|err| {
            log::warn!("cannot enumerate keyboard layouts: {}", err);
            Vec::new()
        });
        let current = query_current().unwrap_or_else(|err| {
            log::warn!("cannot query active keyboard layout: {}", err);
            configured.first().cloned().unwrap_or_default()
        });
        log::debug!(
            "keyboard layouts: {:?}, active: {}",
            configured.iter().map(Layout::label).collect::<Vec<_>>(),
            current.label()
        );
        Arc::new(Self {
            current: Mutex::new(current),
            configured,
        })
    }

    /// The active layout. Re-queries the backend; on failure returns the
    /// last-known layout.
    pub fn current(&self) -> Layout {
        let mut guard = self.current.lock().unwrap();
        match query_current() {
            Ok(layout) => {
                *guard = layout.clone();
                layout
            }
            Err(err) => {
                log::debug!("layout query failed, using last known: {}", err);
                guard.clone()
            }
        }
    }

    pub fn configured(&self) -> &[Layout] {
        &self.configured
    }

    /// Poll for layout switches on a background thread, invoking `callback`
    /// with the new layout on every change. Stops when `running` clears.
    pub fn watch(
        self: &Arc<Self>,
        running: Arc<AtomicBool>,
        callback: impl Fn(Layout) + Send + 'static,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        thread::spawn(move || {
            let mut last = monitor.current.lock().unwrap().clone();
            while running.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(500));
                if let Ok(layout) = query_current() {
                    if layout != last {
                        log::info!("keyboard layout switched to {}", layout.label());
                        *monitor.current.lock().unwrap() = layout.clone();
                        last = layout.clone();
                        callback(layout);
                    }
                }
            }
        })
    }
}

fn query_current() -> Result<Layout> {
    let output = Command::new("xkb-switch")
        .output()
        .map_err(|e| XpanderError::LayoutQueryFailed(e.to_string()))?;
    if !output.status.success() {
        return Err(XpanderError::LayoutQueryFailed(format!(
            "xkb-switch exited with {:?}",
            output.status.code()
        )));
    }
    let text = String::from_utf8_lossy(&output.stdout);
    Ok(parse_layout(text.trim()))
}

fn query_configured() -> Result<Vec<Layout>> {
    let output = Command::new("setxkbmap")
        .arg("-query")
        .output()
        .map_err(|e| XpanderError::LayoutQueryFailed(e.to_string()))?;
    if !output.status.success() {
        return Err(XpanderError::LayoutQueryFailed(format!(
            "setxkbmap exited with {:?}",
            output.status.code()
        )));
    }
    let text = String::from_utf8_lossy(&output.stdout);
    Ok(parse_setxkbmap(&text))
}

/// Parse an `xkb-switch` style layout name, `group` or `group(variant)`.
fn parse_layout(text: &str) -> Layout {
    match text.split_once('(') {
        Some((group, rest)) => Layout {
            group: group.trim().to_string(),
            variant: rest.trim_end_matches(')').trim().to_string(),
        },
        None => Layout {
            group: text.trim().to_string(),
            variant: String::new(),
        },
    }
}

fn parse_setxkbmap(text: &str) -> Vec<Layout> {
    let mut groups: Vec<&str> = Vec::new();
    let mut variants: Vec<&str> = Vec::new();
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("layout:") {
            groups = rest.trim().split(',').map(str::trim).collect();
        } else if let Some(rest) = line.strip_prefix("variant:") {
            variants = rest.trim().split(',').map(str::trim).collect();
        }
    }
    groups
        .iter()
        .enumerate()
        .map(|(i, group)| Layout {
            group: group.to_string(),
            variant: variants.get(i).copied().unwrap_or("").to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_layout_with_variant() {
        let layout = parse_layout("us(intl)");
        assert_eq!(layout.group, "us");
        assert_eq!(layout.variant, "intl");
        assert_eq!(layout.label(), "us(intl)");
    }

    #[test]
    fn parses_layout_without_variant() {
        let layout = parse_layout("de");
        assert_eq!(layout.group, "de");
        assert!(layout.variant.is_empty());
    }

    #[test]
    fn parses_setxkbmap_output() {
        let output = "rules:      evdev\nmodel:      pc105\nlayout:     us,ru\nvariant:    intl,\n";
        let layouts = parse_setxkbmap(output);
        assert_eq!(layouts.len(), 2);
        assert_eq!(layouts[0].label(), "us(intl)");
        assert_eq!(layouts[1].label(), "ru");
    }

    #[test]
    fn parses_setxkbmap_without_variant_line() {
        let output = "rules:      evdev\nlayout:     us\n";
        let layouts = parse_setxkbmap(output);
        assert_eq!(layouts.len(), 1);
        assert_eq!(layouts[0].label(), "us");
    }
}
