use std::process::Command;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::models::WindowInfo;

/// Hard deadline on one focused-window lookup. The lookup runs inside the
/// input tap, where a hung `xprop` would freeze every keystroke system-wide.
const QUERY_TIMEOUT: Duration = Duration::from_millis(150);

/// Reports the currently focused window. The tap path calls this on every
/// keystroke, so implementations must be effectively instant; the X backend
/// caches behind a short TTL.
pub trait WindowProvider: Send {
    fn active_window(&mut self) -> WindowInfo;
}

/// Queries the focused window via `xdotool` and `xprop`. Lookups are cached
/// for `ttl` so the external commands run a few times per second at most.
pub struct XWindowProvider {
    cached: WindowInfo,
    fetched_at: Option<Instant>,
    ttl: Duration,
}

impl XWindowProvider {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cached: WindowInfo::unknown(),
            fetched_at: None,
            ttl,
        }
    }
}

impl WindowProvider for XWindowProvider {
    fn active_window(&mut self) -> WindowInfo {
        if let Some(at) = self.fetched_at {
            if at.elapsed() < self.ttl {
                return self.cached.clone();
            }
        }
        self.fetched_at = Some(Instant::now());
        match run_with_deadline(QUERY_TIMEOUT, query_active_window).flatten() {
            Some(info) => {
                self.cached = info.clone();
                info
            }
            None => {
                // Keep matching against the last-known window rather than
                // dropping filters entirely.
                log::debug!("active window query failed or timed out, using last known");
                self.cached.clone()
            }
        }
    }
}

/// Run `task` on a helper thread and wait at most `timeout` for its result.
/// A task that overruns is abandoned; its thread finishes in the background.
fn run_with_deadline<T: Send + 'static>(
    timeout: Duration,
    task: impl FnOnce() -> T + Send + 'static,
) -> Option<T> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(task());
    });
    rx.recv_timeout(timeout).ok()
}

/// Fixed window identity, for tests and headless runs.
pub struct StaticWindowProvider(pub WindowInfo);

impl WindowProvider for StaticWindowProvider {
    fn active_window(&mut self) -> WindowInfo {
        self.0.clone()
    }
}

fn query_active_window() -> Option<WindowInfo> {
    let id_output = Command::new("xdotool").arg("getactivewindow").output().ok()?;
    if !id_output.status.success() {
        return None;
    }
    let id = String::from_utf8_lossy(&id_output.stdout).trim().to_string();
    if id.is_empty() {
        return None;
    }

    let props = Command::new("xprop")
        .args(["-id", &id, "WM_CLASS", "_NET_WM_NAME", "WM_NAME"])
        .output()
        .ok()?;
    if !props.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&props.stdout);
    let (class, title) = parse_xprop(&text);
    Some(WindowInfo { id, class, title })
}

/// Pull the class and title out of `xprop` output. WM_CLASS lists the
/// instance then the class; the class string is what filters match on.
fn parse_xprop(text: &str) -> (String, String) {
    let mut class = String::new();
    let mut title = String::new();
    for line in text.lines() {
        if line.starts_with("WM_CLASS") {
            let quoted: Vec<&str> = line.split('"').collect();
            // "instance", "Class" -> quoted[1], quoted[3]
            if let Some(c) = quoted.get(3).or_else(|| quoted.get(1)) {
                class = c.to_string();
            }
        } else if line.starts_with("_NET_WM_NAME") || (line.starts_with("WM_NAME") && title.is_empty())
        {
            if let Some(start) = line.find('"') {
                let rest = &line[start + 1..];
                if let Some(end) = rest.rfind('"') {
                    title = rest[..end].to_string();
                }
            }
        }
    }
    (class, title)
}
