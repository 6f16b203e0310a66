use crate::keyboard_listener::start_keyboard_listener;
use crate::permissions::check_input_permissions;
use crate::process::verify_process_running;
use std::fs::{self, File};
use std::io::Write;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use xpander_core::config::{
    ensure_config_dir, get_config_dir, get_phrases_dir, get_pid_file_path,
    get_reload_request_path, get_toggle_request_path,
};
use xpander_core::engine::Engine;
use xpander_core::layout::LayoutMonitor;
use xpander_core::{is_daemon_running, PhraseStore, Result, Settings, XpanderError};

const PHRASE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Start the daemon process
pub fn start_daemon() -> Result<()> {
    if let Some(pid) = is_daemon_running()? {
        if verify_process_running(pid) {
            return Err(XpanderError::DaemonAlreadyRunning(pid));
        }
        // PID file exists but process is not running - clean up and restart
        println!("Found stale PID file. Cleaning up and starting new daemon...");
        let _ = fs::remove_file(get_pid_file_path());
    }

    println!("Starting xpander daemon...");
    ensure_config_dir()?;
    check_input_permissions()?;

    let current_exe = std::env::current_exe()?;
    let daemon_log_file = format!("{}/daemon_log.txt", get_config_dir().to_string_lossy());

    #[cfg(unix)]
    {
        use std::process::Command;

        // Start the daemon process detached with nohup
        let cmd = format!(
            "nohup {} daemon-worker > {} 2>&1 &",
            current_exe.to_string_lossy(),
            daemon_log_file
        );
        Command::new("sh").arg("-c").arg(&cmd).status()?;
    }

    #[cfg(windows)]
    {
        use std::process::Command;

        let cmd = format!(
            "START /B \"xpander Daemon\" \"{}\" daemon-worker > \"{}\" 2>&1",
            current_exe.to_string_lossy(),
            daemon_log_file
        );
        Command::new("cmd").arg("/C").arg(&cmd).status()?;
    }

    // Wait for the daemon to come up and write its PID file. The file only
    // appears once the worker has confirmed the input tap, which can take
    // the listener's full retry window.
    for _ in 0..50 {
        thread::sleep(Duration::from_millis(100));
        if is_daemon_running()?.is_some() {
            break;
        }
    }

    match is_daemon_running()? {
        Some(pid) if verify_process_running(pid) => {
            println!("Daemon started successfully with PID {}.", pid);
            Ok(())
        }
        _ => Err(XpanderError::Other(format!(
            "Daemon failed to start. Check logs at {}",
            daemon_log_file
        ))),
    }
}

/// Stop the daemon if it's running
pub fn stop_daemon() -> Result<()> {
    let pid_file = get_pid_file_path();
    if !pid_file.exists() {
        return Err(XpanderError::DaemonNotRunning);
    }

    let pid_str = match fs::read_to_string(&pid_file) {
        Ok(content) => content,
        Err(err) => {
            let _ = fs::remove_file(&pid_file);
            return Err(XpanderError::Other(format!(
                "Failed to read PID file: {}",
                err
            )));
        }
    };
    let pid = match pid_str.trim().parse::<u32>() {
        Ok(pid) => pid,
        Err(_) => {
            let _ = fs::remove_file(&pid_file);
            return Err(XpanderError::InvalidPid);
        }
    };

    println!("Attempting to stop daemon with PID {}...", pid);

    if !verify_process_running(pid) {
        println!("Process with PID {} is not running.", pid);
        let _ = fs::remove_file(&pid_file);
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::process::Command;

        // SIGTERM first for a graceful shutdown
        let mut success = Command::new("kill")
            .arg(pid.to_string())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);

        if !success || verify_process_running(pid) {
            thread::sleep(Duration::from_millis(500));
            if verify_process_running(pid) {
                println!("Daemon didn't terminate gracefully, using force kill...");
                success = Command::new("kill")
                    .args(["-9", &pid.to_string()])
                    .status()
                    .map(|status| status.success())
                    .unwrap_or(false);
            } else {
                success = true;
            }
        }

        if success {
            let _ = fs::remove_file(&pid_file);
            println!("Daemon stopped successfully.");
            return Ok(());
        }
    }

    #[cfg(windows)]
    {
        use std::process::Command;

        let mut success = Command::new("taskkill")
            .args(["/PID", &pid.to_string()])
            .status()
            .map(|status| status.success())
            .unwrap_or(false);

        if !success || verify_process_running(pid) {
            thread::sleep(Duration::from_millis(500));
            if verify_process_running(pid) {
                println!("Daemon didn't terminate gracefully, using force kill...");
                success = Command::new("taskkill")
                    .args(["/F", "/T", "/PID", &pid.to_string()])
                    .status()
                    .map(|status| status.success())
                    .unwrap_or(false);
            } else {
                success = true;
            }
        }

        if success {
            let _ = fs::remove_file(&pid_file);
            println!("Daemon stopped successfully.");
            return Ok(());
        }
    }

    println!("WARNING: Failed to stop daemon process. PID file will be removed anyway.");
    let _ = fs::remove_file(&pid_file);
    Ok(())
}

/// Check daemon status
pub fn daemon_status() -> Result<()> {
    match is_daemon_running()? {
        Some(pid) => {
            if verify_process_running(pid) {
                println!("xpander daemon is running with PID {}", pid);
            } else {
                println!("PID file exists but process {} is not running", pid);
                println!("This could indicate the daemon crashed or was stopped abruptly");
                println!("Recommend running 'xpander stop' followed by 'xpander start'");
            }
            Ok(())
        }
        None => {
            println!("xpander daemon is not running");
            Ok(())
        }
    }
}

/// Entry point of the detached daemon process: runs the worker and cleans
/// the PID file up on exit. The PID file itself is written by the worker
/// once the input tap is confirmed, so `start_daemon` never reports success
/// for a daemon that cannot intercept anything.
pub fn daemon_worker_entry() -> Result<()> {
    let result = run_daemon_worker();
    let _ = fs::remove_file(get_pid_file_path());
    result
}

/// How long the worker gives the tap thread to report an installation
/// failure before declaring the daemon up. Must exceed the listener's full
/// retry window.
const TAP_INSTALL_GRACE: Duration = Duration::from_secs(2);

/// The long-running body of the daemon: engine, input tap, layout watcher
/// and the phrase-directory reload poller.
pub fn run_daemon_worker() -> Result<()> {
    ensure_config_dir()?;
    let settings = Settings::load();
    let store = PhraseStore::load(get_phrases_dir())?;
    for err in store.load_errors() {
        log::warn!("{}", err);
    }
    log::info!("loaded {} phrases", store.phrases().len());

    let window_cache = Duration::from_millis(settings.window_cache_ms);
    let engine = Arc::new(Engine::new(settings, store));
    engine.start()?;

    let running = Arc::new(AtomicBool::new(true));

    // Layout switches invalidate the match buffers.
    let layouts = LayoutMonitor::new();
    let engine_for_layout = Arc::clone(&engine);
    let layout_thread = layouts.watch(Arc::clone(&running), move |_layout| {
        engine_for_layout.on_layout_change();
    });

    let (_keyboard_thread, tap_status) =
        start_keyboard_listener(Arc::clone(&engine), window_cache);
    if let Err(err) = await_tap_installation(&tap_status, TAP_INSTALL_GRACE) {
        let _ = engine.stop();
        return Err(err);
    }

    // The tap is up: announce liveness and accept a graceful shutdown.
    write_pid_file()?;
    #[cfg(unix)]
    let _signal_watcher = spawn_signal_watcher(Arc::clone(&running))?;

    // Poll the phrase directory and hot-reload on change.
    let phrases_dir = get_phrases_dir();
    let mut last_mtime = engine.store().latest_mtime();
    let mut last_check = Instant::now();
    let toggle_request = get_toggle_request_path();
    let reload_request = get_reload_request_path();
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));

        // A tap that dies after startup is as dead as one that never came up.
        if let Ok(err) = tap_status.try_recv() {
            let _ = engine.stop();
            return Err(err);
        }

        // CLI control requests arrive as marker files.
        if toggle_request.exists() {
            let _ = fs::remove_file(&toggle_request);
            let paused = engine.toggle_service();
            log::info!(
                "toggle request: expansion now {}",
                if paused { "paused" } else { "active" }
            );
        }
        if reload_request.exists() {
            let _ = fs::remove_file(&reload_request);
            match engine.reload_phrases() {
                Ok(()) => {
                    last_mtime = engine.store().latest_mtime();
                    log::info!("reload request served");
                }
                Err(err) => log::error!("requested reload failed: {}", err),
            }
        }

        if last_check.elapsed() < PHRASE_POLL_INTERVAL {
            continue;
        }
        last_check = Instant::now();

        let current_mtime = latest_mtime_on_disk(&phrases_dir);
        if current_mtime.is_some() && current_mtime != last_mtime {
            last_mtime = current_mtime;
            match engine.reload_phrases() {
                Ok(()) => log::info!("phrase directory changed, reloaded"),
                Err(err) => log::error!("phrase reload failed: {}", err),
            }
        }
    }

    log::info!("shutting down");
    engine.stop()?;
    // The tap thread is parked inside grab() and only the process exit
    // releases it; the layout watcher honors the running flag.
    if layout_thread.join().is_err() {
        log::error!("layout watcher thread panicked");
    }
    Ok(())
}

fn write_pid_file() -> Result<()> {
    let mut file = File::create(get_pid_file_path())?;
    write!(file, "{}", process::id())?;
    Ok(())
}

/// Failure to install the tap arrives on the status channel within the
/// listener's retry window; silence for the whole grace period means the
/// grab is in place.
fn await_tap_installation(
    status: &Receiver<XpanderError>,
    grace: Duration,
) -> Result<()> {
    match status.recv_timeout(grace) {
        Ok(err) => Err(err),
        Err(_) => Ok(()),
    }
}

/// SIGTERM/SIGINT clear the running flag so the worker loop tears down
/// through `engine.stop()` instead of dying mid-expansion.
#[cfg(unix)]
fn spawn_signal_watcher(running: Arc<AtomicBool>) -> Result<thread::JoinHandle<()>> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    Ok(thread::spawn(move || {
        for signal in &mut signals {
            match signal {
                SIGINT | SIGTERM => {
                    log::info!("received signal {}, shutting down gracefully", signal);
                    running.store(false, Ordering::SeqCst);
                    break;
                }
                _ => {}
            }
        }
    }))
}


/// Newest modification time under the phrase directory, directories included
/// so that deletions (which touch the parent) are noticed too.
fn latest_mtime_on_disk(dir: &std::path::Path) -> Option<std::time::SystemTime> {
    let mut newest = fs::metadata(dir).and_then(|m| m.modified()).ok();
    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        let mtime = if path.is_dir() {
            latest_mtime_on_disk(&path)
        } else {
            entry.metadata().and_then(|m| m.modified()).ok()
        };
        if mtime > newest {
            newest = mtime;
        }
    }
    newest
}
