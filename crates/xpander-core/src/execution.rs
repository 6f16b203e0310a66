use std::env;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Result, XpanderError};

/// Run a command phrase's body as a shell command line, capturing stdout.
/// The child is killed at the deadline; a hung script must never stall the
/// expansion worker indefinitely. A single trailing newline is trimmed from
/// the output.
pub fn run_command(command: &str, timeout: Duration) -> Result<String> {
    if command.trim().is_empty() {
        return Err(XpanderError::CommandExecutionFailed(
            "empty command line".to_string(),
        ));
    }

    // Only stdout is injected; stderr goes to the bit bucket. Leaving it
    // piped with no reader lets a noisy child fill the pipe and stall.
    #[cfg(target_os = "windows")]
    let mut child = Command::new("cmd")
        .args(["/C", command])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| XpanderError::CommandExecutionFailed(e.to_string()))?;

    #[cfg(not(target_os = "windows"))]
    let mut child = {
        let shell = env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
        Command::new(&shell)
            .args(["-c", command])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| XpanderError::CommandExecutionFailed(e.to_string()))?
    };

    // Drain stdout on a separate thread so a chatty child cannot fill the
    // pipe and deadlock against try_wait.
    let mut stdout = child.stdout.take();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut captured = String::new();
        if let Some(out) = stdout.as_mut() {
            let _ = out.read_to_string(&mut captured);
        }
        let _ = tx.send(captured);
    });

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait()? {
            Some(status) => {
                let captured = rx
                    .recv_timeout(Duration::from_millis(500))
                    .unwrap_or_default();
                if status.success() {
                    return Ok(trim_trailing_newline(captured));
                }
                return Err(XpanderError::CommandExecutionFailed(format!(
                    "`{}` exited with {:?}",
                    command,
                    status.code()
                )));
            }
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(XpanderError::CommandTimedOut(timeout.as_millis() as u64));
                }
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

fn trim_trailing_newline(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_trims_one_newline() {
        let out = run_command("echo hello", Duration::from_secs(5)).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn only_one_trailing_newline_trimmed() {
        let out = run_command("printf 'a\\n\\n'", Duration::from_secs(5)).unwrap();
        assert_eq!(out, "a\n");
    }

    #[test]
    fn nonzero_exit_is_reported() {
        let err = run_command("exit 3", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, XpanderError::CommandExecutionFailed(_)));
    }

    #[test]
    fn hung_command_times_out() {
        let start = Instant::now();
        let err = run_command("sleep 30", Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, XpanderError::CommandTimedOut(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn noisy_stderr_does_not_stall_the_command() {
        // Well past a pipe buffer of stderr; the child must still finish.
        let out = run_command("seq 1 100000 1>&2; echo done", Duration::from_secs(10)).unwrap();
        assert_eq!(out, "done");
    }

    #[test]
    fn empty_command_rejected() {
        let err = run_command("   ", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, XpanderError::CommandExecutionFailed(_)));
    }
}
