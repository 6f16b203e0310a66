use xpander_core::{Result, XpanderError};

/// Pre-flight check before taking the input tap. Failing early with a
/// readable message beats a grab() that silently sees nothing.
pub fn check_input_permissions() -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        if std::env::var("DISPLAY").is_err() && std::env::var("WAYLAND_DISPLAY").is_err() {
            return Err(XpanderError::PermissionDenied(
                "no display server found; xpander needs a running X11 or Wayland session"
                    .to_string(),
            ));
        }

        if std::env::var("WAYLAND_DISPLAY").is_ok() && std::env::var("DISPLAY").is_err() {
            log::warn!(
                "pure Wayland session detected; global key interception \
                 requires XWayland or an X11 session"
            );
        }

        if !has_input_access() {
            println!("xpander intercepts keyboard input to detect abbreviations.");
            println!("----------------------------------------------------------");
            println!("Your user does not appear to have access to input devices.");
            println!("Add yourself to the 'input' group and log in again:");
            println!();
            println!("    sudo usermod -aG input $USER");
            println!();
            return Err(XpanderError::PermissionDenied(
                "cannot read input devices".to_string(),
            ));
        }
    }

    #[cfg(target_os = "macos")]
    {
        // Accessibility permission is granted interactively; the tap itself
        // reports the failure, so just point the user at the right pane.
        log::info!(
            "if expansion does not work, grant accessibility access under \
             System Settings > Privacy & Security > Accessibility"
        );
    }

    Ok(())
}

#[cfg(target_os = "linux")]
fn has_input_access() -> bool {
    use std::fs;

    // root always has access; otherwise probe one event device
    if std::env::var("USER").map(|u| u == "root").unwrap_or(false) {
        return true;
    }
    match fs::read_dir("/dev/input") {
        Ok(entries) => {
            for entry in entries.flatten() {
                let path = entry.path();
                if path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("event"))
                    .unwrap_or(false)
                {
                    return fs::File::open(&path).is_ok();
                }
            }
            // No event devices to probe; let the tap find out.
            true
        }
        Err(_) => true,
    }
}
