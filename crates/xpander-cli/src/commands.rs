use crate::cli::Commands;
use std::fs;
use std::path::PathBuf;
use xpander_core::config::{
    ensure_config_dir, get_phrases_dir, get_reload_request_path, get_toggle_request_path,
};
use xpander_core::models::{Phrase, SendMethod};
use xpander_core::{is_daemon_running, PhraseStore, Result, XpanderError};
use xpander_daemon::process::verify_process_running;
use xpander_daemon::{daemon_status, daemon_worker_entry, start_daemon, stop_daemon};

pub fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Start => start_daemon(),
        Commands::Stop => stop_daemon(),
        Commands::Status => daemon_status(),
        Commands::Toggle => send_control_request(get_toggle_request_path(), "Toggle"),
        Commands::Reload => send_control_request(get_reload_request_path(), "Reload"),
        Commands::List => list_phrases(),
        Commands::Add {
            abbreviation,
            body,
            name,
            command,
            paste,
        } => add_phrase(abbreviation, body, name, command, paste),
        Commands::Remove { id } => remove_phrase(&id),
        Commands::DaemonWorker => daemon_worker_entry(),
    }
}

/// The daemon has no socket; control requests are marker files in the config
/// directory that its poll loop consumes within a few hundred milliseconds.
fn send_control_request(path: PathBuf, what: &str) -> Result<()> {
    match is_daemon_running()? {
        Some(pid) if verify_process_running(pid) => {
            fs::write(&path, b"")?;
            println!("{} request sent to daemon (PID {}).", what, pid);
            Ok(())
        }
        _ => Err(XpanderError::DaemonNotRunning),
    }
}

fn list_phrases() -> Result<()> {
    ensure_config_dir()?;
    let store = PhraseStore::load(get_phrases_dir())?;
    for err in store.load_errors() {
        eprintln!("Warning: {}", err);
    }
    if store.phrases().is_empty() {
        println!("No phrases configured. Add one with 'xpander add'.");
        return Ok(());
    }

    println!("{:<20} {:<15} {:<8} BODY", "ID", "ABBREVIATION", "KIND");
    for phrase in store.phrases() {
        let kind = if phrase.is_command { "command" } else { "text" };
        let mut body: String = phrase.body.replace('\n', "\\n");
        if body.chars().count() > 48 {
            body = body.chars().take(45).collect::<String>() + "...";
        }
        println!(
            "{:<20} {:<15} {:<8} {}",
            phrase.id,
            phrase.abbreviation.as_deref().unwrap_or("-"),
            kind,
            body
        );
    }
    println!("\n{} phrase(s)", store.phrases().len());
    Ok(())
}

fn add_phrase(
    abbreviation: String,
    body: String,
    name: Option<String>,
    command: bool,
    paste: bool,
) -> Result<()> {
    ensure_config_dir()?;
    let mut store = PhraseStore::load(get_phrases_dir())?;

    let id = name.clone().unwrap_or_else(|| abbreviation.clone());
    if store.get(&id).is_some() {
        return Err(XpanderError::Other(format!(
            "a phrase with id '{}' already exists",
            id
        )));
    }

    let mut phrase = Phrase::new(id, abbreviation, body);
    if let Some(name) = name {
        phrase.name = name;
    }
    phrase.is_command = command;
    if paste {
        phrase.send = SendMethod::Paste;
    }

    store.add(phrase)?;
    println!("Phrase added successfully");
    println!("The running daemon picks it up within a second.");
    Ok(())
}

fn remove_phrase(id: &str) -> Result<()> {
    ensure_config_dir()?;
    let mut store = PhraseStore::load(get_phrases_dir())?;
    store.remove(id)?;
    println!("Phrase removed successfully");
    Ok(())
}
