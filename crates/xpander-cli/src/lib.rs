pub mod cli;
pub mod commands;

use clap::Parser;
use cli::Xpander;
use commands::handle_command;
use std::process;

/// Run the xpander CLI application
pub fn run_main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Xpander::parse();
    if let Err(e) = handle_command(args.commands) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
