use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "xpander",
    version = env!("CARGO_PKG_VERSION"),
    about = "xpander - a background text expansion service",
    long_about = "xpander watches what you type system-wide and replaces configured \
                  abbreviations with their expansions in any application."
)]
pub struct Xpander {
    #[clap(subcommand)]
    pub commands: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the expansion daemon
    Start,
    /// Stop the expansion daemon
    Stop,
    /// Check the status of the expansion daemon
    Status,
    /// Pause or resume expansion in the running daemon
    Toggle,
    /// Ask the running daemon to reload the phrase directory now
    Reload,
    /// List all configured phrases
    List,
    /// Add a new phrase
    Add {
        #[clap(long, short = 'a', help = "Abbreviation that triggers the phrase")]
        abbreviation: String,

        #[clap(long, short = 'b', help = "The expansion body")]
        body: String,

        #[clap(long, short = 'n', help = "Display name (defaults to the abbreviation)")]
        name: Option<String>,

        #[clap(long, help = "Run the body as a shell command and inject its stdout")]
        command: bool,

        #[clap(long, help = "Deliver the expansion through the clipboard (Ctrl+V)")]
        paste: bool,
    },
    /// Remove a phrase by id
    Remove {
        #[clap(help = "Id of the phrase to remove")]
        id: String,
    },
    // Hidden command used internally to run the daemon worker
    #[clap(hide = true, name = "daemon-worker")]
    DaemonWorker,
}
