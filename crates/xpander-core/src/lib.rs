pub mod clipboard;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod hotkey;
pub mod keyboard;
pub mod layout;
pub mod matcher;
pub mod models;
pub mod output;
pub mod store;
pub mod template;
pub mod window;

// Re-export common items for convenience
pub use config::{get_config_dir, get_phrases_dir, is_daemon_running, Settings};
pub use engine::{Disposition, Engine, EngineEvent, ServiceState};
pub use error::{Result, XpanderError};
pub use models::{KeyEvent, KeyInput, ModState, Phrase, WindowInfo};
pub use store::PhraseStore;
