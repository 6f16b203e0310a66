use enigo::{Enigo, Settings};
use rdev::{self, Key as RdevKey};

use crate::error::{Result, XpanderError};

/// Translate an rdev key event to the character it produced, using the
/// event's layout-resolved name. Shifted punctuation arrives with the key of
/// the unshifted glyph, so the name is authoritative.
pub fn rdev_key_to_char(key: &RdevKey, event: &rdev::Event) -> Option<char> {
    let special_char = match key {
        RdevKey::KpMinus if event.name == Some("_".to_string()) => Some('_'),
        RdevKey::Equal if event.name == Some("+".to_string()) => Some('+'),
        RdevKey::SemiColon if event.name == Some(":".to_string()) => Some(':'),
        RdevKey::SemiColon if event.name == Some(";".to_string()) => Some(';'),
        RdevKey::Quote if event.name == Some("\"".to_string()) => Some('"'),
        RdevKey::Quote if event.name == Some("'".to_string()) => Some('\''),
        RdevKey::Comma if event.name == Some("<".to_string()) => Some('<'),
        RdevKey::Comma if event.name == Some(",".to_string()) => Some(','),
        RdevKey::Dot if event.name == Some(">".to_string()) => Some('>'),
        RdevKey::Dot if event.name == Some(".".to_string()) => Some('.'),
        RdevKey::Slash if event.name == Some("?".to_string()) => Some('?'),
        RdevKey::Slash if event.name == Some("/".to_string()) => Some('/'),
        RdevKey::BackSlash if event.name == Some("|".to_string()) => Some('|'),
        RdevKey::BackSlash if event.name == Some("\\".to_string()) => Some('\\'),
        _ => None,
    };

    if special_char.is_some() {
        return special_char;
    }

    if let Some(name) = &event.name {
        if name.chars().count() == 1 {
            return name.chars().next();
        }
    }

    None
}

/// Create a keyboard controller for synthetic output.
pub fn create_keyboard_controller() -> Result<Enigo> {
    let settings = Settings::default();
    Enigo::new(&settings).map_err(|err| {
        XpanderError::Injection(format!("failed to create keyboard controller: {}", err))
    })
}
