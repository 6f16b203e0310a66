use crate::config::Settings;
use crate::error::{Result, XpanderError};
use crate::models::{HotkeyChord, ModState, Modifier};
use crate::store::PhraseStore;

/// Reserved binding ids, handled by the Service Controller instead of the
/// expansion pipeline.
pub const PAUSE_BINDING_ID: &str = "__pause_service";
pub const SHOW_MANAGER_BINDING_ID: &str = "__show_manager";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotkeyBinding {
    pub chord: HotkeyChord,
    pub phrase_id: String,
}

/// What a fired chord asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotkeyAction {
    Phrase(String),
    ToggleService,
    ShowManager,
}

/// Watches the keystroke stream for registered chords. Exact chord equality
/// only; a fired chord is consumed until a key release so key-repeat cannot
/// re-fire it.
pub struct HotkeyRouter {
    bindings: Vec<HotkeyBinding>,
    consumed: Option<usize>,
}

impl HotkeyRouter {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            consumed: None,
        }
    }

    /// Register a chord. A chord maps to at most one binding; duplicates are
    /// rejected so the earlier registration stays authoritative. A chord
    /// needs at least one non-shift modifier: routing only examines events
    /// with Control, Alt or Super held, so a shift-only chord would never
    /// fire (and would collide with ordinary shifted typing anyway).
    pub fn register(&mut self, chord: HotkeyChord, phrase_id: impl Into<String>) -> Result<()> {
        if !chord
            .modifiers
            .iter()
            .any(|m| matches!(m, Modifier::Control | Modifier::Alt | Modifier::Super))
        {
            return Err(XpanderError::Other(format!(
                "hotkey {} needs a Control, Alt or Super modifier",
                chord.label()
            )));
        }
        if self.bindings.iter().any(|b| b.chord == chord) {
            return Err(XpanderError::DuplicateHotkeyBinding(chord.label()));
        }
        self.bindings.push(HotkeyBinding {
            chord,
            phrase_id: phrase_id.into(),
        });
        Ok(())
    }

    /// Rebuild all bindings from the store and settings: reserved chords
    /// first so a phrase cannot shadow the pause toggle. Returns the errors
    /// for skipped duplicates; the rest still register.
    pub fn register_all(&mut self, store: &PhraseStore, settings: &Settings) -> Vec<XpanderError> {
        self.bindings.clear();
        self.consumed = None;
        let mut errors = Vec::new();

        if let Some(chord) = &settings.pause_service {
            if let Err(err) = self.register(chord.clone(), PAUSE_BINDING_ID) {
                errors.push(err);
            }
        }
        if let Some(chord) = &settings.show_manager {
            if let Err(err) = self.register(chord.clone(), SHOW_MANAGER_BINDING_ID) {
                errors.push(err);
            }
        }
        for (chord, phrase_id) in store.hotkey_bindings() {
            if let Err(err) = self.register(chord, phrase_id) {
                log::warn!("skipping hotkey: {}", err);
                errors.push(err);
            }
        }
        errors
    }

    pub fn bindings(&self) -> &[HotkeyBinding] {
        &self.bindings
    }

    /// A key went down with modifiers held: fire on exact chord equality,
    /// once per hold.
    pub fn on_key_down(&mut self, key: char, mods: &ModState) -> Option<HotkeyAction> {
        for (index, binding) in self.bindings.iter().enumerate() {
            if !binding.chord.matches(key, mods) {
                continue;
            }
            if self.consumed == Some(index) {
                return None; // key-repeat while the chord is still held
            }
            self.consumed = Some(index);
            return Some(match binding.phrase_id.as_str() {
                PAUSE_BINDING_ID => HotkeyAction::ToggleService,
                SHOW_MANAGER_BINDING_ID => HotkeyAction::ShowManager,
                id => HotkeyAction::Phrase(id.to_string()),
            });
        }
        None
    }

    /// Any key release ends the hold and re-arms the consumed chord.
    pub fn on_key_release(&mut self) {
        self.consumed = None;
    }
}

impl Default for HotkeyRouter {
    fn default() -> Self {
        Self::new()
    }
}
