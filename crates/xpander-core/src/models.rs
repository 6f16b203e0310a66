use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Modifier keys as they appear in hotkey chords and phrase files.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    Shift,
    Control,
    Alt,
    Super,
}

/// Logical state of the modifier keys at the time of a key event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModState {
    pub shift: bool,
    pub control: bool,
    pub alt: bool,
    pub super_key: bool,
}

impl ModState {
    /// True when a non-Shift modifier is held, i.e. the event belongs to a
    /// chord rather than ordinary typing.
    pub fn chord_active(&self) -> bool {
        self.control || self.alt || self.super_key
    }

    pub fn set(&mut self, modifier: Modifier, down: bool) {
        match modifier {
            Modifier::Shift => self.shift = down,
            Modifier::Control => self.control = down,
            Modifier::Alt => self.alt = down,
            Modifier::Super => self.super_key = down,
        }
    }

    pub fn active_set(&self) -> BTreeSet<Modifier> {
        let mut set = BTreeSet::new();
        if self.shift {
            set.insert(Modifier::Shift);
        }
        if self.control {
            set.insert(Modifier::Control);
        }
        if self.alt {
            set.insert(Modifier::Alt);
        }
        if self.super_key {
            set.insert(Modifier::Super);
        }
        set
    }
}

/// A global hotkey: one printable key plus the exact set of modifiers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HotkeyChord {
    pub key: String,
    #[serde(default)]
    pub modifiers: BTreeSet<Modifier>,
}

impl HotkeyChord {
    pub fn new(key: impl Into<String>, modifiers: &[Modifier]) -> Self {
        Self {
            key: key.into(),
            modifiers: modifiers.iter().copied().collect(),
        }
    }

    /// Exact chord equality: the key matches case-insensitively and the held
    /// modifier set equals the declared one. Shift is part of the chord when
    /// declared, so `<Shift><Super>p` does not fire on `<Super>p`.
    pub fn matches(&self, key: char, mods: &ModState) -> bool {
        let mut held = mods.active_set();
        if !self.modifiers.contains(&Modifier::Shift) {
            // Shift may be incidental (it produced the key's glyph).
            held.remove(&Modifier::Shift);
        }
        self.key.chars().count() == 1
            && self
                .key
                .chars()
                .next()
                .map(|k| k.eq_ignore_ascii_case(&key))
                .unwrap_or(false)
            && self.modifiers == held
    }

    pub fn label(&self) -> String {
        let mut parts: Vec<String> = self
            .modifiers
            .iter()
            .map(|m| format!("{:?}", m).to_lowercase())
            .collect();
        parts.push(self.key.clone());
        parts.join("+")
    }
}

/// How expanded text reaches the target application.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SendMethod {
    #[default]
    Type,
    Paste,
}

/// Which typed characters may complete an abbreviation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Any non-alphanumeric character.
    #[default]
    NonWord,
    /// Space or Enter only.
    SpaceEnter,
    /// Tab only. The Tab itself is consumed instead of re-appended.
    Tab,
}

impl Trigger {
    pub fn fires_on(&self, c: char) -> bool {
        match self {
            Trigger::NonWord => !c.is_alphanumeric(),
            Trigger::SpaceEnter => c == ' ' || c == '\n',
            Trigger::Tab => c == '\t',
        }
    }
}

/// Substring filter on the focused window's title.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TitleFilter {
    pub pattern: String,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl TitleFilter {
    pub fn matches(&self, title: &str) -> bool {
        if self.case_sensitive {
            title.contains(&self.pattern)
        } else {
            title.to_lowercase().contains(&self.pattern.to_lowercase())
        }
    }
}

/// Identity of the currently focused window, as reported by the windowing
/// system. `id` keys the matcher's per-window buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: String,
    pub class: String,
    pub title: String,
}

impl WindowInfo {
    pub fn unknown() -> Self {
        Self {
            id: "unknown".to_string(),
            class: String::new(),
            title: String::new(),
        }
    }
}

/// One stored phrase: abbreviation and/or hotkey trigger, expansion template,
/// window filters and delivery flags. One JSON file per phrase.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Phrase {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub abbreviation: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_command: bool,
    #[serde(default)]
    pub trigger: Trigger,
    #[serde(default)]
    pub send: SendMethod,
    #[serde(default)]
    pub propagate_case: bool,
    #[serde(default)]
    pub case_insensitive: bool,
    #[serde(default)]
    pub window_class: Vec<String>,
    #[serde(default)]
    pub window_title: Option<TitleFilter>,
    #[serde(default)]
    pub hotkey: Option<HotkeyChord>,
}

impl Phrase {
    pub fn new(id: impl Into<String>, abbreviation: impl Into<String>, body: impl Into<String>) -> Self {
        let abbreviation = abbreviation.into();
        Self {
            id: id.into(),
            name: abbreviation.clone(),
            abbreviation: Some(abbreviation),
            body: body.into(),
            is_command: false,
            trigger: Trigger::default(),
            send: SendMethod::default(),
            propagate_case: false,
            case_insensitive: false,
            window_class: Vec::new(),
            window_title: None,
            hotkey: None,
        }
    }

    /// Window filter check: class must be listed when a class filter exists,
    /// title must contain the pattern when a title filter exists.
    pub fn matches_window(&self, window: &WindowInfo) -> bool {
        if !self.window_class.is_empty() && !self.window_class.iter().any(|c| c == &window.class) {
            return false;
        }
        if let Some(filter) = &self.window_title {
            if !filter.matches(&window.title) {
                return false;
            }
        }
        true
    }

    /// Tie-break score for phrases sharing an abbreviation: a class filter
    /// outweighs a title filter, global phrases lose.
    pub fn filter_specificity(&self) -> u8 {
        let mut score = 0;
        if !self.window_class.is_empty() {
            score += 2;
        }
        if self.window_title.is_some() {
            score += 1;
        }
        score
    }

    /// Abbreviation comparison ignores case for case-insensitive phrases and
    /// for propagate_case phrases (the typed casing is reapplied afterwards).
    pub fn case_folded_match(&self) -> bool {
        self.case_insensitive || self.propagate_case
    }

    pub fn abbreviation_len(&self) -> usize {
        self.abbreviation
            .as_deref()
            .map(|a| a.chars().count())
            .unwrap_or(0)
    }
}

/// A key as seen by the engine, already translated from the raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    /// A printable character. Space, Enter and Tab arrive as ' ', '\n', '\t'.
    Char(char),
    Backspace,
    Left,
    Right,
    Up,
    Down,
    Home,
    End,
    PageUp,
    PageDown,
    Other,
}

impl KeyInput {
    /// Keys that move the real caret, desyncing it from the match buffer.
    pub fn is_navigation(&self) -> bool {
        matches!(
            self,
            KeyInput::Left
                | KeyInput::Right
                | KeyInput::Up
                | KeyInput::Down
                | KeyInput::Home
                | KeyInput::End
                | KeyInput::PageUp
                | KeyInput::PageDown
        )
    }
}

/// One physical key event delivered by the input tap. Transient; consumed
/// synchronously and never stored.
#[derive(Debug, Clone)]
pub struct KeyEvent {
    pub input: KeyInput,
    pub modifiers: ModState,
    pub is_press: bool,
    pub window: WindowInfo,
}
