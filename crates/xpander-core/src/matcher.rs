use std::collections::{HashMap, VecDeque};

use crate::models::WindowInfo;
use crate::store::PhraseStore;

const MIN_BUFFER_CAP: usize = 32;

/// Rolling buffer of recently typed printable characters for one window.
#[derive(Debug)]
pub struct MatchBuffer {
    chars: VecDeque<char>,
    cap: usize,
}

impl MatchBuffer {
    fn new(cap: usize) -> Self {
        Self {
            chars: VecDeque::with_capacity(cap),
            cap,
        }
    }

    fn push(&mut self, c: char) {
        if self.chars.len() == self.cap {
            self.chars.pop_front();
        }
        self.chars.push_back(c);
    }

    fn backspace(&mut self) {
        self.chars.pop_back();
    }

    fn clear(&mut self) {
        self.chars.clear();
    }

    fn contents(&self) -> String {
        self.chars.iter().collect()
    }

    /// Last `n` characters, if that many were typed.
    fn suffix(&self, n: usize) -> Option<String> {
        if n == 0 || self.chars.len() < n {
            return None;
        }
        Some(self.chars.iter().skip(self.chars.len() - n).collect())
    }
}

/// An abbreviation hit: which phrase fired, how many characters to erase,
/// the abbreviation as actually typed, and the boundary character to
/// re-append after the expansion (Tab triggers are consumed instead).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchHit {
    pub phrase_id: String,
    pub erase_len: usize,
    pub typed: String,
    pub include_char: Option<char>,
}

/// Consumes the keystroke stream and decides when a buffer suffix matches a
/// known abbreviation. One buffer per tracked window, LRU-capped.
pub struct Matcher {
    buffers: HashMap<String, MatchBuffer>,
    order: Vec<String>,
    retention: usize,
    buffer_cap: usize,
}

impl Matcher {
    pub fn new(retention: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            order: Vec::new(),
            retention: retention.max(1),
            buffer_cap: MIN_BUFFER_CAP,
        }
    }

    /// Resize buffers to the longest configured abbreviation. Called after
    /// every (re)load of the phrase store.
    pub fn set_capacity(&mut self, max_abbreviation_len: usize) {
        self.buffer_cap = (max_abbreviation_len + 16).max(MIN_BUFFER_CAP);
        self.buffers.clear();
        self.order.clear();
    }

    pub fn push_char(&mut self, window: &WindowInfo, c: char) {
        let cap = self.buffer_cap;
        self.touch(&window.id)
            .or_insert_with(|| MatchBuffer::new(cap))
            .push(c);
        self.evict();
    }

    pub fn backspace(&mut self, window: &WindowInfo) {
        if let Some(buffer) = self.buffers.get_mut(&window.id) {
            buffer.backspace();
        }
    }

    pub fn clear(&mut self, window: &WindowInfo) {
        if let Some(buffer) = self.buffers.get_mut(&window.id) {
            buffer.clear();
        }
    }

    pub fn clear_all(&mut self) {
        self.buffers.clear();
        self.order.clear();
    }

    /// A boundary character was typed in `window`: test buffer suffixes
    /// against every applicable phrase, longest abbreviation first (store
    /// order), then clear the buffer — abbreviations cannot span boundaries.
    pub fn on_boundary(
        &mut self,
        store: &PhraseStore,
        window: &WindowInfo,
        boundary: char,
    ) -> Option<MatchHit> {
        let hit = self.find_match(store, window, boundary);
        self.clear(window);
        hit
    }

    fn find_match(
        &mut self,
        store: &PhraseStore,
        window: &WindowInfo,
        boundary: char,
    ) -> Option<MatchHit> {
        let buffer = self.buffers.get(&window.id)?;
        for phrase in store.phrases() {
            let Some(abbreviation) = phrase.abbreviation.as_deref() else {
                continue;
            };
            if abbreviation.is_empty()
                || !phrase.trigger.fires_on(boundary)
                || !phrase.matches_window(window)
            {
                continue;
            }
            let Some(typed) = buffer.suffix(abbreviation.chars().count()) else {
                continue;
            };
            let matched = if phrase.case_folded_match() {
                typed.to_lowercase() == abbreviation.to_lowercase()
            } else {
                typed == abbreviation
            };
            if matched {
                return Some(MatchHit {
                    phrase_id: phrase.id.clone(),
                    erase_len: typed.chars().count(),
                    typed,
                    include_char: (boundary != '\t').then_some(boundary),
                });
            }
        }
        None
    }

    #[cfg(test)]
    fn buffer_contents(&self, window_id: &str) -> Option<String> {
        self.buffers.get(window_id).map(|b| b.contents())
    }

    #[cfg(test)]
    fn tracked_windows(&self) -> usize {
        self.buffers.len()
    }

    fn touch(&mut self, window_id: &str) -> std::collections::hash_map::Entry<'_, String, MatchBuffer> {
        if let Some(pos) = self.order.iter().position(|id| id == window_id) {
            self.order.remove(pos);
        }
        self.order.push(window_id.to_string());
        self.buffers.entry(window_id.to_string())
    }

    fn evict(&mut self) {
        while self.order.len() > self.retention {
            let evicted = self.order.remove(0);
            self.buffers.remove(&evicted);
            log::debug!("evicted match buffer for window {}", evicted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Phrase, Trigger};

    fn window(id: &str) -> WindowInfo {
        WindowInfo {
            id: id.to_string(),
            class: "Editor".to_string(),
            title: "notes".to_string(),
        }
    }

    fn type_str(matcher: &mut Matcher, win: &WindowInfo, text: &str) {
        for c in text.chars() {
            matcher.push_char(win, c);
        }
    }

    #[test]
    fn abbreviation_plus_boundary_matches_once() {
        let store = PhraseStore::from_phrases(vec![Phrase::new("1", "brb", "be right back")]);
        let mut matcher = Matcher::new(4);
        let win = window("w1");

        type_str(&mut matcher, &win, "brb");
        let hit = matcher.on_boundary(&store, &win, ' ').unwrap();
        assert_eq!(hit.phrase_id, "1");
        assert_eq!(hit.erase_len, 3);
        assert_eq!(hit.include_char, Some(' '));

        // Buffer cleared by the boundary: a second boundary finds nothing.
        assert!(matcher.on_boundary(&store, &win, ' ').is_none());
    }

    #[test]
    fn longest_match_wins() {
        let store = PhraseStore::from_phrases(vec![
            Phrase::new("short", "bc", "SHORT"),
            Phrase::new("long", "abc", "LONG"),
        ]);
        let mut matcher = Matcher::new(4);
        let win = window("w1");

        type_str(&mut matcher, &win, "abc");
        let hit = matcher.on_boundary(&store, &win, ' ').unwrap();
        assert_eq!(hit.phrase_id, "long");
    }

    #[test]
    fn window_filter_blocks_mismatched_class() {
        let mut scoped = Phrase::new("1", "sig", "work signature");
        scoped.window_class = vec!["Thunderbird".to_string()];
        let store = PhraseStore::from_phrases(vec![scoped]);
        let mut matcher = Matcher::new(4);
        let win = window("w1"); // class "Editor"

        type_str(&mut matcher, &win, "sig");
        assert!(matcher.on_boundary(&store, &win, ' ').is_none());
    }

    #[test]
    fn overlapping_filters_prefer_most_specific() {
        let global = Phrase::new("global", "sig", "generic");
        let mut scoped = Phrase::new("scoped", "sig", "editor-specific");
        scoped.window_class = vec!["Editor".to_string()];
        let store = PhraseStore::from_phrases(vec![global, scoped]);
        let mut matcher = Matcher::new(4);
        let win = window("w1");

        type_str(&mut matcher, &win, "sig");
        let hit = matcher.on_boundary(&store, &win, ' ').unwrap();
        assert_eq!(hit.phrase_id, "scoped");
    }

    #[test]
    fn matching_is_case_sensitive_by_default() {
        let store = PhraseStore::from_phrases(vec![Phrase::new("1", "brb", "x")]);
        let mut matcher = Matcher::new(4);
        let win = window("w1");

        type_str(&mut matcher, &win, "BRB");
        assert!(matcher.on_boundary(&store, &win, ' ').is_none());
    }

    #[test]
    fn case_insensitive_phrase_matches_any_casing() {
        let mut phrase = Phrase::new("1", "brb", "x");
        phrase.case_insensitive = true;
        let store = PhraseStore::from_phrases(vec![phrase]);
        let mut matcher = Matcher::new(4);
        let win = window("w1");

        type_str(&mut matcher, &win, "BrB");
        let hit = matcher.on_boundary(&store, &win, ' ').unwrap();
        assert_eq!(hit.typed, "BrB");
    }

    #[test]
    fn tab_trigger_consumes_the_tab() {
        let mut phrase = Phrase::new("1", "addr", "1 Main St");
        phrase.trigger = Trigger::Tab;
        let store = PhraseStore::from_phrases(vec![phrase]);
        let mut matcher = Matcher::new(4);
        let win = window("w1");

        type_str(&mut matcher, &win, "addr");
        assert!(matcher.on_boundary(&store, &win, ' ').is_none(), "space must not fire a tab trigger");

        type_str(&mut matcher, &win, "addr");
        let hit = matcher.on_boundary(&store, &win, '\t').unwrap();
        assert_eq!(hit.include_char, None);
    }

    #[test]
    fn backspace_pops_typed_char() {
        let store = PhraseStore::from_phrases(vec![Phrase::new("1", "brb", "x")]);
        let mut matcher = Matcher::new(4);
        let win = window("w1");

        type_str(&mut matcher, &win, "brbq");
        matcher.backspace(&win);
        assert!(matcher.on_boundary(&store, &win, ' ').is_some());
    }

    #[test]
    fn buffers_are_per_window() {
        let store = PhraseStore::from_phrases(vec![Phrase::new("1", "brb", "x")]);
        let mut matcher = Matcher::new(4);
        let a = window("a");
        let b = window("b");

        type_str(&mut matcher, &a, "br");
        type_str(&mut matcher, &b, "b");
        assert!(matcher.on_boundary(&store, &b, ' ').is_none());

        type_str(&mut matcher, &a, "b");
        assert!(matcher.on_boundary(&store, &a, ' ').is_some());
    }

    #[test]
    fn lru_eviction_caps_tracked_windows() {
        let mut matcher = Matcher::new(2);
        for i in 0..5 {
            matcher.push_char(&window(&format!("w{}", i)), 'a');
        }
        assert_eq!(matcher.tracked_windows(), 2);
        assert!(matcher.buffer_contents("w4").is_some());
        assert!(matcher.buffer_contents("w0").is_none());
    }

    #[test]
    fn buffer_is_bounded() {
        let mut matcher = Matcher::new(2);
        matcher.set_capacity(4);
        let win = window("w1");
        for _ in 0..100 {
            matcher.push_char(&win, 'x');
        }
        let contents = matcher.buffer_contents("w1").unwrap();
        assert!(contents.chars().count() <= MIN_BUFFER_CAP);
    }
}
