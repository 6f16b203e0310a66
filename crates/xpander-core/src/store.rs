use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Result, XpanderError};
use crate::models::{HotkeyChord, Phrase};

/// Loads and holds phrase definitions: one JSON file per phrase, nested
/// directories allowed. Malformed files are skipped and reported, never
/// fatal to the rest of the load.
pub struct PhraseStore {
    dir: PathBuf,
    phrases: Vec<Phrase>,
    load_errors: Vec<XpanderError>,
}

impl PhraseStore {
    /// Load every phrase under `dir`. Fails only when the directory itself
    /// cannot be read; per-file errors are collected in `load_errors`.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self {
            dir: dir.into(),
            phrases: Vec::new(),
            load_errors: Vec::new(),
        };
        store.reload()?;
        Ok(store)
    }

    /// An empty store, for hotkey-only setups and tests.
    pub fn empty() -> Self {
        Self {
            dir: PathBuf::new(),
            phrases: Vec::new(),
            load_errors: Vec::new(),
        }
    }

    /// Build a store from already-constructed phrases (tests, collaborator
    /// editors). Applies the same matching order as a disk load.
    pub fn from_phrases(phrases: Vec<Phrase>) -> Self {
        let mut store = Self {
            dir: PathBuf::new(),
            phrases,
            load_errors: Vec::new(),
        };
        store.sort_for_matching();
        store
    }

    pub fn reload(&mut self) -> Result<()> {
        if self.dir.as_os_str().is_empty() {
            return Ok(());
        }
        let mut phrases = Vec::new();
        let mut errors = Vec::new();
        load_dir(&self.dir, &mut phrases, &mut errors)?;
        self.phrases = phrases;
        self.load_errors = errors;
        self.sort_for_matching();
        log::info!(
            "loaded {} phrases from {} ({} skipped)",
            self.phrases.len(),
            self.dir.display(),
            self.load_errors.len()
        );
        Ok(())
    }

    pub fn phrases(&self) -> &[Phrase] {
        &self.phrases
    }

    pub fn get(&self, id: &str) -> Option<&Phrase> {
        self.phrases.iter().find(|p| p.id == id)
    }

    /// Errors from the most recent load, one per skipped file.
    pub fn load_errors(&self) -> &[XpanderError] {
        &self.load_errors
    }

    /// Length in characters of the longest configured abbreviation. Sizes
    /// the matcher's rolling buffers.
    pub fn max_abbreviation_len(&self) -> usize {
        self.phrases
            .iter()
            .map(|p| p.abbreviation_len())
            .max()
            .unwrap_or(0)
    }

    pub fn hotkey_bindings(&self) -> Vec<(HotkeyChord, String)> {
        self.phrases
            .iter()
            .filter_map(|p| p.hotkey.clone().map(|chord| (chord, p.id.clone())))
            .collect()
    }

    /// Newest modification time of any file in the phrase tree. The daemon
    /// polls this to hot-reload on edits.
    pub fn latest_mtime(&self) -> Option<SystemTime> {
        if self.dir.as_os_str().is_empty() {
            return None;
        }
        latest_mtime(&self.dir)
    }

    /// Write a new phrase record and add it to the store.
    pub fn add(&mut self, phrase: Phrase) -> Result<()> {
        if self.dir.as_os_str().is_empty() {
            self.phrases.push(phrase);
        } else {
            let path = self.record_path(&phrase);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, serde_json::to_string_pretty(&phrase)?)?;
            self.phrases.push(phrase);
        }
        self.sort_for_matching();
        Ok(())
    }

    /// Remove a phrase record by id, deleting its file.
    pub fn remove(&mut self, id: &str) -> Result<()> {
        let Some(pos) = self.phrases.iter().position(|p| p.id == id) else {
            return Err(XpanderError::Other(format!("no phrase with id {}", id)));
        };
        let phrase = self.phrases.remove(pos);
        if !self.dir.as_os_str().is_empty() {
            let path = self.record_path(&phrase);
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn record_path(&self, phrase: &Phrase) -> PathBuf {
        let name = if phrase.name.is_empty() {
            format!("{}.json", phrase.id)
        } else {
            format!("{}.json", phrase.name)
        };
        self.dir.join(name)
    }

    /// Iteration order is the matching order: longest abbreviation first,
    /// ties broken by most specific window filter. The matcher takes the
    /// first suffix hit, so longest-match-wins falls out of this sort.
    fn sort_for_matching(&mut self) {
        self.phrases.sort_by(|a, b| {
            b.abbreviation_len()
                .cmp(&a.abbreviation_len())
                .then(b.filter_specificity().cmp(&a.filter_specificity()))
        });
    }
}

fn load_dir(folder: &Path, phrases: &mut Vec<Phrase>, errors: &mut Vec<XpanderError>) -> Result<()> {
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            // One bad subdirectory should not stop the rest of the tree.
            if let Err(err) = load_dir(&path, phrases, errors) {
                errors.push(XpanderError::PhraseLoad {
                    path: path.clone(),
                    reason: err.to_string(),
                });
            }
            continue;
        }
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Phrase>(&contents) {
                Ok(phrase) => phrases.push(phrase),
                Err(err) => {
                    log::warn!("skipping invalid phrase file {}: {}", path.display(), err);
                    errors.push(XpanderError::PhraseLoad {
                        path,
                        reason: err.to_string(),
                    });
                }
            },
            Err(err) => {
                log::warn!("cannot read phrase file {}: {}", path.display(), err);
                errors.push(XpanderError::PhraseLoad {
                    path,
                    reason: err.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn latest_mtime(folder: &Path) -> Option<SystemTime> {
    let mut newest = fs::metadata(folder).and_then(|m| m.modified()).ok();
    if let Ok(entries) = fs::read_dir(folder) {
        for entry in entries.flatten() {
            let path = entry.path();
            let candidate = if path.is_dir() {
                latest_mtime(&path)
            } else {
                entry.metadata().and_then(|m| m.modified()).ok()
            };
            newest = match (newest, candidate) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }
    }
    newest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TitleFilter;

    fn write_phrase(dir: &Path, name: &str, json: &str) {
        fs::write(dir.join(name), json).unwrap();
    }

    #[test]
    fn loads_phrases_recursively() {
        let dir = tempfile::tempdir().unwrap();
        write_phrase(
            dir.path(),
            "brb.json",
            r#"{"id": "1", "abbreviation": "brb", "body": "be right back"}"#,
        );
        let sub = dir.path().join("work");
        fs::create_dir(&sub).unwrap();
        write_phrase(
            &sub,
            "sig.json",
            r#"{"id": "2", "abbreviation": "sig", "body": "Regards"}"#,
        );

        let store = PhraseStore::load(dir.path()).unwrap();
        assert_eq!(store.phrases().len(), 2);
        assert!(store.get("1").is_some());
        assert!(store.get("2").is_some());
        assert_eq!(store.max_abbreviation_len(), 3);
    }

    #[test]
    fn malformed_phrase_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_phrase(
            dir.path(),
            "good.json",
            r#"{"id": "1", "abbreviation": "ok", "body": "fine"}"#,
        );
        write_phrase(dir.path(), "bad.json", "{not json at all");

        let store = PhraseStore::load(dir.path()).unwrap();
        assert_eq!(store.phrases().len(), 1);
        assert_eq!(store.load_errors().len(), 1);
        assert!(matches!(
            store.load_errors()[0],
            XpanderError::PhraseLoad { .. }
        ));
    }

    #[test]
    fn matching_order_prefers_longest_then_most_specific() {
        let long = Phrase::new("long", "abc", "x");
        let short = Phrase::new("short", "bc", "y");
        let mut scoped = Phrase::new("scoped", "bc", "z");
        scoped.window_class = vec!["Firefox".into()];
        scoped.window_title = Some(TitleFilter {
            pattern: "doc".into(),
            case_sensitive: false,
        });

        let store = PhraseStore::from_phrases(vec![short, scoped, long]);
        let order: Vec<&str> = store.phrases().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(order, vec!["long", "scoped", "short"]);
    }

    #[test]
    fn add_and_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PhraseStore::load(dir.path()).unwrap();
        store.add(Phrase::new("1", "omw", "on my way")).unwrap();
        assert!(dir.path().join("omw.json").exists());

        let reloaded = PhraseStore::load(dir.path()).unwrap();
        assert_eq!(reloaded.phrases().len(), 1);

        store.remove("1").unwrap();
        assert!(!dir.path().join("omw.json").exists());
        assert!(store.get("1").is_none());
    }

    #[test]
    fn hotkey_bindings_listed() {
        let mut phrase = Phrase::new("1", "", "clip");
        phrase.abbreviation = None;
        phrase.hotkey = Some(crate::models::HotkeyChord::new(
            "k",
            &[crate::models::Modifier::Control],
        ));
        let store = PhraseStore::from_phrases(vec![phrase, Phrase::new("2", "brb", "back")]);
        let bindings = store.hotkey_bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].1, "1");
    }
}
