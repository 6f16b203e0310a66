use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};

use crate::clipboard;

/// Everything a template may ask the outside world for. Pure given one
/// context, which keeps the expander testable without a display server.
pub trait ExpandContext {
    fn clipboard(&self) -> String;
    fn selection(&self) -> String;
    fn now(&self) -> DateTime<Local>;
}

/// Live context: real clock, real clipboard behind the configured timeout.
pub struct SystemContext {
    pub clipboard_timeout: Duration,
}

impl ExpandContext for SystemContext {
    fn clipboard(&self) -> String {
        clipboard::read_clipboard(self.clipboard_timeout)
    }

    fn selection(&self) -> String {
        clipboard::read_selection(self.clipboard_timeout)
    }

    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Result of interpreting a phrase body: the literal text to inject plus the
/// caret marks as char positions within that text, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionPlan {
    pub text: String,
    pub caret_marks: Vec<usize>,
}

impl ExpansionPlan {
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            caret_marks: Vec::new(),
        }
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Interpret a phrase body: strftime sequences over the whole body first,
/// then `$C` (clipboard), `$S` (selection) and `$|` (caret mark) tokens.
pub fn expand(body: &str, ctx: &dyn ExpandContext) -> ExpansionPlan {
    let formatted = format_datetime(body, ctx.now());
    split_tokens(&formatted, ctx)
}

/// Run the body through strftime formatting. A body whose `%` sequences do
/// not all parse is returned verbatim, so stray percent signs in ordinary
/// phrases survive.
fn format_datetime(body: &str, now: DateTime<Local>) -> String {
    if !body.contains('%') {
        return body.to_string();
    }
    let items: Vec<Item> = StrftimeItems::new(body).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return body.to_string();
    }
    now.format_with_items(items.into_iter()).to_string()
}

fn split_tokens(body: &str, ctx: &dyn ExpandContext) -> ExpansionPlan {
    let mut text = String::new();
    let mut caret_marks = Vec::new();
    let mut char_count = 0usize;
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' {
            match chars.peek() {
                Some('|') => {
                    chars.next();
                    caret_marks.push(char_count);
                    continue;
                }
                Some('C') => {
                    chars.next();
                    let clip = ctx.clipboard();
                    char_count += clip.chars().count();
                    text.push_str(&clip);
                    continue;
                }
                Some('S') => {
                    chars.next();
                    let selection = ctx.selection();
                    char_count += selection.chars().count();
                    text.push_str(&selection);
                    continue;
                }
                _ => {}
            }
        }
        text.push(c);
        char_count += 1;
    }

    ExpansionPlan { text, caret_marks }
}

/// Reapply the typed abbreviation's casing to the expansion: ALL-CAPS typing
/// uppercases the whole expansion, a capitalized first letter capitalizes the
/// expansion's first letter.
pub fn apply_case(typed: &str, text: &str) -> String {
    let letters: Vec<char> = typed.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return text.to_string();
    }
    if letters.len() > 1 && letters.iter().all(|c| c.is_uppercase()) {
        return text.to_uppercase();
    }
    if letters[0].is_uppercase() {
        let mut out = String::with_capacity(text.len());
        let mut done = false;
        for c in text.chars() {
            if !done && c.is_alphabetic() {
                out.extend(c.to_uppercase());
                done = true;
            } else {
                out.push(c);
            }
        }
        return out;
    }
    text.to_string()
}
