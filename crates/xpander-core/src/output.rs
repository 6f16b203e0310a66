use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use enigo::{Direction, Enigo, Key, Keyboard};

use crate::clipboard::set_clipboard_text;
use crate::error::{Result, XpanderError};
use crate::keyboard::create_keyboard_controller;
use crate::models::SendMethod;
use crate::template::ExpansionPlan;

/// Synthetic output operations used by the Output Synthesizer. One live
/// implementation over enigo; tests record the calls instead.
pub trait OutputSink: Send {
    fn backspace(&mut self, count: usize) -> Result<()>;
    fn type_text(&mut self, text: &str) -> Result<()>;
    fn paste_text(&mut self, text: &str) -> Result<()>;
    fn caret_left(&mut self, count: usize) -> Result<()>;
    fn caret_right(&mut self, count: usize) -> Result<()>;
}

/// Remaining caret marks after an expansion, as rightward char deltas from
/// the current mark. Tab advances through them in declaration order; any
/// other typed character disarms the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaretCycle {
    deltas: VecDeque<usize>,
}

impl CaretCycle {
    pub fn advance(&mut self) -> Option<usize> {
        self.deltas.pop_front()
    }

    pub fn is_exhausted(&self) -> bool {
        self.deltas.is_empty()
    }
}

/// What one applied expansion left behind: how much text went out and where
/// the synthetic caret ended up, counted from the end of the injected text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionOutcome {
    pub injected_len: usize,
    pub caret_from_end: usize,
    pub cycle: Option<CaretCycle>,
}

/// Erase the typed abbreviation, inject the expansion (plus the boundary
/// character that completed it, when there is one) and park the synthetic
/// caret on the first mark.
pub fn apply_expansion(
    sink: &mut dyn OutputSink,
    erase_len: usize,
    plan: &ExpansionPlan,
    include_char: Option<char>,
    send: SendMethod,
) -> Result<ExpansionOutcome> {
    if erase_len > 0 {
        sink.backspace(erase_len)?;
    }

    let mut text = plan.text.clone();
    if let Some(c) = include_char {
        text.push(c);
    }
    let injected_len = text.chars().count();

    if !text.is_empty() {
        match send {
            SendMethod::Type => sink.type_text(&text)?,
            SendMethod::Paste => sink.paste_text(&text)?,
        }
    }

    let Some(&first) = plan.caret_marks.first() else {
        return Ok(ExpansionOutcome {
            injected_len,
            caret_from_end: 0,
            cycle: None,
        });
    };

    let caret_from_end = injected_len - first;
    sink.caret_left(caret_from_end)?;

    let deltas: VecDeque<usize> = plan
        .caret_marks
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .collect();
    Ok(ExpansionOutcome {
        injected_len,
        caret_from_end,
        cycle: (!deltas.is_empty()).then_some(CaretCycle { deltas }),
    })
}

const CHUNK_SIZE: usize = 512;
const KEY_DELAY: Duration = Duration::from_millis(2);

/// The live sink: synthesizes key events through enigo.
pub struct EnigoSink {
    enigo: Enigo,
}

impl EnigoSink {
    pub fn new() -> Result<Self> {
        Ok(Self {
            enigo: create_keyboard_controller()?,
        })
    }

    fn click(&mut self, key: Key, what: &str) -> Result<()> {
        self.enigo
            .key(key, Direction::Click)
            .map_err(|err| XpanderError::Injection(format!("failed to send {}: {}", what, err)))
    }
}

impl OutputSink for EnigoSink {
    fn backspace(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            thread::sleep(KEY_DELAY);
            self.click(Key::Backspace, "backspace")?;
        }
        Ok(())
    }

    /// Type text in chunks with short settles in between; one long burst
    /// overruns the keyboard buffer on some toolkits. Newlines go out as
    /// Return presses so multi-line phrases keep their shape.
    fn type_text(&mut self, text: &str) -> Result<()> {
        for (i, line) in text.split('\n').enumerate() {
            if i > 0 {
                self.click(Key::Return, "newline")?;
                thread::sleep(Duration::from_millis(15));
            }
            for chunk in line.chars().collect::<Vec<_>>().chunks(CHUNK_SIZE) {
                let chunk_str: String = chunk.iter().collect();
                if chunk_str.is_empty() {
                    continue;
                }
                self.enigo
                    .text(&chunk_str)
                    .map_err(|err| XpanderError::Injection(format!("failed to type text: {}", err)))?;
                thread::sleep(Duration::from_millis(10));
            }
        }
        Ok(())
    }

    /// Deliver via the clipboard and a synthetic Ctrl+V. Faster than typing
    /// for large phrases and immune to layout translation.
    fn paste_text(&mut self, text: &str) -> Result<()> {
        set_clipboard_text(text)?;
        thread::sleep(Duration::from_millis(20));
        self.enigo
            .key(Key::Control, Direction::Press)
            .map_err(|err| XpanderError::Injection(format!("failed to press ctrl: {}", err)))?;
        let result = self.click(Key::Unicode('v'), "paste");
        let _ = self.enigo.key(Key::Control, Direction::Release);
        result
    }

    fn caret_left(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            thread::sleep(KEY_DELAY);
            self.click(Key::LeftArrow, "left arrow")?;
        }
        Ok(())
    }

    fn caret_right(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            thread::sleep(KEY_DELAY);
            self.click(Key::RightArrow, "right arrow")?;
        }
        Ok(())
    }
}
