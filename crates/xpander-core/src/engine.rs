use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::Settings;
use crate::error::{Result, XpanderError};
use crate::execution;
use crate::hotkey::{HotkeyAction, HotkeyRouter};
use crate::matcher::{MatchHit, Matcher};
use crate::models::{KeyEvent, KeyInput, Phrase, WindowInfo};
use crate::output::{self, CaretCycle, EnigoSink, ExpansionOutcome, OutputSink};
use crate::store::PhraseStore;
use crate::template::{self, ExpandContext, ExpansionPlan, SystemContext};

/// Lifecycle of the expansion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Paused,
    Stopping,
}

/// What the input tap should do with the physical event just observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Propagate,
    Suppress,
}

/// Engine-to-collaborator notifications: the tray or manager UI decides how
/// to surface these.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    PausedChanged(bool),
    ShowManager,
    PhraseLoadFailed(String),
    HotkeySkipped(String),
    CommandFailed { phrase_id: String, error: String },
    InjectionFailed(String),
}

pub type EventHook = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Work shipped from the tap path to the expansion worker. Everything that
/// may block (clipboard, subprocesses, injection pacing) happens over there.
enum Job {
    Expand { phrase: Phrase, hit: MatchHit },
    CaretAdvance { delta: usize },
    Undo { erase: usize, caret_from_end: usize },
    Shutdown,
}

/// The previous expansion, kept so one Backspace can take it all back.
#[derive(Debug, Clone)]
struct LastExpansion {
    length: usize,
    caret_from_end: usize,
}

/// Mutable per-keystroke state. One mutex guards it, and lifecycle
/// transitions take the same mutex, so no event is processed mid-transition.
struct EngineState {
    matcher: Matcher,
    router: HotkeyRouter,
    caret_cycle: Option<CaretCycle>,
    last_expansion: Option<LastExpansion>,
}

/// The service controller: owns lifecycle, wires matcher and hotkey router
/// into the token expander and output synthesizer.
pub struct Engine {
    settings: Settings,
    store: RwLock<PhraseStore>,
    state: Arc<Mutex<EngineState>>,
    phase: AtomicU8,
    injecting: Arc<AtomicBool>,
    jobs: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    jobs_done: Arc<AtomicU64>,
    events: EventHook,
}

impl Engine {
    pub fn new(settings: Settings, store: PhraseStore) -> Self {
        Self::with_events(settings, store, Arc::new(|event| log::debug!("{:?}", event)))
    }

    pub fn with_events(settings: Settings, store: PhraseStore, events: EventHook) -> Self {
        let retention = settings.buffer_retention;
        Self {
            settings,
            store: RwLock::new(store),
            state: Arc::new(Mutex::new(EngineState {
                matcher: Matcher::new(retention),
                router: HotkeyRouter::new(),
                caret_cycle: None,
                last_expansion: None,
            })),
            phase: AtomicU8::new(ServiceState::Stopped as u8),
            injecting: Arc::new(AtomicBool::new(false)),
            jobs: Mutex::new(None),
            worker: Mutex::new(None),
            jobs_done: Arc::new(AtomicU64::new(0)),
            events,
        }
    }

    pub fn state(&self) -> ServiceState {
        match self.phase.load(Ordering::SeqCst) {
            x if x == ServiceState::Starting as u8 => ServiceState::Starting,
            x if x == ServiceState::Running as u8 => ServiceState::Running,
            x if x == ServiceState::Paused as u8 => ServiceState::Paused,
            x if x == ServiceState::Stopping as u8 => ServiceState::Stopping,
            _ => ServiceState::Stopped,
        }
    }

    fn set_phase(&self, state: ServiceState) {
        self.phase.store(state as u8, Ordering::SeqCst);
    }

    /// True while the service holds the tap, paused or not.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), ServiceState::Running | ServiceState::Paused)
    }

    pub fn is_paused(&self) -> bool {
        self.state() == ServiceState::Paused
    }

    pub fn store(&self) -> RwLockReadGuard<'_, PhraseStore> {
        self.store.read().unwrap()
    }

    /// Start with the live output sink and expansion context.
    pub fn start(&self) -> Result<()> {
        let sink = EnigoSink::new()?;
        let ctx = SystemContext {
            clipboard_timeout: Duration::from_millis(self.settings.clipboard_timeout_ms),
        };
        self.start_with(Box::new(sink), Box::new(ctx))
    }

    /// Start with injected output and context implementations. Registers
    /// hotkey bindings, reports skipped phrases, and spawns the expansion
    /// worker. Any failure leaves the state `Stopped`.
    pub fn start_with(
        &self,
        sink: Box<dyn OutputSink>,
        ctx: Box<dyn ExpandContext + Send>,
    ) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if self.state() != ServiceState::Stopped {
            return Err(XpanderError::Other("service already running".to_string()));
        }
        self.set_phase(ServiceState::Starting);

        {
            let store = self.store.read().unwrap();
            st.matcher.set_capacity(store.max_abbreviation_len());
            for err in store.load_errors() {
                (self.events)(EngineEvent::PhraseLoadFailed(err.to_string()));
            }
            for err in st.router.register_all(&store, &self.settings) {
                (self.events)(EngineEvent::HotkeySkipped(err.to_string()));
            }
        }

        let (tx, rx) = mpsc::channel();
        let worker = Worker {
            state: Arc::clone(&self.state),
            injecting: Arc::clone(&self.injecting),
            jobs_done: Arc::clone(&self.jobs_done),
            settings: self.settings.clone(),
            events: Arc::clone(&self.events),
            sink,
            ctx,
        };
        let handle = match thread::Builder::new()
            .name("expansion-worker".to_string())
            .spawn(move || worker.run(rx))
        {
            Ok(handle) => handle,
            Err(err) => {
                self.set_phase(ServiceState::Stopped);
                return Err(err.into());
            }
        };

        *self.jobs.lock().unwrap() = Some(tx);
        *self.worker.lock().unwrap() = Some(handle);
        self.set_phase(ServiceState::Running);
        log::info!("expansion service running");
        Ok(())
    }

    /// Stop the service. In-flight expansions are abandoned (their worker
    /// jobs are bounded by the command timeout); once this returns, no event
    /// is suppressed anymore.
    pub fn stop(&self) -> Result<()> {
        {
            let _guard = self.state.lock().unwrap();
            if !self.is_running() {
                return Err(XpanderError::ServiceNotRunning);
            }
            self.set_phase(ServiceState::Stopping);
        }

        if let Some(tx) = self.jobs.lock().unwrap().take() {
            let _ = tx.send(Job::Shutdown);
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            if handle.join().is_err() {
                log::error!("expansion worker panicked during shutdown");
            }
        }

        let mut st = self.state.lock().unwrap();
        st.matcher.clear_all();
        st.caret_cycle = None;
        st.last_expansion = None;
        self.set_phase(ServiceState::Stopped);
        log::info!("expansion service stopped");
        Ok(())
    }

    pub fn pause(&self) {
        let _guard = self.state.lock().unwrap();
        if self.is_running() {
            self.set_phase(ServiceState::Paused);
        }
    }

    pub fn resume(&self) {
        let _guard = self.state.lock().unwrap();
        if self.is_running() {
            self.set_phase(ServiceState::Running);
        }
    }

    /// Flip between Running and Paused. Returns the new paused state.
    pub fn toggle_service(&self) -> bool {
        let _guard = self.state.lock().unwrap();
        self.toggle_locked()
    }

    fn toggle_locked(&self) -> bool {
        let paused = match self.state() {
            ServiceState::Running => {
                self.set_phase(ServiceState::Paused);
                true
            }
            ServiceState::Paused => {
                self.set_phase(ServiceState::Running);
                false
            }
            _ => return self.is_paused(),
        };
        log::info!("expansion {}", if paused { "paused" } else { "resumed" });
        (self.events)(EngineEvent::PausedChanged(paused));
        paused
    }

    /// Hot-reload the phrase store without touching the input tap.
    pub fn reload_phrases(&self) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        let mut store = self.store.write().unwrap();
        store.reload()?;
        st.matcher.set_capacity(store.max_abbreviation_len());
        for err in store.load_errors() {
            (self.events)(EngineEvent::PhraseLoadFailed(err.to_string()));
        }
        for err in st.router.register_all(&store, &self.settings) {
            (self.events)(EngineEvent::HotkeySkipped(err.to_string()));
        }
        Ok(())
    }

    /// A keyboard layout switch invalidates whatever translation produced the
    /// buffered characters.
    pub fn on_layout_change(&self) {
        self.state.lock().unwrap().matcher.clear_all();
    }

    /// A pointer click moves the real caret somewhere the buffers know
    /// nothing about.
    pub fn on_pointer_click(&self) {
        let mut st = self.state.lock().unwrap();
        st.matcher.clear_all();
        st.caret_cycle = None;
        st.last_expansion = None;
    }

    /// The synchronous tap path: one call per physical key event, bounded
    /// time, no I/O. Decides whether the event reaches the application.
    pub fn on_key(&self, event: &KeyEvent) -> Disposition {
        // Synthetic events from our own injection pass through untouched.
        if self.injecting.load(Ordering::SeqCst) {
            return Disposition::Propagate;
        }

        let mut st = self.state.lock().unwrap();
        let phase = self.state();
        if !matches!(phase, ServiceState::Running | ServiceState::Paused) {
            return Disposition::Propagate;
        }

        if !event.is_press {
            st.router.on_key_release();
            return Disposition::Propagate;
        }

        if event.modifiers.chord_active() {
            if event.input.is_navigation() {
                st.matcher.clear(&event.window);
                st.caret_cycle = None;
                st.last_expansion = None;
            }
            if let KeyInput::Char(c) = event.input {
                if let Some(action) = st.router.on_key_down(c, &event.modifiers) {
                    return self.handle_hotkey(&mut st, action, &event.window, phase);
                }
            }
            return Disposition::Propagate;
        }

        if phase == ServiceState::Paused {
            return Disposition::Propagate;
        }

        match event.input {
            KeyInput::Char(c) if !c.is_alphanumeric() => {
                let hit = {
                    let store = self.store.read().unwrap();
                    st.matcher.on_boundary(&store, &event.window, c)
                };
                if let Some(hit) = hit {
                    st.caret_cycle = None;
                    st.last_expansion = None;
                    let phrase = self.store.read().unwrap().get(&hit.phrase_id).cloned();
                    if let Some(phrase) = phrase {
                        self.enqueue(Job::Expand { phrase, hit });
                        return Disposition::Suppress;
                    }
                    return Disposition::Propagate;
                }
                if c == '\t' {
                    if let Some(cycle) = st.caret_cycle.as_mut() {
                        if let Some(delta) = cycle.advance() {
                            if cycle.is_exhausted() {
                                st.caret_cycle = None;
                            }
                            if let Some(last) = st.last_expansion.as_mut() {
                                last.caret_from_end = last.caret_from_end.saturating_sub(delta);
                            }
                            self.enqueue(Job::CaretAdvance { delta });
                            return Disposition::Suppress;
                        }
                        st.caret_cycle = None;
                    }
                }
                st.caret_cycle = None;
                st.last_expansion = None;
                Disposition::Propagate
            }
            KeyInput::Char(c) => {
                st.matcher.push_char(&event.window, c);
                st.caret_cycle = None;
                st.last_expansion = None;
                Disposition::Propagate
            }
            KeyInput::Backspace => {
                if self.settings.backspace_undo {
                    if let Some(last) = st.last_expansion.take() {
                        st.caret_cycle = None;
                        st.matcher.clear(&event.window);
                        self.enqueue(Job::Undo {
                            erase: last.length,
                            caret_from_end: last.caret_from_end,
                        });
                        return Disposition::Suppress;
                    }
                }
                st.matcher.backspace(&event.window);
                Disposition::Propagate
            }
            input if input.is_navigation() => {
                st.matcher.clear(&event.window);
                st.caret_cycle = None;
                st.last_expansion = None;
                Disposition::Propagate
            }
            _ => Disposition::Propagate,
        }
    }

    fn handle_hotkey(
        &self,
        st: &mut EngineState,
        action: HotkeyAction,
        window: &WindowInfo,
        phase: ServiceState,
    ) -> Disposition {
        match action {
            HotkeyAction::ToggleService => {
                self.toggle_locked();
                Disposition::Suppress
            }
            HotkeyAction::ShowManager => {
                (self.events)(EngineEvent::ShowManager);
                Disposition::Suppress
            }
            HotkeyAction::Phrase(id) => {
                if phase == ServiceState::Paused {
                    return Disposition::Propagate;
                }
                let phrase = self.store.read().unwrap().get(&id).cloned();
                match phrase {
                    Some(phrase) if phrase.matches_window(window) => {
                        st.caret_cycle = None;
                        st.last_expansion = None;
                        self.enqueue(Job::Expand {
                            phrase,
                            hit: MatchHit {
                                phrase_id: id,
                                erase_len: 0,
                                typed: String::new(),
                                include_char: None,
                            },
                        });
                        Disposition::Suppress
                    }
                    _ => Disposition::Propagate,
                }
            }
        }
    }

    fn enqueue(&self, job: Job) {
        if let Some(tx) = self.jobs.lock().unwrap().as_ref() {
            let _ = tx.send(job);
        }
    }
}

/// Runs off the tap path; the only place allowed to block.
struct Worker {
    state: Arc<Mutex<EngineState>>,
    injecting: Arc<AtomicBool>,
    jobs_done: Arc<AtomicU64>,
    settings: Settings,
    events: EventHook,
    sink: Box<dyn OutputSink>,
    ctx: Box<dyn ExpandContext + Send>,
}

impl Worker {
    fn run(mut self, rx: Receiver<Job>) {
        while let Ok(job) = rx.recv() {
            if matches!(job, Job::Shutdown) {
                break;
            }
            self.handle(job);
            self.jobs_done.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn handle(&mut self, job: Job) {
        match job {
            Job::Expand { phrase, hit } => {
                let plan = self.build_plan(&phrase, &hit.typed);
                let outcome = self.inject(|worker| {
                    output::apply_expansion(
                        worker.sink.as_mut(),
                        hit.erase_len,
                        &plan,
                        hit.include_char,
                        phrase.send,
                    )
                });
                match outcome {
                    Ok(outcome) => self.record_outcome(outcome),
                    Err(err) => {
                        log::error!("injection failed for phrase {}: {}", phrase.id, err);
                        (self.events)(EngineEvent::InjectionFailed(err.to_string()));
                    }
                }
            }
            Job::CaretAdvance { delta } => {
                if let Err(err) = self.inject(|worker| worker.sink.caret_right(delta)) {
                    log::error!("caret advance failed: {}", err);
                }
            }
            Job::Undo {
                erase,
                caret_from_end,
            } => {
                let result = self.inject(|worker| {
                    if caret_from_end > 0 {
                        worker.sink.caret_right(caret_from_end)?;
                    }
                    worker.sink.backspace(erase)
                });
                if let Err(err) = result {
                    log::error!("backspace undo failed: {}", err);
                }
            }
            Job::Shutdown => {}
        }
    }

    /// Raise the provenance flag around synthetic output so the tap passes
    /// our own events through instead of re-matching them.
    fn inject<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.injecting.store(true, Ordering::SeqCst);
        let result = f(self);
        self.injecting.store(false, Ordering::SeqCst);
        result
    }

    fn record_outcome(&self, outcome: ExpansionOutcome) {
        let mut st = self.state.lock().unwrap();
        st.last_expansion = (outcome.injected_len > 0).then(|| LastExpansion {
            length: outcome.injected_len,
            caret_from_end: outcome.caret_from_end,
        });
        st.caret_cycle = outcome.cycle;
    }

    fn build_plan(&self, phrase: &Phrase, typed: &str) -> ExpansionPlan {
        let plan = template::expand(&phrase.body, self.ctx.as_ref());
        if phrase.is_command {
            let timeout = Duration::from_millis(self.settings.command_timeout_ms);
            match execution::run_command(&plan.text, timeout) {
                Ok(stdout) => ExpansionPlan::literal(stdout),
                Err(err) => {
                    log::warn!("command phrase {} failed: {}", phrase.id, err);
                    (self.events)(EngineEvent::CommandFailed {
                        phrase_id: phrase.id.clone(),
                        error: err.to_string(),
                    });
                    ExpansionPlan::literal("")
                }
            }
        } else if phrase.propagate_case {
            ExpansionPlan {
                text: template::apply_case(typed, &plan.text),
                caret_marks: plan.caret_marks,
            }
        } else {
            plan
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HotkeyChord, ModState, Modifier};
    use crate::output::tests::{RecordingSink, SinkOp};
    use crate::template::tests::FakeContext;
    use std::time::Instant;

    fn window() -> WindowInfo {
        WindowInfo {
            id: "w1".to_string(),
            class: "Editor".to_string(),
            title: "notes".to_string(),
        }
    }

    fn press(c: char) -> KeyEvent {
        KeyEvent {
            input: KeyInput::Char(c),
            modifiers: ModState::default(),
            is_press: true,
            window: window(),
        }
    }

    fn press_key(input: KeyInput) -> KeyEvent {
        KeyEvent {
            input,
            modifiers: ModState::default(),
            is_press: true,
            window: window(),
        }
    }

    fn chord_press(c: char, mods: ModState) -> KeyEvent {
        KeyEvent {
            input: KeyInput::Char(c),
            modifiers: mods,
            is_press: true,
            window: window(),
        }
    }

    fn type_text(engine: &Engine, text: &str) {
        for c in text.chars() {
            engine.on_key(&press(c));
        }
    }

    fn wait_jobs(engine: &Engine, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.jobs_done.load(Ordering::SeqCst) < n {
            assert!(Instant::now() < deadline, "worker did not finish {} jobs", n);
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn started_engine(
        phrases: Vec<Phrase>,
        settings: Settings,
        ctx: FakeContext,
    ) -> (Engine, RecordingSink) {
        let sink = RecordingSink::default();
        let engine = Engine::new(settings, PhraseStore::from_phrases(phrases));
        engine
            .start_with(Box::new(sink.clone()), Box::new(ctx))
            .unwrap();
        (engine, sink)
    }

    #[test]
    fn abbreviation_expands_once_and_erases_typed_text() {
        let (engine, sink) = started_engine(
            vec![Phrase::new("1", "brb", "be right back")],
            Settings::default(),
            FakeContext::default(),
        );

        type_text(&engine, "brb");
        assert_eq!(engine.on_key(&press(' ')), Disposition::Suppress);
        wait_jobs(&engine, 1);

        assert_eq!(
            sink.taken(),
            vec![
                SinkOp::Backspace(3),
                SinkOp::Type("be right back ".to_string()),
            ]
        );

        // The boundary cleared the buffer: a second space expands nothing.
        assert_eq!(engine.on_key(&press(' ')), Disposition::Propagate);
        engine.stop().unwrap();
    }

    #[test]
    fn longest_match_wins_through_the_full_path() {
        let (engine, sink) = started_engine(
            vec![Phrase::new("short", "bc", "SHORT"), Phrase::new("long", "abc", "LONG")],
            Settings::default(),
            FakeContext::default(),
        );

        type_text(&engine, "abc");
        engine.on_key(&press(' '));
        wait_jobs(&engine, 1);

        assert_eq!(
            sink.taken(),
            vec![SinkOp::Backspace(3), SinkOp::Type("LONG ".to_string())]
        );
        engine.stop().unwrap();
    }

    #[test]
    fn window_scoped_phrase_does_not_fire_elsewhere() {
        let mut scoped = Phrase::new("1", "sig", "work signature");
        scoped.window_class = vec!["Thunderbird".to_string()];
        let (engine, sink) =
            started_engine(vec![scoped], Settings::default(), FakeContext::default());

        type_text(&engine, "sig");
        assert_eq!(engine.on_key(&press(' ')), Disposition::Propagate);
        assert!(sink.taken().is_empty());
        engine.stop().unwrap();
    }

    #[test]
    fn clipboard_token_splices_at_position() {
        let ctx = FakeContext {
            clipboard: "X".to_string(),
            ..Default::default()
        };
        let (engine, sink) = started_engine(
            vec![Phrase::new("1", "cb", "got [$C]")],
            Settings::default(),
            ctx,
        );

        type_text(&engine, "cb");
        engine.on_key(&press(' '));
        wait_jobs(&engine, 1);

        assert_eq!(
            sink.taken(),
            vec![SinkOp::Backspace(2), SinkOp::Type("got [X] ".to_string())]
        );
        engine.stop().unwrap();
    }

    #[test]
    fn caret_marks_cycle_on_tab_then_disarm() {
        let (engine, sink) = started_engine(
            vec![Phrase::new("1", "tpl", "($|, $|)")],
            Settings::default(),
            FakeContext::default(),
        );

        type_text(&engine, "tpl");
        engine.on_key(&press(' '));
        wait_jobs(&engine, 1);

        // "(, ) " with marks at 1 and 3: caret parks 4 left of the end.
        assert_eq!(sink.taken().last(), Some(&SinkOp::Left(4)));

        // First Tab advances to the second mark.
        assert_eq!(engine.on_key(&press('\t')), Disposition::Suppress);
        wait_jobs(&engine, 2);
        assert_eq!(sink.taken().last(), Some(&SinkOp::Right(2)));

        // Marks exhausted: the next Tab is ordinary input.
        assert_eq!(engine.on_key(&press('\t')), Disposition::Propagate);
        engine.stop().unwrap();
    }

    #[test]
    fn typing_disarms_caret_cycling() {
        let (engine, _sink) = started_engine(
            vec![Phrase::new("1", "tpl", "($|, $|)")],
            Settings::default(),
            FakeContext::default(),
        );

        type_text(&engine, "tpl");
        engine.on_key(&press(' '));
        wait_jobs(&engine, 1);

        engine.on_key(&press('x'));
        assert_eq!(engine.on_key(&press('\t')), Disposition::Propagate);
        engine.stop().unwrap();
    }

    #[test]
    fn command_phrase_injects_captured_stdout() {
        let mut phrase = Phrase::new("1", "hi", "echo hello");
        phrase.is_command = true;
        let (engine, sink) =
            started_engine(vec![phrase], Settings::default(), FakeContext::default());

        type_text(&engine, "hi");
        engine.on_key(&press(' '));
        wait_jobs(&engine, 1);

        assert_eq!(
            sink.taken(),
            vec![SinkOp::Backspace(2), SinkOp::Type("hello ".to_string())]
        );
        engine.stop().unwrap();
    }

    #[test]
    fn hung_command_times_out_and_tap_stays_responsive() {
        let mut phrase = Phrase::new("1", "hang", "sleep 30");
        phrase.is_command = true;
        let mut settings = Settings::default();
        settings.command_timeout_ms = 200;

        let reported: Arc<Mutex<Vec<EngineEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let reported_clone = Arc::clone(&reported);
        let sink = RecordingSink::default();
        let engine = Engine::with_events(
            settings,
            PhraseStore::from_phrases(vec![phrase]),
            Arc::new(move |event| reported_clone.lock().unwrap().push(event)),
        );
        engine
            .start_with(Box::new(sink.clone()), Box::new(FakeContext::default()))
            .unwrap();

        type_text(&engine, "hang");
        engine.on_key(&press(' '));

        // The tap keeps answering while the command is in flight.
        assert_eq!(engine.on_key(&press('x')), Disposition::Propagate);

        wait_jobs(&engine, 1);
        let events = reported.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::CommandFailed { .. })));
        // Empty output: the abbreviation is erased, only the boundary returns.
        assert_eq!(sink.taken()[0], SinkOp::Backspace(4));
        drop(events);
        engine.stop().unwrap();
    }

    #[test]
    fn pause_is_idempotent_and_toggle_chord_still_works() {
        let (engine, sink) = started_engine(
            vec![Phrase::new("1", "brb", "be right back")],
            Settings::default(),
            FakeContext::default(),
        );

        engine.pause();
        engine.pause();
        assert!(engine.is_paused());

        // Matching is off while paused.
        type_text(&engine, "brb");
        assert_eq!(engine.on_key(&press(' ')), Disposition::Propagate);
        assert!(sink.taken().is_empty());

        // The reserved chord resumes even while paused.
        let pause_mods = ModState {
            shift: true,
            super_key: true,
            ..Default::default()
        };
        assert_eq!(
            engine.on_key(&chord_press('p', pause_mods)),
            Disposition::Suppress
        );
        assert!(!engine.is_paused());
        engine.stop().unwrap();
    }

    #[test]
    fn toggle_service_reports_new_paused_state() {
        let (engine, _sink) =
            started_engine(Vec::new(), Settings::default(), FakeContext::default());
        assert!(engine.toggle_service());
        assert!(engine.is_paused());
        assert!(!engine.toggle_service());
        assert!(engine.is_running());
        engine.stop().unwrap();
    }

    #[test]
    fn hotkey_phrase_fires_without_erasing() {
        let mut phrase = Phrase::new("1", "", "pasted");
        phrase.abbreviation = None;
        phrase.hotkey = Some(HotkeyChord::new("k", &[Modifier::Control]));
        let (engine, sink) =
            started_engine(vec![phrase], Settings::default(), FakeContext::default());

        let mods = ModState {
            control: true,
            ..Default::default()
        };
        assert_eq!(engine.on_key(&chord_press('k', mods)), Disposition::Suppress);
        wait_jobs(&engine, 1);

        assert_eq!(sink.taken(), vec![SinkOp::Type("pasted".to_string())]);
        engine.stop().unwrap();
    }

    #[test]
    fn backspace_right_after_expansion_undoes_it() {
        let (engine, sink) = started_engine(
            vec![Phrase::new("1", "brb", "be right back")],
            Settings::default(),
            FakeContext::default(),
        );

        type_text(&engine, "brb");
        engine.on_key(&press(' '));
        wait_jobs(&engine, 1);

        assert_eq!(
            engine.on_key(&press_key(KeyInput::Backspace)),
            Disposition::Suppress
        );
        wait_jobs(&engine, 2);

        // "be right back " is 14 chars; the undo erases all of it.
        assert_eq!(sink.taken().last(), Some(&SinkOp::Backspace(14)));

        // A second Backspace is ordinary input again.
        assert_eq!(
            engine.on_key(&press_key(KeyInput::Backspace)),
            Disposition::Propagate
        );
        engine.stop().unwrap();
    }

    #[test]
    fn synthetic_events_are_not_rematched() {
        let (engine, sink) = started_engine(
            vec![Phrase::new("1", "brb", "be right back")],
            Settings::default(),
            FakeContext::default(),
        );

        engine.injecting.store(true, Ordering::SeqCst);
        type_text(&engine, "brb");
        engine.injecting.store(false, Ordering::SeqCst);

        assert_eq!(engine.on_key(&press(' ')), Disposition::Propagate);
        assert!(sink.taken().is_empty());
        engine.stop().unwrap();
    }

    #[test]
    fn stopped_engine_suppresses_nothing() {
        let (engine, _sink) = started_engine(
            vec![Phrase::new("1", "brb", "be right back")],
            Settings::default(),
            FakeContext::default(),
        );
        type_text(&engine, "brb");
        engine.stop().unwrap();

        assert_eq!(engine.on_key(&press(' ')), Disposition::Propagate);
        assert!(matches!(engine.stop(), Err(XpanderError::ServiceNotRunning)));
    }

    #[test]
    fn propagate_case_follows_typed_casing() {
        let mut phrase = Phrase::new("1", "btw", "by the way");
        phrase.propagate_case = true;
        let (engine, sink) =
            started_engine(vec![phrase], Settings::default(), FakeContext::default());

        type_text(&engine, "BTW");
        engine.on_key(&press(' '));
        wait_jobs(&engine, 1);

        assert_eq!(
            sink.taken(),
            vec![SinkOp::Backspace(3), SinkOp::Type("BY THE WAY ".to_string())]
        );
        engine.stop().unwrap();
    }

    #[test]
    fn layout_switch_clears_pending_buffers() {
        let (engine, sink) = started_engine(
            vec![Phrase::new("1", "brb", "be right back")],
            Settings::default(),
            FakeContext::default(),
        );

        type_text(&engine, "brb");
        engine.on_layout_change();
        assert_eq!(engine.on_key(&press(' ')), Disposition::Propagate);
        assert!(sink.taken().is_empty());
        engine.stop().unwrap();
    }
}
