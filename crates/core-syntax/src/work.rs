//! The background work scheduler: budgets, the idle-scheduling capability,
//! and the worker that drives parsing in cooperative slices.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use core_state::{EditorState, Transaction, TransactionSpec};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, trace};

use crate::context::ParseContext;
use crate::language::{
    ensure_syntax_tree, language_state_field, set_state_effect, syntax_tree, LanguageState,
};

/// Synchronous budget inside a state update, in milliseconds.
pub const APPLY: u64 = 20;
/// Fallback slice length when the host gives no idle deadline.
pub const SLICE: u64 = 100;
/// Minimum slice carved out of a reported idle deadline.
pub const MIN_SLICE: u64 = 25;
/// Minimum pause between slices.
pub const MIN_PAUSE: u64 = 100;
/// Maximum pause before the fallback timer fires.
pub const MAX_PAUSE: u64 = 500;
/// Total parse budget per chunk window, in milliseconds.
pub const CHUNK_BUDGET: u64 = 3000;
/// Length of the rolling chunk window, in milliseconds.
pub const CHUNK_TIME: u64 = 30000;
/// Extra budget granted per document change while focused.
pub const CHANGE_BONUS: u64 = 50;
/// How far past the viewport the parser runs ahead, in characters.
pub const MAX_PARSE_AHEAD: usize = 100_000;
/// Presumed viewport before the renderer reports one, in characters.
pub const INIT_VIEWPORT: usize = 3000;

/// Host capability: asks the host to call [`ParseWorker::run_slice`] at the
/// next idle moment. The engine itself never spins an event loop.
pub trait IdleScheduler: Send {
    fn request_idle(&mut self);
    fn cancel(&mut self);
    /// Whether user input is waiting, so a running slice should yield.
    fn is_input_pending(&self) -> bool {
        false
    }
}

/// The default scheduler: a timer that posts a token into a channel after
/// [`MAX_PAUSE`] milliseconds. The host selects on the receiver and calls
/// `run_slice` on its own thread; nothing runs concurrently with the
/// engine.
pub struct TimerIdle {
    sender: Sender<()>,
    pending: Arc<AtomicBool>,
    delay: Duration,
}

impl TimerIdle {
    pub fn new() -> (TimerIdle, Receiver<()>) {
        Self::with_delay(Duration::from_millis(MAX_PAUSE))
    }

    pub fn with_delay(delay: Duration) -> (TimerIdle, Receiver<()>) {
        let (sender, receiver) = bounded(1);
        (TimerIdle { sender, pending: Arc::new(AtomicBool::new(false)), delay }, receiver)
    }
}

impl IdleScheduler for TimerIdle {
    fn request_idle(&mut self) {
        if self.pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let sender = self.sender.clone();
        let pending = self.pending.clone();
        let delay = self.delay;
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            if pending.swap(false, Ordering::SeqCst) {
                let _ = sender.try_send(());
            }
        });
    }

    fn cancel(&mut self) {
        self.pending.store(false, Ordering::SeqCst);
    }
}

/// A scheduler for tests and fully host-driven setups: just records that
/// work was requested.
pub struct ManualIdle {
    requested: Arc<AtomicBool>,
}

impl ManualIdle {
    pub fn new() -> (ManualIdle, Arc<AtomicBool>) {
        let requested = Arc::new(AtomicBool::new(false));
        (ManualIdle { requested: requested.clone() }, requested)
    }
}

impl IdleScheduler for ManualIdle {
    fn request_idle(&mut self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    fn cancel(&mut self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}

/// Counters describing scheduler activity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerMetricsSnapshot {
    pub slices: u64,
    pub trees_published: u64,
    pub budget_exhaustions: u64,
    pub async_waits: u64,
}

#[derive(Default)]
struct WorkerMetrics {
    slices: u64,
    trees_published: u64,
    budget_exhaustions: u64,
    async_waits: u64,
}

/// Drives background parsing for one editor. The host owns the worker,
/// feeds it every dispatched transaction, reports viewport and focus, and
/// calls [`ParseWorker::run_slice`] when its scheduler asks for idle time.
/// `run_slice` may hand back a transaction (publishing a fresh tree) that
/// the host must dispatch like any other.
pub struct ParseWorker {
    state: EditorState,
    scheduler: Box<dyn IdleScheduler>,
    focused: bool,
    viewport: (usize, usize),
    work_requested: bool,
    chunk_end: Option<Instant>,
    chunk_budget_ms: i64,
    wake: Arc<AtomicBool>,
    metrics: WorkerMetrics,
}

impl ParseWorker {
    pub fn new(state: EditorState, scheduler: Box<dyn IdleScheduler>) -> ParseWorker {
        let viewport = (0, INIT_VIEWPORT.min(state.doc().len()));
        let mut worker = ParseWorker {
            state,
            scheduler,
            focused: true,
            viewport,
            work_requested: false,
            chunk_end: None,
            chunk_budget_ms: -1,
            wake: Arc::new(AtomicBool::new(false)),
            metrics: WorkerMetrics::default(),
        };
        worker.schedule_work();
        if let Some(parse_state) = worker.state.try_field(language_state_field()) {
            let context = parse_state.context.clone();
            worker.check_async(&context);
        }
        worker
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn metrics(&self) -> WorkerMetricsSnapshot {
        WorkerMetricsSnapshot {
            slices: self.metrics.slices,
            trees_published: self.metrics.trees_published,
            budget_exhaustions: self.metrics.budget_exhaustions,
            async_waits: self.metrics.async_waits,
        }
    }

    /// Focus gates chunk-budget refresh: an unfocused editor keeps spending
    /// its old window and never gets a new one.
    pub fn set_focused(&mut self, focused: bool) {
        self.focused = focused;
    }

    pub fn viewport(&self) -> (usize, usize) {
        self.viewport
    }

    /// The renderer's current viewport, in document positions.
    pub fn set_viewport(&mut self, from: usize, to: usize) {
        self.viewport = (from, to.min(self.state.doc().len()));
        if let Some(parse_state) = self.state.try_field(language_state_field()) {
            let context = &parse_state.context;
            if context.update_viewport(self.viewport.0, self.viewport.1)
                || self.viewport.1 > context.tree_len()
            {
                self.schedule_work();
            }
            self.check_async(context);
        }
    }

    /// Called by the host after every dispatched transaction (including the
    /// ones this worker returned).
    pub fn apply_transaction(&mut self, tr: &Transaction) {
        self.state = tr.state();
        if tr.doc_changed() {
            let map = |pos: usize, assoc: i32| {
                tr.changes().map_pos(pos, assoc).unwrap_or_else(|_| self.state.doc().len())
            };
            self.viewport = (map(self.viewport.0, -1), map(self.viewport.1, 1));
        }
        if tr.doc_changed() || tr.selection_set() {
            if self.focused {
                self.chunk_budget_ms += CHANGE_BONUS as i64;
            }
            self.schedule_work();
        }
        if let Some(parse_state) = self.state.try_field(language_state_field()) {
            self.check_async(&parse_state.context.clone());
        }
    }

    /// Re-check for pending work after an async wake-up (the host calls
    /// this after resolving a [`crate::ReadySignal`]).
    pub fn poll_wake(&mut self) {
        if self.wake.swap(false, Ordering::SeqCst) {
            self.schedule_work();
        }
    }

    fn schedule_work(&mut self) {
        if self.work_requested {
            return;
        }
        let Some(parse_state) = self.state.try_field(language_state_field()) else { return };
        if !parse_state.tree.ptr_eq(&parse_state.context.tree())
            || !parse_state.context.is_done(self.state.doc().len())
        {
            self.work_requested = true;
            self.scheduler.request_idle();
        }
    }

    fn check_async(&mut self, context: &ParseContext) {
        for signal in context.take_scheduled() {
            self.metrics.async_waits += 1;
            let wake = self.wake.clone();
            signal.on_ready(move || {
                wake.store(true, Ordering::SeqCst);
            });
        }
    }

    /// Run one budgeted parse slice. `deadline` is the idle time the host
    /// can spare (when it knows); otherwise the slice is bounded by
    /// [`SLICE`] and the remaining chunk budget. Returns a transaction
    /// publishing the new tree when one is ready.
    pub fn run_slice(&mut self, deadline: Option<Duration>) -> Option<Transaction> {
        self.work_requested = false;
        let now = Instant::now();
        let refresh = match self.chunk_end {
            None => true,
            Some(end) => end <= now && self.focused,
        };
        if refresh {
            self.chunk_budget_ms = CHUNK_BUDGET as i64;
            self.chunk_end = Some(now + Duration::from_millis(CHUNK_TIME));
        }
        if self.chunk_budget_ms <= 0 {
            self.metrics.budget_exhaustions += 1;
            debug!(target: "syntax.work", "chunk budget exhausted");
            return None;
        }
        let parse_state = self.state.try_field(language_state_field())?;
        let context = parse_state.context.clone();
        let vp_to = self.viewport.1;
        if parse_state.tree.ptr_eq(&context.tree()) && context.is_done(vp_to + MAX_PARSE_AHEAD) {
            return None;
        }
        let slice_ms = (self.chunk_budget_ms as u64)
            .min(SLICE)
            .min(deadline.map(|d| (d.as_millis() as u64).saturating_sub(5).max(MIN_SLICE)).unwrap_or(u64::MAX));
        let end_time = now + Duration::from_millis(slice_ms);
        // When the viewport is far ahead of the tree, do one exact
        // viewport-first pass before resuming ahead-parsing.
        let viewport_first =
            context.tree_len() < vp_to && self.state.doc().len() > vp_to + 1000;
        let upto = if viewport_first { vp_to } else { vp_to + MAX_PARSE_AHEAD };
        let input_pending = {
            let scheduler = &self.scheduler;
            move || scheduler.is_input_pending()
        };
        let done = {
            let mut until = || input_pending() || Instant::now() > end_time;
            context.work_until(&mut until, Some(upto))
        };
        self.chunk_budget_ms -= now.elapsed().as_millis() as i64;
        self.metrics.slices += 1;
        trace!(
            target: "syntax.work",
            done,
            slice_ms,
            budget_left = self.chunk_budget_ms,
            tree_len = context.tree_len(),
            "slice_end"
        );
        let mut dispatch = None;
        if done || self.chunk_budget_ms <= 0 {
            context.take_tree();
            let published = LanguageState::from_context(context.clone());
            match self
                .state
                .update(vec![TransactionSpec::effects(vec![set_state_effect().of(published)])])
            {
                Ok(tr) => {
                    self.metrics.trees_published += 1;
                    dispatch = Some(tr);
                }
                Err(err) => {
                    core_state::report_exception(&self.state, &anyhow::anyhow!(err));
                }
            }
        }
        if self.chunk_budget_ms > 0 && !(done && !viewport_first) {
            self.schedule_work();
        }
        self.check_async(&context);
        dispatch
    }

    /// Parse synchronously until the tree covers `upto` or `timeout`
    /// expires. Returns whether coverage was reached, plus a transaction
    /// the host should dispatch to publish the result.
    pub fn force_parsing(
        &mut self,
        upto: usize,
        timeout: Duration,
    ) -> (bool, Option<Transaction>) {
        let result = ensure_syntax_tree(&self.state, upto, timeout);
        let success = result.is_some();
        let dispatch = match result {
            Some(tree) if !tree.ptr_eq(&syntax_tree(&self.state)) => {
                self.state.update(vec![TransactionSpec::default()]).ok()
            }
            _ => None,
        };
        (success, dispatch)
    }
}
