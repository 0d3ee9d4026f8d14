//! The parse context: everything the scheduler knows about one document's
//! background parse — the live partial parse, reusable fragments, the last
//! completed tree, the viewport hint, and regions skipped as off-screen.
//!
//! All engine work is single-threaded cooperative; the only suspension
//! points are between `advance` calls on the partial parse. The context is
//! shared (behind an `Arc`) between the state field that owns it and the
//! worker that drives it, with a mutex that is never held across a call
//! into the parser.

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use core_state::ChangeSet;
use core_text::Text;
use tracing::{trace, warn};

use crate::parser::{DocInput, Parser, PartialParse};
use crate::tree::{ChangedRange, Tree, TreeFragment};

/// A wake-up hook for asynchronously-prepared parsers: a nested parser that
/// is not ready yet registers one of these, and resolves it when parsing
/// can proceed (for example once a grammar has loaded).
#[derive(Clone)]
pub struct ReadySignal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    ready: AtomicBool,
    callbacks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl ReadySignal {
    #[allow(clippy::new_without_default)]
    pub fn new() -> ReadySignal {
        ReadySignal {
            inner: Arc::new(SignalInner {
                ready: AtomicBool::new(false),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Mark the signal resolved and run any registered callbacks.
    pub fn resolve(&self) {
        self.inner.ready.store(true, Ordering::Release);
        let callbacks = match self.inner.callbacks.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for callback in callbacks {
            callback();
        }
    }

    /// Run `callback` when the signal resolves (immediately if it already
    /// has).
    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) {
        if self.is_ready() {
            callback();
            return;
        }
        let mut guard = match self.inner.callbacks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.is_ready() {
            drop(guard);
            callback();
        } else {
            guard.push(Box::new(callback));
        }
    }
}

thread_local! {
    // The register identifying which context a reentering parser belongs
    // to, so skipping sub-parsers can record into the right place.
    static CURRENT_CONTEXT: RefCell<Option<ParseContext>> = const { RefCell::new(None) };
}

/// The parse context a currently-running parser belongs to, if any.
pub fn current_context() -> Option<ParseContext> {
    CURRENT_CONTEXT.with(|slot| slot.borrow().clone())
}

struct CtxState {
    parse: Option<Box<dyn PartialParse>>,
    fragments: Vec<TreeFragment>,
    tree: Tree,
    tree_len: usize,
    viewport: (usize, usize),
    skipped: Vec<(usize, usize)>,
    temp_skipped: Vec<(usize, usize)>,
    schedule_on: Vec<ReadySignal>,
}

struct CtxInner {
    parser: Arc<dyn Parser>,
    doc: Text,
    state: Mutex<CtxState>,
}

/// Shared parse bookkeeping for one document version family. Cloning shares
/// the context; `changes` derives a context for an edited document.
#[derive(Clone)]
pub struct ParseContext {
    inner: Arc<CtxInner>,
}

impl ParseContext {
    pub fn create(parser: Arc<dyn Parser>, doc: Text, viewport: (usize, usize)) -> ParseContext {
        Self::with_parts(parser, doc, Vec::new(), Tree::empty(), 0, viewport, Vec::new(), Vec::new())
    }

    #[allow(clippy::too_many_arguments)]
    fn with_parts(
        parser: Arc<dyn Parser>,
        doc: Text,
        fragments: Vec<TreeFragment>,
        tree: Tree,
        tree_len: usize,
        viewport: (usize, usize),
        skipped: Vec<(usize, usize)>,
        schedule_on: Vec<ReadySignal>,
    ) -> ParseContext {
        ParseContext {
            inner: Arc::new(CtxInner {
                parser,
                doc,
                state: Mutex::new(CtxState {
                    parse: None,
                    fragments,
                    tree,
                    tree_len,
                    viewport,
                    skipped,
                    temp_skipped: Vec::new(),
                    schedule_on,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CtxState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn doc(&self) -> &Text {
        &self.inner.doc
    }

    pub fn parser(&self) -> Arc<dyn Parser> {
        self.inner.parser.clone()
    }

    /// The last completed (possibly partial) tree.
    pub fn tree(&self) -> Tree {
        self.lock().tree.clone()
    }

    /// How much of the document the tree covers.
    pub fn tree_len(&self) -> usize {
        self.lock().tree_len
    }

    pub fn viewport(&self) -> (usize, usize) {
        self.lock().viewport
    }

    pub fn fragments(&self) -> Vec<TreeFragment> {
        self.lock().fragments.clone()
    }

    /// Whether a tree covering `0..upto` is available.
    pub fn is_done(&self, upto: usize) -> bool {
        let upto = upto.min(self.inner.doc.len());
        let guard = self.lock();
        guard.tree_len >= upto
            && !guard.fragments.is_empty()
            && guard.fragments[0].from == 0
            && guard.fragments[0].to >= upto
    }

    pub(crate) fn push_temp_skipped(&self, from: usize, to: usize) {
        self.lock().temp_skipped.push((from, to));
    }

    pub(crate) fn schedule_on(&self, signal: ReadySignal) {
        self.lock().schedule_on.push(signal);
    }

    /// Drain the wake-up hooks registered by async nested parsers. The
    /// caller (the work scheduler) composes them into a re-schedule.
    pub fn take_scheduled(&self) -> Vec<ReadySignal> {
        std::mem::take(&mut self.lock().schedule_on)
    }

    pub fn has_pending_schedule(&self) -> bool {
        !self.lock().schedule_on.is_empty()
    }

    /// Record a range as skipped-off-screen, to be re-parsed when the
    /// viewport reaches it.
    pub fn skip_until_in_view(&self, from: usize, to: usize) {
        self.lock().skipped.push((from, to));
    }

    fn with_context<R>(&self, f: impl FnOnce() -> R) -> R {
        CURRENT_CONTEXT.with(|slot| {
            let prev = slot.borrow_mut().replace(self.clone());
            let result = f();
            *slot.borrow_mut() = prev;
            result
        })
    }

    fn start_parse(&self) -> Box<dyn PartialParse> {
        let fragments = self.lock().fragments.clone();
        self.inner.parser.create_parse(
            Box::new(DocInput::new(self.inner.doc.clone())),
            &fragments,
            &[(0, self.inner.doc.len())],
        )
    }

    fn without_temp_skipped(
        guard: &mut MutexGuard<'_, CtxState>,
        mut fragments: Vec<TreeFragment>,
    ) -> Vec<TreeFragment> {
        while let Some((from, to)) = guard.temp_skipped.pop() {
            fragments = TreeFragment::cut(&fragments, from, to);
        }
        fragments
    }

    /// Work within a time budget. Returns true when the tree covers `upto`
    /// (or the whole document).
    pub fn work(&self, budget: Duration, upto: Option<usize>) -> bool {
        let end = Instant::now() + budget;
        self.work_until(&mut || Instant::now() > end, upto)
    }

    /// Work until the predicate turns true (checked after every `advance`).
    pub fn work_until(&self, until: &mut dyn FnMut() -> bool, upto: Option<usize>) -> bool {
        let doc_len = self.inner.doc.len();
        let upto = match upto {
            Some(value) if value >= doc_len => None,
            other => other,
        };
        let target = upto.unwrap_or(doc_len);
        if self.is_done(target) {
            self.take_tree();
            return true;
        }
        self.with_context(|| {
            let mut parse = match self.lock().parse.take() {
                Some(parse) => parse,
                None => self.start_parse(),
            };
            if let Some(bound) = upto {
                if parse.stopped_at().map_or(true, |s| s > bound) && bound < doc_len {
                    parse.stop_at(bound);
                }
            }
            loop {
                let advanced = catch_unwind(AssertUnwindSafe(|| parse.advance()));
                let done = match advanced {
                    Ok(done) => done,
                    Err(payload) => {
                        // A crashing parser is dropped for the rest of the
                        // slice; the document simply stays unparsed.
                        let msg = panic_message(&payload);
                        warn!(target: "syntax.work", error = %msg, "parser panicked; parse abandoned");
                        return false;
                    }
                };
                if let Some(tree) = done {
                    let stopped = parse.stopped_at();
                    {
                        let mut guard = self.lock();
                        let fragments =
                            TreeFragment::add_tree(&tree, &guard.fragments, stopped.is_some());
                        guard.fragments = Self::without_temp_skipped(&mut guard, fragments);
                        guard.tree_len = stopped.unwrap_or(doc_len);
                        guard.tree = tree;
                    }
                    trace!(
                        target: "syntax.work",
                        tree_len = self.tree_len(),
                        upto = target,
                        "parse_complete"
                    );
                    if self.tree_len() < target {
                        parse = self.start_parse();
                    } else {
                        return true;
                    }
                }
                if until() {
                    self.lock().parse = Some(parse);
                    return false;
                }
            }
        })
    }

    /// Freeze the current partial parse into a (possibly incomplete) tree,
    /// so its work is not thrown away.
    pub fn take_tree(&self) {
        let mut parse = match self.lock().parse.take() {
            Some(parse) => parse,
            None => return,
        };
        let pos = parse.parsed_pos();
        if pos < self.lock().tree_len {
            // Not further along than the tree we already have.
            self.lock().parse = Some(parse);
            return;
        }
        if parse.stopped_at().map_or(true, |s| s > pos) {
            parse.stop_at(pos);
        }
        let tree = self.with_context(|| loop {
            let advanced = catch_unwind(AssertUnwindSafe(|| parse.advance()));
            match advanced {
                Ok(Some(tree)) => break Some(tree),
                Ok(None) => {}
                Err(payload) => {
                    let msg = panic_message(&payload);
                    warn!(target: "syntax.work", error = %msg, "parser panicked while finishing");
                    break None;
                }
            }
        });
        let Some(tree) = tree else { return };
        let mut guard = self.lock();
        guard.tree_len = pos;
        guard.tree = tree;
        let fragments = TreeFragment::add_tree(&guard.tree, &guard.fragments, true);
        guard.fragments = Self::without_temp_skipped(&mut guard, fragments);
    }

    fn reset(&self) {
        self.take_tree();
        self.lock().parse = None;
    }

    /// Derive the context for an edited document: fragments are mapped
    /// through the changes, the viewport maps outward, skipped regions map
    /// inward (and are dropped when they collapse).
    pub fn changes(&self, changes: &ChangeSet, new_doc: Text) -> ParseContext {
        self.take_tree();
        let guard = self.lock();
        let mut fragments = guard.fragments.clone();
        let mut tree = guard.tree.clone();
        let mut tree_len = guard.tree_len;
        let mut viewport = guard.viewport;
        let mut skipped = guard.skipped.clone();
        let schedule_on = guard.schedule_on.clone();
        drop(guard);
        if !changes.is_empty() {
            let map = |pos: usize, assoc: i32| match changes.map_pos(pos, assoc) {
                Ok(mapped) => mapped,
                Err(err) => unreachable!("context positions lie inside the document: {err}"),
            };
            let mut ranges = Vec::new();
            changes.iter_changed_ranges(false, |from_a, to_a, from_b, to_b| {
                ranges.push(ChangedRange { from_a, to_a, from_b, to_b });
            });
            fragments = TreeFragment::apply_changes(&fragments, &ranges, 128);
            tree = Tree::empty();
            tree_len = 0;
            viewport = (map(viewport.0, -1), map(viewport.1, 1));
            if !skipped.is_empty() {
                let mut remapped = Vec::with_capacity(skipped.len());
                for (from, to) in skipped {
                    let (from, to) = (map(from, 1), map(to, -1));
                    if from < to {
                        remapped.push((from, to));
                    }
                }
                skipped = remapped;
            }
        }
        Self::with_parts(
            self.inner.parser.clone(),
            new_doc,
            fragments,
            tree,
            tree_len,
            viewport,
            skipped,
            schedule_on,
        )
    }

    /// Move the viewport. Skipped regions that scrolled into view lose
    /// their fragment coverage (so they get re-parsed); returns true when
    /// that happened and more work should be scheduled.
    pub fn update_viewport(&self, from: usize, to: usize) -> bool {
        {
            let mut guard = self.lock();
            if guard.viewport == (from, to) {
                return false;
            }
            guard.viewport = (from, to);
            let start_len = guard.skipped.len();
            let mut i = 0;
            while i < guard.skipped.len() {
                let (skip_from, skip_to) = guard.skipped[i];
                if skip_from < to && skip_to > from {
                    guard.fragments = TreeFragment::cut(&guard.fragments, skip_from, skip_to);
                    guard.skipped.remove(i);
                } else {
                    i += 1;
                }
            }
            if guard.skipped.len() >= start_len {
                return false;
            }
        }
        self.reset();
        true
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
