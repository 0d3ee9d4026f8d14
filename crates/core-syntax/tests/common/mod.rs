use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use core_state::{EditorState, StateConfig};
use core_syntax::{Language, ParseInput, Parser, PartialParse, Tree, TreeFragment};
use core_text::Text;

/// A deterministic stand-in for a real grammar: parses a fixed number of
/// characters per `advance`, sleeping a little each step so time budgets
/// behave predictably, and jumps over regions covered by reusable
/// fragments.
pub struct SlowParser {
    pub chars_per_advance: usize,
    pub delay: Duration,
    pub advances: Arc<AtomicUsize>,
    pub reused: Arc<AtomicUsize>,
}

impl SlowParser {
    pub fn new(chars_per_advance: usize, delay: Duration) -> SlowParser {
        SlowParser {
            chars_per_advance,
            delay,
            advances: Arc::new(AtomicUsize::new(0)),
            reused: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct SlowParse {
    input: Box<dyn ParseInput>,
    fragments: Vec<TreeFragment>,
    pos: usize,
    stopped: Option<usize>,
    chars_per_advance: usize,
    delay: Duration,
    advances: Arc<AtomicUsize>,
    reused: Arc<AtomicUsize>,
}

impl SlowParse {
    fn limit(&self) -> usize {
        self.stopped.unwrap_or(usize::MAX).min(self.input.len())
    }

    fn finish(&self) -> Tree {
        Tree::new("Document", self.limit(), Vec::new())
    }
}

impl PartialParse for SlowParse {
    fn advance(&mut self) -> Option<Tree> {
        let limit = self.limit();
        if self.pos >= limit {
            return Some(self.finish());
        }
        let reusable = self
            .fragments
            .iter()
            .find(|f| f.from <= self.pos && f.to > self.pos);
        if let Some(fragment) = reusable {
            self.reused.fetch_add(1, Ordering::Relaxed);
            self.pos = fragment.to.min(limit);
        } else {
            self.advances.fetch_add(1, Ordering::Relaxed);
            std::thread::sleep(self.delay);
            self.pos = (self.pos + self.chars_per_advance).min(limit);
        }
        if self.pos >= limit {
            Some(self.finish())
        } else {
            None
        }
    }

    fn parsed_pos(&self) -> usize {
        self.pos
    }

    fn stop_at(&mut self, pos: usize) {
        self.stopped = Some(self.stopped.map_or(pos, |s| s.min(pos)));
    }

    fn stopped_at(&self) -> Option<usize> {
        self.stopped
    }
}

impl Parser for SlowParser {
    fn create_parse(
        &self,
        input: Box<dyn ParseInput>,
        fragments: &[TreeFragment],
        _ranges: &[(usize, usize)],
    ) -> Box<dyn PartialParse> {
        Box::new(SlowParse {
            input,
            fragments: fragments.to_vec(),
            pos: 0,
            stopped: None,
            chars_per_advance: self.chars_per_advance,
            delay: self.delay,
            advances: self.advances.clone(),
            reused: self.reused.clone(),
        })
    }
}

/// Route scheduler trace output to the test console when RUST_LOG is set.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn doc_of_lines(lines: usize) -> Text {
    Text::of((0..lines).map(|i| format!("line {i} of the test doc")).collect::<Vec<_>>())
        .expect("document")
}

pub fn mk_state(doc: Text, parser: Arc<dyn Parser>) -> EditorState {
    let lang = Language::new("testlang", parser);
    EditorState::create(StateConfig {
        doc: Some(doc),
        extensions: vec![lang.extension()],
        ..Default::default()
    })
    .expect("state creation")
}
