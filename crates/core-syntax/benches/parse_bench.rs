use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use core_state::{ChangeSpec, EditorState, StateConfig, TransactionSpec};
use core_syntax::{
    ensure_syntax_tree, Language, ParseInput, Parser, PartialParse, Tree, TreeFragment,
};
use core_text::Text;

/// A cheap line-counting parser: fast enough that the benches measure the
/// scheduler and fragment plumbing, not fake grammar work.
struct LineParser;

struct LineParse {
    input: Box<dyn ParseInput>,
    fragments: Vec<TreeFragment>,
    pos: usize,
    stopped: Option<usize>,
}

impl PartialParse for LineParse {
    fn advance(&mut self) -> Option<Tree> {
        let limit = self.stopped.unwrap_or(usize::MAX).min(self.input.len());
        if self.pos < limit {
            if let Some(fragment) =
                self.fragments.iter().find(|f| f.from <= self.pos && f.to > self.pos)
            {
                self.pos = fragment.to.min(limit);
            } else {
                let chunk = self.input.chunk(self.pos);
                let step = chunk.chars().count().max(1);
                self.pos = (self.pos + step).min(limit);
            }
        }
        if self.pos >= limit {
            Some(Tree::new("Document", limit, Vec::new()))
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

impl Parser for LineParser {
    fn create_parse(
        &self,
        input: Box<dyn ParseInput>,
        fragments: &[TreeFragment],
        _ranges: &[(usize, usize)],
    ) -> Box<dyn PartialParse> {
        Box::new(LineParse { input, fragments: fragments.to_vec(), pos: 0, stopped: None })
    }
}

fn mk_state(lines: usize) -> EditorState {
    let doc = Text::of(
        (0..lines).map(|i| format!("fn item_{i}() {{ body(); }}")).collect::<Vec<_>>(),
    )
    .expect("document");
    let lang = Language::new("bench", Arc::new(LineParser));
    EditorState::create(StateConfig {
        doc: Some(doc),
        extensions: vec![lang.extension()],
        ..Default::default()
    })
    .expect("state")
}

fn bench_full_parse(c: &mut Criterion) {
    c.bench_function("ensure_tree_20k_lines", |b| {
        b.iter_batched(
            || mk_state(20_000),
            |state| {
                let len = state.doc().len();
                ensure_syntax_tree(&state, len, Duration::from_secs(60)).expect("parse")
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_incremental_reparse(c: &mut Criterion) {
    let state = mk_state(20_000);
    let len = state.doc().len();
    ensure_syntax_tree(&state, len, Duration::from_secs(60)).expect("initial parse");
    c.bench_function("reparse_after_small_edit", |b| {
        b.iter_batched(
            || {
                state
                    .update(vec![TransactionSpec::changes(ChangeSpec::replace(
                        10,
                        13,
                        Text::from("xyz"),
                    ))])
                    .expect("transaction")
            },
            |tr| {
                let next = tr.state();
                ensure_syntax_tree(&next, next.doc().len(), Duration::from_secs(60))
                    .expect("reparse")
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_full_parse, bench_incremental_reparse);
criterion_main!(benches);
