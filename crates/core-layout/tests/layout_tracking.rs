use core_layout::{
    ChangedRange, DecoRange, Decoration, DecorationSet, HeightMap, HeightOracle, QueryType,
};
use core_state::{ChangeSpec, EditorState, StateConfig, TransactionSpec};
use core_text::Text;

/// A minimal host-side layout tracker: owns a height map and keeps it in
/// sync with state transactions, the way a view component would.
struct LayoutTracker {
    map: HeightMap,
    oracle: HeightOracle,
    decorations: Vec<DecorationSet>,
}

impl LayoutTracker {
    fn new(state: &EditorState, decorations: Vec<DecorationSet>) -> LayoutTracker {
        let oracle = HeightOracle::new(state.doc().clone());
        let map = HeightMap::empty().apply_changes(
            &decorations,
            &Text::empty(),
            &oracle,
            &[ChangedRange { from_a: 0, to_a: 0, from_b: 0, to_b: state.doc().len() }],
        );
        LayoutTracker { map, oracle, decorations }
    }

    fn apply(&mut self, tr: &core_state::Transaction) {
        if !tr.doc_changed() {
            return;
        }
        let old_doc = self.oracle.doc.clone();
        self.oracle.set_doc(tr.new_doc());
        let ranges = ChangedRange::from_changes(tr.changes());
        self.map = self.map.apply_changes(&self.decorations, &old_doc, &self.oracle, &ranges);
    }
}

fn mk(doc: &str) -> EditorState {
    EditorState::create(StateConfig { doc: Some(Text::from(doc)), ..Default::default() })
        .expect("state creation")
}

fn lines(n: usize) -> String {
    (0..n).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n")
}

#[test]
fn tracks_document_length_through_transactions() {
    let state = mk(&lines(100));
    let mut tracker = LayoutTracker::new(&state, vec![]);
    assert_eq!(tracker.map.len(), state.doc().len());

    let tr = state
        .update(vec![TransactionSpec::changes(ChangeSpec::Group(vec![
            ChangeSpec::replace(3, 9, Text::from("a much longer replacement")),
            ChangeSpec::insert(40, Text::from("x\ny\nz")),
        ]))])
        .unwrap();
    tracker.apply(&tr);
    assert_eq!(tracker.map.len(), tr.state().doc().len());
}

#[test]
fn height_grows_with_inserted_lines() {
    let state = mk(&lines(10));
    let mut tracker = LayoutTracker::new(&state, vec![]);
    let before = tracker.map.height();
    let tr = state
        .update(vec![TransactionSpec::changes(ChangeSpec::insert(
            0,
            Text::from("one\ntwo\nthree\n"),
        ))])
        .unwrap();
    tracker.apply(&tr);
    let after = tracker.map.height();
    assert!((after - before - 3.0 * tracker.oracle.line_height).abs() < 0.001);
}

#[test]
fn deletion_across_lines_shrinks_height() {
    let state = mk(&lines(20));
    let mut tracker = LayoutTracker::new(&state, vec![]);
    let before = tracker.map.height();
    // Delete lines 5..10 (by character range).
    let from = tracker.oracle.doc.line(5).unwrap().from;
    let to = tracker.oracle.doc.line(10).unwrap().from;
    let tr = state
        .update(vec![TransactionSpec::changes(ChangeSpec::delete(from, to))])
        .unwrap();
    tracker.apply(&tr);
    assert_eq!(tracker.map.len(), tr.state().doc().len());
    assert!((before - tracker.map.height() - 5.0 * tracker.oracle.line_height).abs() < 0.001);
}

#[test]
fn vertical_queries_follow_edits() {
    let state = mk(&lines(50));
    let mut tracker = LayoutTracker::new(&state, vec![]);
    let tr = state
        .update(vec![TransactionSpec::changes(ChangeSpec::insert(
            0,
            Text::from("inserted\n"),
        ))])
        .unwrap();
    tracker.apply(&tr);
    let doc = tr.state().doc().clone();
    // Line 2 is the old line 1, one line height down.
    let line2 = doc.line(2).unwrap();
    let info = tracker.map.line_at(line2.from, 0.0, QueryType::ByPos, &tracker.oracle, 0.0, 0);
    assert_eq!(info.from, line2.from);
    assert!((info.top - tracker.oracle.line_height).abs() < 0.001);
    let by_height = tracker.map.block_at(info.top + 1.0, &tracker.oracle, 0.0, 0);
    assert_eq!(by_height.from, line2.from);
}

#[test]
fn block_decorations_participate_in_rebuilds() {
    let state = mk(&lines(30));
    let target = state.doc().line(10).unwrap();
    let decorations = vec![DecorationSet::of(vec![DecoRange {
        from: target.from,
        to: target.from,
        deco: Decoration::Widget { block: true, height: 40.0, breaks: 0, side: -1 },
    }])];
    let mut tracker = LayoutTracker::new(&state, decorations);
    let plain = 30.0 * tracker.oracle.line_height;
    assert!((tracker.map.height() - plain - 40.0).abs() < 0.001);

    // An edit in the widget's line keeps the widget's height around.
    let tr = state
        .update(vec![TransactionSpec::changes(ChangeSpec::insert(
            target.from,
            Text::from("zz"),
        ))])
        .unwrap();
    tracker.apply(&tr);
    assert_eq!(tracker.map.len(), tr.state().doc().len());
    assert!((tracker.map.height() - plain - 40.0).abs() < 0.001);
}
