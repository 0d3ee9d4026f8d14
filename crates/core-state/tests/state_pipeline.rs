use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use core_state::{
    allow_multiple_selections, change_filter, transaction_filter, ChangeSpec, EditorSelection,
    EditorState, FilterResult, SelectionRange, StateConfig, StateError, Text, TrFilterResult,
    TransactionSpec,
};

use core_text::Text as Doc;

fn mk(doc: &str) -> EditorState {
    EditorState::create(StateConfig { doc: Some(Doc::from(doc)), ..Default::default() })
        .expect("state creation")
}

fn mk_with(doc: &str, extensions: Vec<core_state::Extension>) -> EditorState {
    EditorState::create(StateConfig {
        doc: Some(Doc::from(doc)),
        extensions,
        ..Default::default()
    })
    .expect("state creation")
}

#[test]
fn applies_a_simple_change_group() {
    // Replace "ll" by "w" and append "!".
    let state = mk("hello");
    let tr = state
        .update(vec![TransactionSpec::changes(ChangeSpec::Group(vec![
            ChangeSpec::replace(2, 4, Doc::from("w")),
            ChangeSpec::insert(5, Doc::from("!")),
        ]))])
        .unwrap();
    assert_eq!(tr.state().doc().to_string(), "hewo!");
}

#[test]
fn replace_selection_with_multiple_cursors() {
    let state = EditorState::create(StateConfig {
        doc: Some(Doc::from("abcdefgh")),
        selection: Some(
            EditorSelection::create(
                vec![
                    SelectionRange::cursor(0, 0, None, None),
                    SelectionRange::cursor(4, 0, None, None),
                    SelectionRange::cursor(8, 0, None, None),
                ],
                0,
            )
            .unwrap(),
        ),
        extensions: vec![allow_multiple_selections().of(true)],
    })
    .unwrap();
    let spec = state.replace_selection(Doc::from("Q")).unwrap();
    let next = state.update(vec![spec]).unwrap().state();
    assert_eq!(next.doc().to_string(), "QabcdQefghQ");
    let cursors: Vec<usize> = next.selection().ranges().iter().map(|r| r.head()).collect();
    assert_eq!(cursors, [1, 6, 11]);
}

#[test]
fn change_filters_suppress_by_union_of_masks() {
    let filter_a: core_state::ChangeFilter = Arc::new(|_| FilterResult::Suppress(vec![0, 2]));
    let filter_b: core_state::ChangeFilter = Arc::new(|_| FilterResult::Suppress(vec![4, 6]));
    let state = mk_with(
        "onetwo",
        vec![change_filter().of(filter_a), change_filter().of(filter_b)],
    );
    let tr = state
        .update(vec![TransactionSpec::changes(ChangeSpec::delete(0, 6))])
        .unwrap();
    // Deletion suppressed inside [0,2) and [4,6): only "et" goes away.
    assert_eq!(tr.state().doc().to_string(), "onwo");
}

#[test]
fn change_filter_reject_is_final() {
    let reject: core_state::ChangeFilter = Arc::new(|_| FilterResult::Reject);
    let accept: core_state::ChangeFilter = Arc::new(|_| FilterResult::Accept);
    let state = mk_with(
        "abc",
        vec![change_filter().of(reject), change_filter().of(accept)],
    );
    let tr = state
        .update(vec![TransactionSpec::changes(ChangeSpec::delete(0, 3))])
        .unwrap();
    assert_eq!(tr.state().doc().to_string(), "abc");
}

#[test]
fn filters_can_be_disabled_per_spec() {
    let reject: core_state::ChangeFilter = Arc::new(|_| FilterResult::Reject);
    let state = mk_with("abc", vec![change_filter().of(reject)]);
    let tr = state
        .update(vec![TransactionSpec {
            changes: Some(ChangeSpec::delete(0, 1)),
            disable_filters: true,
            ..Default::default()
        }])
        .unwrap();
    assert_eq!(tr.state().doc().to_string(), "bc");
}

#[test]
fn transaction_filter_appends_to_document_end() {
    // Every transaction grows a "!" at the end of the new document.
    let bang: core_state::TransactionFilter = Arc::new(|tr| {
        TrFilterResult::Replace(vec![
            TransactionSpec {
                changes: Some(ChangeSpec::Set(tr.changes().clone())),
                selection: None,
                ..Default::default()
            },
            TransactionSpec {
                changes: Some(ChangeSpec::insert(tr.changes().new_len(), Doc::from("!"))),
                sequential: true,
                ..Default::default()
            },
        ])
    });
    let state = mk_with("one two", vec![transaction_filter().of(bang)]);
    let tr = state
        .update(vec![TransactionSpec::changes(ChangeSpec::insert(3, Doc::from(",")))])
        .unwrap();
    assert_eq!(tr.state().doc().to_string(), "one, two!");
}

#[test]
fn merged_specs_cross_map_positions() {
    // Two specs both addressed in the original document.
    let state = mk("abcdef");
    let tr = state
        .update(vec![
            TransactionSpec::changes(ChangeSpec::insert(2, Doc::from("X"))),
            TransactionSpec::changes(ChangeSpec::insert(4, Doc::from("Y"))),
        ])
        .unwrap();
    assert_eq!(tr.state().doc().to_string(), "abXcdYef");
}

#[test]
fn sequential_specs_address_the_intermediate_document() {
    let state = mk("abcdef");
    let tr = state
        .update(vec![
            TransactionSpec::changes(ChangeSpec::insert(2, Doc::from("X"))),
            TransactionSpec {
                changes: Some(ChangeSpec::insert(3, Doc::from("Y"))),
                sequential: true,
                ..Default::default()
            },
        ])
        .unwrap();
    // The second insert lands right after the first one.
    assert_eq!(tr.state().doc().to_string(), "abXYcdef");
}

#[test]
fn selection_is_mapped_through_changes() {
    let state = EditorState::create(StateConfig {
        doc: Some(Doc::from("hello world")),
        selection: Some(EditorSelection::single(6, 11)),
        ..Default::default()
    })
    .unwrap();
    let tr = state
        .update(vec![TransactionSpec::changes(ChangeSpec::insert(0, Doc::from(">> ")))])
        .unwrap();
    let next = tr.state();
    let main = *next.selection().main();
    assert_eq!((main.anchor(), main.head()), (9, 14));
}

#[test]
fn selection_out_of_bounds_is_rejected() {
    let state = mk("ab");
    let err = state
        .update(vec![TransactionSpec::selection(EditorSelection::cursor(5))])
        .unwrap_err();
    assert!(matches!(err, StateError::Bounds(_)));
}

#[test]
fn multiple_selections_collapse_without_the_facet() {
    let state = EditorState::create(StateConfig {
        doc: Some(Doc::from("abcdef")),
        selection: Some(
            EditorSelection::create(
                vec![
                    SelectionRange::cursor(1, 0, None, None),
                    SelectionRange::cursor(4, 0, None, None),
                ],
                1,
            )
            .unwrap(),
        ),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(state.selection().ranges().len(), 1);
    assert_eq!(state.selection().main().head(), 4);
}

#[test]
fn user_event_annotation_matches_hierarchically() {
    let state = mk("abc");
    let tr = state
        .update(vec![TransactionSpec {
            changes: Some(ChangeSpec::insert(0, Doc::from("x"))),
            user_event: Some("select.pointer".to_string()),
            ..Default::default()
        }])
        .unwrap();
    assert!(tr.is_user_event("select"));
    assert!(tr.is_user_event("select.pointer"));
    assert!(!tr.is_user_event("select.po"));
    assert!(!tr.is_user_event("input"));
}

#[test]
fn time_annotation_is_added_automatically() {
    let state = mk("abc");
    let tr = state.update(vec![TransactionSpec::default()]).unwrap();
    assert!(tr.annotation(core_state::time_annotation()).is_some());
}

#[test]
fn effects_in_merged_specs_are_position_mapped() {
    let mark = core_state::StateEffectType::<usize>::define_mapped(|pos, mapping| {
        mapping.map_pos(*pos, -1).ok()
    });
    let state = mk("abcdef");
    let tr = state
        .update(vec![
            TransactionSpec::changes(ChangeSpec::insert(0, Doc::from("__"))),
            TransactionSpec::effects(vec![mark.of(3)]),
        ])
        .unwrap();
    // The effect was given in original-document coordinates via the second
    // spec, so it is mapped through the first spec's insertion.
    let effect = &tr.effects()[0];
    assert_eq!(*effect.value(&mark).unwrap(), 5);
    let _ = tr.state();
}

#[test]
fn change_by_range_merges_per_range_edits() {
    let state = EditorState::create(StateConfig {
        doc: Some(Doc::from("aa bb cc")),
        selection: Some(
            EditorSelection::create(
                vec![
                    SelectionRange::range(0, 2, None, None),
                    SelectionRange::range(3, 5, None, None),
                    SelectionRange::range(6, 8, None, None),
                ],
                0,
            )
            .unwrap(),
        ),
        extensions: vec![allow_multiple_selections().of(true)],
    })
    .unwrap();
    let spec = state
        .change_by_range(|_, range| {
            Ok(core_state::RangeChange {
                changes: Some(ChangeSpec::replace(range.from, range.to, Doc::from("x"))),
                range: SelectionRange::cursor(range.from + 1, 0, None, None),
                effects: Vec::new(),
            })
        })
        .unwrap();
    let next = state.update(vec![spec]).unwrap().state();
    assert_eq!(next.doc().to_string(), "x x x");
    let heads: Vec<usize> = next.selection().ranges().iter().map(|r| r.head()).collect();
    assert_eq!(heads, [1, 3, 5]);
}

#[test]
fn states_are_independent_snapshots() {
    let s0 = mk("one");
    let tr1 = s0.update(vec![TransactionSpec::changes(ChangeSpec::insert(3, Doc::from("!")))]).unwrap();
    let s1 = tr1.state();
    let tr2 = s0.update(vec![TransactionSpec::changes(ChangeSpec::delete(0, 1))]).unwrap();
    let s2 = tr2.state();
    assert_eq!(s0.doc().to_string(), "one");
    assert_eq!(s1.doc().to_string(), "one!");
    assert_eq!(s2.doc().to_string(), "ne");
}

#[test]
fn slice_doc_reads_ranges() {
    let state = mk("one\ntwo");
    assert_eq!(state.slice_doc(Some(2), Some(5)).unwrap(), "e\nt");
    assert_eq!(state.slice_doc(None, None).unwrap(), "one\ntwo");
}

#[test]
fn builtin_facets_have_defaults() {
    let state = mk("x");
    assert_eq!(state.tab_size(), 4);
    assert!(!state.read_only());
    assert_eq!(state.line_break(), "\n");
    assert_eq!(state.phrase("Find"), "Find");
}

#[test]
fn recompute_only_on_declared_dependencies() {
    use core_state::{Dep, Facet, FacetConfig};

    let doc_runs = Arc::new(AtomicUsize::new(0));
    let sel_runs = Arc::new(AtomicUsize::new(0));
    let doc_facet: Facet<usize, usize> = Facet::define(
        FacetConfig::new(|values: &[&usize]| values.first().map(|v| **v).unwrap_or(0))
            .compare(|a, b| a == b),
    );
    let sel_facet: Facet<usize, usize> = Facet::define(
        FacetConfig::new(|values: &[&usize]| values.first().map(|v| **v).unwrap_or(0))
            .compare(|a, b| a == b),
    );
    let doc_runs2 = doc_runs.clone();
    let sel_runs2 = sel_runs.clone();
    let state = mk_with(
        "abc",
        vec![
            doc_facet.compute(vec![Dep::Doc], move |state| {
                doc_runs2.fetch_add(1, Ordering::Relaxed);
                state.doc().len()
            }),
            sel_facet.compute(vec![Dep::Selection], move |state| {
                sel_runs2.fetch_add(1, Ordering::Relaxed);
                state.selection().main().head()
            }),
        ],
    );
    assert_eq!(*state.facet(&doc_facet), 3);
    assert_eq!(doc_runs.load(Ordering::Relaxed), 1);
    assert_eq!(sel_runs.load(Ordering::Relaxed), 1);

    // A selection-only transaction must not recompute the doc-dependent
    // facet.
    let next = state
        .update(vec![TransactionSpec::selection(EditorSelection::cursor(2))])
        .unwrap()
        .state();
    assert_eq!(doc_runs.load(Ordering::Relaxed), 1);
    assert_eq!(sel_runs.load(Ordering::Relaxed), 2);
    assert_eq!(*next.facet(&sel_facet), 2);

    // A document change recomputes both (selection depends on doc too).
    let next2 = next
        .update(vec![TransactionSpec::changes(ChangeSpec::insert(0, Doc::from("zz")))])
        .unwrap()
        .state();
    assert_eq!(doc_runs.load(Ordering::Relaxed), 2);
    assert_eq!(sel_runs.load(Ordering::Relaxed), 3);
    assert_eq!(*next2.facet(&doc_facet), 5);
}

// Keep the `Text` re-export alive for downstream callers.
#[test]
fn text_reexport_is_the_rope_type() {
    let t: Text = Text::from("re-exported");
    assert_eq!(t.len(), 11);
}
