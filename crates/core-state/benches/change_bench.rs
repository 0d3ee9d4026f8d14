use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use core_state::{ChangeSet, ChangeSpec, Text};

fn big_doc(lines: usize) -> Text {
    Text::of((0..lines).map(|i| format!("line number {i} with some content")).collect::<Vec<_>>())
        .expect("document")
}

fn single_edit(len: usize, at: usize) -> ChangeSet {
    ChangeSet::of(&ChangeSpec::replace(at, at + 1, Text::from("x")), len).expect("change")
}

fn bench_compose_chain(c: &mut Criterion) {
    let doc = big_doc(2000);
    c.bench_function("compose_100_edits", |b| {
        b.iter_batched(
            || doc.clone(),
            |doc| {
                let mut total = ChangeSet::empty(doc.len());
                for i in 0..100 {
                    let edit = single_edit(total.new_len(), (i * 37) % (total.new_len() - 2));
                    total = total.compose(&edit).expect("compose");
                }
                total
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_apply_and_invert(c: &mut Criterion) {
    let doc = big_doc(2000);
    let len = doc.len();
    let change = ChangeSet::of(
        &ChangeSpec::Group(
            (0..50)
                .map(|i| ChangeSpec::replace(i * 61, i * 61 + 3, Text::from("yyy")))
                .collect(),
        ),
        len,
    )
    .expect("change");
    c.bench_function("apply_invert_round_trip", |b| {
        b.iter(|| {
            let applied = change.apply(&doc).expect("apply");
            let inverted = change.invert(&doc).expect("invert");
            inverted.apply(&applied).expect("undo")
        })
    });
}

fn bench_map_pos(c: &mut Criterion) {
    let len = big_doc(2000).len();
    let change = ChangeSet::of(
        &ChangeSpec::Group(
            (0..200).map(|i| ChangeSpec::insert(i * 23, Text::from("ab"))).collect(),
        ),
        len,
    )
    .expect("change");
    c.bench_function("map_pos_across_200_inserts", |b| {
        b.iter(|| {
            let mut sum = 0usize;
            for pos in (0..len).step_by(97) {
                sum += change.map_pos(pos, 1).expect("in range");
            }
            sum
        })
    });
}

criterion_group!(benches, bench_compose_chain, bench_apply_and_invert, bench_map_pos);
criterion_main!(benches);
