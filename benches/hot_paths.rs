use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use evbatch::aggregate::{Aggregate, AggregateStore, Axis, Histogram};
use evbatch::collections::{Collection, EventRecord};
use evbatch::manifest::{FileManifest, ManifestEntry};
use evbatch::partition::{select_files, EventRange};
use evbatch::plotters::{Plotter, TriggerCellPlotter};
use evbatch::reader::{EntryCursor, SequentialEntryReader};
use evbatch::sink::MemorySink;
use evbatch::tree::{write_tree, Column, Tree};

const CELLS: usize = 512;
const ENTRIES: u64 = 10_000;

fn trigger_cells() -> Collection {
    let n = CELLS as f64;
    let ramp = |scale: f64, offset: f64| -> Vec<f64> {
        (0..CELLS).map(|i| offset + scale * i as f64 / n).collect()
    };
    Collection::from_columns([
        ("energy", ramp(2.0, 0.0)),
        ("subdet", vec![3.0; CELLS]),
        ("layer", (0..CELLS).map(|i| (i % 52 + 1) as f64).collect()),
        ("z", ramp(150.0, 320.0)),
        ("wafertype", vec![1.0; CELLS]),
        ("eta", ramp(1.5, 1.5)),
        ("phi", ramp(6.2, -3.1)),
    ])
    .expect("consistent columns")
}

fn bench_histogram_fill(c: &mut Criterion) {
    let x = Axis::new(100, -3.5, 3.5).expect("axis");
    let y = Axis::new(100, 0.0, 2.0).expect("axis");
    let h = Histogram::h2("energyVeta", "energy vs eta", x, y);

    c.bench_function("histogram/h2_fill", |b| {
        b.iter(|| h.fill(black_box(&[1.7, 0.4]), black_box(1.0)).expect("fill"))
    });
}

fn bench_trigger_cell_plotter(c: &mut Criterion) {
    let mut store = AggregateStore::new(Box::new(MemorySink::new()));
    let mut plotter = TriggerCellPlotter::new("tc", "TC");
    plotter.book(&mut store).expect("book");

    let mut collections = BTreeMap::new();
    collections.insert("tc".to_string(), trigger_cells());
    let record = EventRecord {
        cursor: EntryCursor::default(),
        weight: 1.0,
        collections,
    };

    c.bench_function("plotter/trigger_cells_512", |b| {
        b.iter(|| plotter.fill(black_box(&record)).expect("fill"))
    });
}

fn bench_reader_advance(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sample.json");
    let tree = Tree::new(ENTRIES).with_column(
        "id",
        Column::Scalar((0..ENTRIES).map(|v| v as f64).collect()),
    );
    write_tree(&path, "Ntuple", tree).expect("write tree");
    let manifest = FileManifest::new(vec![ManifestEntry::new(path, ENTRIES)]);
    let range = EventRange::new(0, ENTRIES).expect("range");

    // The file is opened lazily on the first advance, so the first step
    // includes decoding; the rest measure pure cursor bookkeeping.
    c.bench_function("reader/advance_10k", |b| {
        b.iter_batched(
            || {
                let mut reader = SequentialEntryReader::new("Ntuple", range, None);
                reader.set_source(select_files(range, &manifest));
                reader
            },
            |mut reader| {
                while reader.advance().expect("advance") {}
                black_box(reader.cursor().n_total_entries)
            },
            BatchSize::LargeInput,
        )
    });
}

fn bench_suite(c: &mut Criterion) {
    bench_histogram_fill(c);
    bench_trigger_cell_plotter(c);
    bench_reader_advance(c);
}

criterion_group!(benches, bench_suite);
criterion_main!(benches);
