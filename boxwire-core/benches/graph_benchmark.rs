use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;
use boxwire_core::{Card, CardType, Connection, Graph, GraphOp};

fn populated_graph(cards: usize) -> Graph {
    let mut graph = Graph::new();
    for i in 0..cards {
        graph.upsert_card(Card::new(format!("c{i}"), CardType::Service, i as f64, 0.0, "svc"));
    }
    for i in 1..cards {
        let from = format!("c{}", i - 1);
        graph.upsert_connection(Connection::new(format!("e{i}"), from, format!("c{i}")));
    }
    graph
}

fn bench_move_card(c: &mut Criterion) {
    let mut group = c.benchmark_group("Graph Operations");
    group.throughput(Throughput::Elements(1));

    let mut graph = populated_graph(500);
    group.bench_function("move_card_500", |b| {
        b.iter(|| {
            black_box(graph.apply(black_box(&GraphOp::MoveCard {
                id: "c250".into(),
                x: 1.0,
                y: 2.0,
            })));
        })
    });

    group.finish();
}

fn bench_delete_cascade(c: &mut Criterion) {
    c.bench_function("delete_card_cascade_500", |b| {
        b.iter_batched(
            || populated_graph(500),
            |mut graph| black_box(graph.delete_card("c250")),
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let graph = populated_graph(1_000);
    c.bench_function("snapshot_1000", |b| b.iter(|| black_box(graph.snapshot())));
}

criterion_group!(benches, bench_move_card, bench_delete_cascade, bench_snapshot);
criterion_main!(benches);
