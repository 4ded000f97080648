use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use boxwire_collab::protocol::{ClientEvent, ServerEvent};
use boxwire_collab::presence::PresenceRoom;
use boxwire_collab::router::EventRouter;
use boxwire_core::{Card, CardType, DesignId};
use uuid::Uuid;

fn bench_move_encode(c: &mut Criterion) {
    let event = ServerEvent::CardMoved {
        id: "card-1".into(),
        x: 120.5,
        y: 88.0,
        user_id: Some("alice".into()),
        timestamp: 1_700_000_000_000,
    };

    c.bench_function("card_moved_encode", |b| {
        b.iter(|| black_box(black_box(&event).encode().unwrap()))
    });
}

fn bench_client_decode(c: &mut Criterion) {
    let encoded = ClientEvent::AddCard {
        design_id: DesignId::from("d1"),
        card: Card::new("card-1", CardType::Database, 10.0, 20.0, "orders-db")
            .with_description("primary store"),
    }
    .encode()
    .unwrap();

    c.bench_function("add_card_decode", |b| {
        b.iter(|| black_box(ClientEvent::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_room_fanout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let design = DesignId::from("bench");

    // 100 sessions in one room; the first one moves a card repeatedly.
    let (router, mut handles) = rt.block_on(async {
        let router = EventRouter::new(4096);
        let mut handles = Vec::new();
        for _ in 0..100 {
            let handle = router.connect().await;
            router.join(handle.id(), design.clone(), None).await;
            handles.push(handle);
        }
        router
            .mutate(
                handles[0].id(),
                &design,
                boxwire_core::GraphOp::UpsertCard(Card::new("c", CardType::Service, 0.0, 0.0, "c")),
            )
            .await;
        (router, handles)
    });
    let origin = handles[0].id();

    c.bench_function("move_card_fanout_100_sessions", |b| {
        b.iter(|| {
            rt.block_on(async {
                let op = boxwire_core::GraphOp::MoveCard { id: "c".into(), x: 1.0, y: 2.0 };
                black_box(router.mutate(origin, &design, op).await);
            });
            for handle in handles.iter_mut() {
                black_box(handle.drain_events());
            }
        })
    });
}

fn bench_presence_cursor(c: &mut Criterion) {
    let mut room = PresenceRoom::default();
    let peer = Uuid::new_v4();
    let mut timestamp = 0u64;

    c.bench_function("presence_handle_cursor", |b| {
        b.iter(|| {
            timestamp += 1;
            let event = ServerEvent::CursorMoved {
                session_id: peer,
                user_id: None,
                x: 1.0,
                y: 2.0,
                timestamp,
            };
            black_box(room.handle_event(&event));
        })
    });
}

criterion_group!(
    benches,
    bench_move_encode,
    bench_client_decode,
    bench_room_fanout,
    bench_presence_cursor,
);
criterion_main!(benches);
