//! Benchmarks for session fan-out
//!
//! Registry broadcast is what the hub loop spends its time on.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use relay_hub::core::{decode, WebsocketEvent};
use relay_hub::hub::{Connection, ConnectionInfo, MasterPolicy, SessionRegistry};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

fn populate(
    registry: &mut SessionRegistry,
    session: &str,
    members: usize,
) -> Vec<(Arc<Connection>, mpsc::Receiver<Bytes>)> {
    (0..members)
        .map(|i| {
            let (conn, rx) = Connection::new(ConnectionInfo::new(format!("user{}", i), session), 1024);
            registry.register(conn.clone());
            (conn, rx)
        })
        .collect()
}

fn bench_session_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_broadcast");
    for members in [2usize, 8, 32] {
        let mut registry = SessionRegistry::new(MasterPolicy::Cascade);
        let mut conns = populate(&mut registry, "room", members);
        let event = WebsocketEvent::new("COMMAND_MOVE", "user0", "room", json!([0.1, 0.2, 0.3]));

        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, _| {
            b.iter(|| {
                let delivery = registry.broadcast(black_box(&event));
                for (_, rx) in conns.iter_mut() {
                    while rx.try_recv().is_ok() {}
                }
                delivery
            })
        });
    }
    group.finish();
}

fn bench_wildcard_broadcast(c: &mut Criterion) {
    let mut registry = SessionRegistry::new(MasterPolicy::Cascade);
    let mut conns = Vec::new();
    for s in 0..64 {
        conns.extend(populate(&mut registry, &format!("session{}", s), 4));
    }
    let event = WebsocketEvent::to_all_masters("COMMAND_SET", json!({"command": "SET", "result": "UP"}));

    c.bench_function("wildcard_broadcast_64_sessions", |b| {
        b.iter(|| {
            let delivery = registry.broadcast(black_box(&event));
            for (_, rx) in conns.iter_mut() {
                while rx.try_recv().is_ok() {}
            }
            delivery
        })
    });
}

fn bench_decode_client_frame(c: &mut Criterion) {
    let frame = br#"{"eventType":"COMMAND_MOVE","userId":"alice","sessionId":"room","timestamp":1700000000000,"data":[0.5,-1.0,0.25]}"#;

    c.bench_function("decode_client_frame", |b| {
        b.iter(|| {
            let event: WebsocketEvent = decode(black_box(frame.to_vec())).unwrap();
            event
        })
    });
}

criterion_group!(
    benches,
    bench_session_broadcast,
    bench_wildcard_broadcast,
    bench_decode_client_frame
);
criterion_main!(benches);
