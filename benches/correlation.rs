//! Request correlation benchmark suite.
//!
//! Measures round trips over the in-process transport at different
//! concurrency levels, so the numbers reflect the correlation table and
//! receive loop rather than network I/O.
//!
//! Run with: cargo bench --bench correlation
//! Results saved to: target/criterion/

use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use devtools_link::{Connection, ConnectionConfig, MemoryPeer, MemoryTransport};
use futures_util::future::join_all;
use serde_json::json;
use tokio::runtime::Runtime;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const CONCURRENCY: &[usize] = &[1, 16, 128];
const EVENT_BURSTS: &[usize] = &[100, 1000];
const TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Setup
// ============================================================================

/// Opens a connection whose peer echoes every request's params.
async fn echo_connection(max_pending: usize) -> (Connection, Arc<MemoryPeer>) {
    let (transport, peer) = MemoryTransport::pair();
    let config = ConnectionConfig::new().with_max_pending_requests(max_pending);
    let conn = Connection::open_with(async move { Ok(transport) }, config)
        .await
        .expect("memory transport opens");

    let peer = Arc::new(peer);
    {
        let peer = Arc::clone(&peer);
        tokio::spawn(async move {
            while let Some(request) = peer.recv_request().await {
                peer.respond(&request, request["params"].clone());
            }
        });
    }

    (conn, peer)
}

// ============================================================================
// Benchmark: Request Round Trips
// ============================================================================

fn bench_round_trips(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let max = CONCURRENCY.iter().copied().max().unwrap_or(1);
    let (conn, _peer) = rt.block_on(echo_connection(max));

    let mut group = c.benchmark_group("round_trip");

    for &concurrency in CONCURRENCY {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("concurrent", concurrency),
            &concurrency,
            |b, &n| {
                b.to_async(&rt).iter(|| {
                    let conn = conn.clone();
                    async move {
                        let calls = (0..n).map(|i| conn.send("Bench.echo", json!(i), TIMEOUT));
                        for result in join_all(calls).await {
                            result.expect("echo");
                        }
                    }
                });
            },
        );
    }

    group.finish();
    rt.block_on(conn.destroy());
}

// ============================================================================
// Benchmark: Event Fan-out
// ============================================================================

fn bench_event_fanout(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let (conn, peer) = rt.block_on(echo_connection(16));

    let mut group = c.benchmark_group("event_fanout");

    for &burst in EVENT_BURSTS {
        group.throughput(Throughput::Elements(burst as u64));
        group.bench_with_input(BenchmarkId::new("burst", burst), &burst, |b, &n| {
            b.to_async(&rt).iter(|| {
                let conn = conn.clone();
                let peer = Arc::clone(&peer);
                async move {
                    let mut stream = conn.events("Bench.tick");
                    for i in 0..n {
                        peer.push_event("Bench.tick", json!({"i": i}));
                    }
                    for _ in 0..n {
                        stream.recv().await.expect("event");
                    }
                }
            });
        });
    }

    group.finish();
    rt.block_on(conn.destroy());
}

criterion_group!(benches, bench_round_trips, bench_event_fanout);
criterion_main!(benches);
