//! Batch sync benchmark suite.
//!
//! Measures request fan-out against an in-process Electrum server:
//! - Descriptor counts: 10, 100, 1000
//! - Modes: one call per descriptor, JSON-RPC batch array, bounded concurrency
//!
//! Run with: cargo bench --bench batch_sync
//! Results saved to: target/criterion/

use std::sync::Arc;

use async_trait::async_trait;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use electrum_sync::transport::BoxedSocket;
use electrum_sync::{AddressDescriptor, Connector, ElectrumClient, ServerConfig};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const DESCRIPTOR_COUNTS: &[usize] = &[10, 100, 1000];

// ============================================================================
// In-process server
// ============================================================================

/// Connector that serves every connection from a task in the same runtime.
struct LocalConnector;

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, _server: &ServerConfig) -> electrum_sync::Result<BoxedSocket> {
        let (client, server) = tokio::io::duplex(1024 * 1024);
        tokio::spawn(serve(server));
        Ok(Box::new(client))
    }
}

async fn serve(stream: DuplexStream) {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(frame) = serde_json::from_str::<Value>(&line) else {
            continue;
        };

        let reply = match frame {
            Value::Array(requests) => Value::Array(requests.iter().map(answer).collect()),
            request => answer(&request),
        };

        if write.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
            break;
        }
    }
}

fn answer(request: &Value) -> Value {
    let result = match request["method"].as_str() {
        Some("server.version") => json!(["bench 1.0", "1.4"]),
        Some("blockchain.scripthash.get_balance") => json!({"confirmed": 1000, "unconfirmed": 0}),
        Some("blockchain.scripthash.get_history") => json!([
            {"height": 100, "tx_hash": "h1"},
            {"height": 101, "tx_hash": "h2"}
        ]),
        _ => Value::Null,
    };

    json!({"jsonrpc": "2.0", "id": request["id"], "result": result})
}

async fn connected_client() -> anyhow::Result<ElectrumClient> {
    let client = ElectrumClient::builder()
        .server(ServerConfig::tcp("bench.local", 50001))
        .connector(Arc::new(LocalConnector))
        .build()?;
    client.connect().await?;
    Ok(client)
}

/// Honors `RUST_LOG` so client logs can be inspected while benchmarking.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

fn wallet(count: usize) -> Vec<AddressDescriptor> {
    (0..count)
        .map(|i| AddressDescriptor::new(format!("{i:064x}"), format!("addr{i}"), format!("m/0/{i}")))
        .collect()
}

// ============================================================================
// Benchmark: Per-descriptor fan-out
// ============================================================================

fn bench_fetch_many(c: &mut Criterion) {
    init_tracing();
    let rt = Runtime::new().expect("runtime");
    let client = rt.block_on(connected_client()).expect("client");

    let mut group = c.benchmark_group("fetch_many");

    for &count in DESCRIPTOR_COUNTS {
        let descriptors = wallet(count);
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("balances", count), &descriptors, |b, d| {
            b.to_async(&rt).iter(|| async { client.batch().balances(d).await });
        });

        group.bench_with_input(BenchmarkId::new("histories", count), &descriptors, |b, d| {
            b.to_async(&rt).iter(|| async { client.batch().histories(d).await });
        });

        group.bench_with_input(
            BenchmarkId::new("balances_bounded_32", count),
            &descriptors,
            |b, d| {
                b.to_async(&rt)
                    .iter(|| async { client.batch().with_concurrency(32).balances(d).await });
            },
        );
    }

    group.finish();
    client.close();
}

// ============================================================================
// Benchmark: JSON-RPC batch arrays
// ============================================================================

fn bench_batch_array(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let client = rt.block_on(connected_client()).expect("client");

    let mut group = c.benchmark_group("batch_array");

    for &count in DESCRIPTOR_COUNTS {
        let hashes: Vec<String> = wallet(count).into_iter().map(|d| d.script_hash).collect();
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("get_balance", count), &hashes, |b, h| {
            b.to_async(&rt)
                .iter(|| async { client.scripthash_get_balance_batch(h).await });
        });
    }

    group.finish();
    client.close();
}

criterion_group!(benches, bench_fetch_many, bench_batch_array);
criterion_main!(benches);
