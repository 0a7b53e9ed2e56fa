//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Rendezvous and round-trip benchmarks for qrpc
//!
//! Measures:
//! - Router handoff with the receiver parked first
//! - Router handoff with the value parked first
//! - Full request/reply over the in-memory broker, per reply queue mode

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use qrpc::client::{CallOptions, ClientConfig, RequestReplyClient};
use qrpc::connection::ConnectionRegistry;
use qrpc::correlation::CorrelationRouter;
use qrpc::provider::{ProcessContext, ProviderConfig, ServiceProviderLoop, from_fn};
use qrpc::reply::ReplyQueueMode;
use qrpc::transport::{Destination, MemoryTransport};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

/// Benchmark router handoffs in both arrival orders
fn bench_router_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("router_handoff");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let router: CorrelationRouter<Vec<u8>> = CorrelationRouter::new();
    let counter = Arc::new(AtomicU64::new(0));

    group.bench_function("receiver_first", |b| {
        b.to_async(&rt).iter(|| {
            let router = router.clone();
            let id = format!("r-{}", counter.fetch_add(1, Ordering::Relaxed));
            async move {
                let receiver = {
                    let router = router.clone();
                    let id = id.clone();
                    tokio::spawn(async move { router.receive("bench", &id, WAIT).await })
                };
                tokio::task::yield_now().await;
                router.deliver("bench", &id, vec![0u8; 64], WAIT).await.unwrap();
                receiver.await.unwrap().unwrap()
            }
        });
    });

    group.bench_function("value_first", |b| {
        b.to_async(&rt).iter(|| {
            let router = router.clone();
            let id = format!("v-{}", counter.fetch_add(1, Ordering::Relaxed));
            async move {
                let deliverer = {
                    let router = router.clone();
                    let id = id.clone();
                    tokio::spawn(async move { router.deliver("bench", &id, vec![0u8; 64], WAIT).await })
                };
                tokio::task::yield_now().await;
                let value = router.receive("bench", &id, WAIT).await.unwrap();
                deliverer.await.unwrap().unwrap();
                value
            }
        });
    });

    group.finish();
}

/// Benchmark a full call against an echo provider for each reply queue mode
fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("round_trip");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for mode in [
        ReplyQueueMode::Static,
        ReplyQueueMode::DynamicPerCall,
        ReplyQueueMode::DynamicShared,
    ] {
        let broker = MemoryTransport::new();
        broker.bind_service("echo", Destination::queue("ECHO.IN"));
        broker.bind_reply("bench", Destination::queue("BENCH.REPLY"));
        let registry = ConnectionRegistry::new(Arc::new(broker.clone()));

        let (provider, held) = rt.block_on(async {
            let provider = ServiceProviderLoop::new(
                registry.clone(),
                Arc::new(broker.clone()),
                Arc::new(from_fn(|body: Vec<u8>, _context: ProcessContext| async move {
                    Ok::<_, qrpc::BoxError>(body)
                })),
                ProviderConfig::new("echo").with_poll_interval(Duration::from_millis(50)),
            )
            .unwrap()
            .spawn()
            .await
            .unwrap();
            let held = registry.acquire("bench").await.unwrap();
            (provider, held)
        });

        let client = Arc::new(
            RequestReplyClient::new(
                registry.clone(),
                Arc::new(broker.clone()),
                ClientConfig::new("bench")
                    .with_service_id("echo")
                    .with_reply_queue_mode(mode),
            )
            .unwrap(),
        );

        group.bench_with_input(BenchmarkId::from_parameter(mode), &mode, |b, _| {
            b.to_async(&rt).iter(|| {
                let client = Arc::clone(&client);
                async move {
                    client
                        .call(vec![0u8; 256], CallOptions::default())
                        .await
                        .unwrap()
                }
            });
        });

        rt.block_on(async {
            registry.release(&held).await.unwrap();
            provider.shutdown().await.unwrap();
        });
    }

    group.finish();
}

criterion_group!(benches, bench_router_handoff, bench_round_trip);
criterion_main!(benches);
