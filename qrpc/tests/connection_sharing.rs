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

//! Integration tests for reference-counted connection sharing.

use qrpc::connection::ConnectionRegistry;
use qrpc::transport::{AckMode, MemoryTransport, MessageProtocol};
use std::sync::Arc;
use std::time::Duration;

fn registry() -> (MemoryTransport, ConnectionRegistry) {
    let broker = MemoryTransport::new();
    let registry = ConnectionRegistry::new(Arc::new(broker.clone()));
    (broker, registry)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquires_open_once_and_close_once() {
    let (broker, registry) = registry();
    broker.set_open_delay("svcA", Duration::from_millis(20));

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move { registry.acquire("svcA").await }));
    }
    let mut connections = Vec::new();
    for task in tasks {
        connections.push(task.await.unwrap().unwrap());
    }

    assert_eq!(broker.stats().opens, 1);
    assert_eq!(broker.open_connections(), 1);
    assert_eq!(registry.ref_count("svcA"), 5);
    let handle = connections[0].handle().clone();
    assert!(connections.iter().all(|c| *c.handle() == handle));

    for connection in &connections {
        registry.release(connection).await.unwrap();
    }

    assert_eq!(broker.stats().closes, 1);
    assert_eq!(broker.open_connections(), 0);
    assert!(registry.is_empty());
    assert_eq!(registry.metrics().total_acquires(), 5);
    assert_eq!(registry.metrics().total_releases(), 5);
}

#[tokio::test]
async fn test_reacquire_after_last_release_opens_again() {
    let (broker, registry) = registry();

    let first = registry.acquire("svcA").await.unwrap();
    registry.release(&first).await.unwrap();
    let second = registry.acquire("svcA").await.unwrap();

    assert_ne!(first.handle(), second.handle());
    assert_eq!(broker.stats().opens, 2);
    assert_eq!(broker.stats().closes, 1);

    registry.release(&second).await.unwrap();
    assert_eq!(broker.stats().closes, 2);
}

#[tokio::test]
async fn test_failed_open_leaves_count_unchanged() {
    let (broker, registry) = registry();
    broker.fail_next_opens(1);

    let err = registry.acquire("svcA").await.unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(registry.ref_count("svcA"), 0);
    assert!(!registry.is_open("svcA"));
    assert_eq!(registry.metrics().total_open_errors(), 1);

    let connection = registry.acquire("svcA").await.unwrap();
    assert_eq!(registry.ref_count("svcA"), 1);
    registry.release(&connection).await.unwrap();
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn test_failed_open_does_not_disturb_existing_holders() {
    let (broker, registry) = registry();
    let held = registry.acquire("svcA").await.unwrap();

    // The cell is already initialized, so the injected fault is not consumed here.
    broker.fail_next_opens(1);
    let shared = registry.acquire("svcA").await.unwrap();
    assert_eq!(registry.ref_count("svcA"), 2);
    assert_eq!(broker.stats().opens, 1);

    registry.release(&shared).await.unwrap();
    registry.release(&held).await.unwrap();
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn test_double_release_is_a_protocol_violation() {
    let (broker, registry) = registry();
    let first = registry.acquire("svcA").await.unwrap();
    let second = registry.acquire("svcA").await.unwrap();

    registry.release(&first).await.unwrap();
    let err = registry.release(&first).await.unwrap_err();
    assert!(err.is_protocol_violation());

    // The duplicate release did not close the connection under the other holder.
    assert_eq!(registry.ref_count("svcA"), 1);
    assert_eq!(broker.open_connections(), 1);

    registry.release(&second).await.unwrap();
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_open_does_not_block_other_endpoints() {
    let (broker, registry) = registry();
    broker.set_open_delay("slow", Duration::from_secs(30));

    let slow = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.acquire("slow").await })
    };
    tokio::task::yield_now().await;

    let started = tokio::time::Instant::now();
    let fast = registry.acquire("fast").await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(registry.is_open("fast"));
    assert!(!registry.is_open("slow"));

    let slow = slow.await.unwrap().unwrap();
    registry.release(&fast).await.unwrap();
    registry.release(&slow).await.unwrap();
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_sessions_are_independent_per_caller() {
    let (broker, registry) = registry();
    let first = registry.acquire("svcA").await.unwrap();
    let second = registry.acquire("svcA").await.unwrap();

    let a = first
        .open_session(MessageProtocol::RequestReply, false, AckMode::Auto)
        .await
        .unwrap();
    let b = second
        .open_session(MessageProtocol::FireAndForget, true, AckMode::Auto)
        .await
        .unwrap();
    assert_ne!(a.handle(), b.handle());
    assert_eq!(broker.open_sessions(), 2);

    a.close().await.unwrap();
    a.close().await.unwrap();
    assert_eq!(broker.stats().sessions_closed, 1);

    b.close().await.unwrap();
    registry.release(&first).await.unwrap();
    registry.release(&second).await.unwrap();
    assert_eq!(broker.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_dropped_during_slow_open_leaves_count_unchanged() {
    let (broker, registry) = registry();
    broker.set_open_delay("slow", Duration::from_secs(30));

    let dropped = tokio::time::timeout(Duration::from_millis(20), registry.acquire("slow")).await;
    assert!(dropped.is_err());
    assert_eq!(registry.ref_count("slow"), 0);
    assert!(registry.is_empty());
    assert_eq!(broker.open_connections(), 0);

    let connection = registry.acquire("slow").await.unwrap();
    assert_eq!(registry.ref_count("slow"), 1);
    registry.release(&connection).await.unwrap();
    assert!(registry.is_empty());
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_dropped_after_opener_released_closes_connection() {
    let (broker, registry) = registry();
    broker.set_open_delay("svcA", Duration::from_millis(50));

    let mut opener = Box::pin(registry.acquire("svcA"));
    let mut waiter = Box::pin(registry.acquire("svcA"));
    assert!(tokio::time::timeout(Duration::ZERO, &mut opener).await.is_err());
    assert!(tokio::time::timeout(Duration::ZERO, &mut waiter).await.is_err());
    let opened = opener.await.unwrap();
    assert_eq!(registry.ref_count("svcA"), 2);

    registry.release(&opened).await.unwrap();
    assert_eq!(broker.open_connections(), 1);

    drop(waiter);
    assert!(registry.is_empty());
    while broker.open_connections() > 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(broker.stats().closes, 1);
}

#[tokio::test]
async fn test_unreleased_lease_is_released_when_dropped() {
    let (broker, registry) = registry();
    let first = registry.acquire("svcA").await.unwrap();
    let second = registry.acquire("svcA").await.unwrap();
    let session = second
        .open_session(MessageProtocol::RequestReply, false, AckMode::Auto)
        .await
        .unwrap();

    drop(second);
    // The session still holds the second lease.
    assert_eq!(registry.ref_count("svcA"), 2);
    drop(session);
    assert_eq!(registry.ref_count("svcA"), 1);

    drop(first);
    assert!(registry.is_empty());
    while broker.open_connections() > 0 || broker.open_sessions() > 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(broker.stats().opens, 1);
    assert_eq!(broker.stats().closes, 1);
    assert_eq!(registry.metrics().total_releases(), 2);
}
