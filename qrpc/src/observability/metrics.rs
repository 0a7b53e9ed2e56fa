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

//! Metrics for qrpc components.
//!
//! Every component keeps its own atomic counters, readable in-process, and
//! mirrors each record into the `metrics` facade when the `observability`
//! feature is enabled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics for the shared-connection registry.
///
/// # Examples
///
/// ```rust
/// use qrpc::observability::ConnectionMetrics;
///
/// let metrics = ConnectionMetrics::new();
/// metrics.record_acquire();
/// metrics.record_connection_opened();
/// metrics.record_release();
/// metrics.record_connection_closed();
///
/// assert_eq!(metrics.active_connections(), 0);
/// assert_eq!(metrics.total_acquires(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    /// Physical connections opened
    connections_opened: AtomicU64,
    /// Physical connections closed
    connections_closed: AtomicU64,
    /// Failed physical opens
    open_errors: AtomicU64,
    /// Failed physical closes
    close_errors: AtomicU64,
    /// Successful acquires
    acquires: AtomicU64,
    /// Successful releases
    releases: AtomicU64,
}

impl ConnectionMetrics {
    /// Creates a new connection metrics tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a physical open.
    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        {
            metrics::counter!("qrpc.connection.opened").increment(1);
            metrics::gauge!("qrpc.connection.active").increment(1.0);
        }
    }

    /// Records a physical close.
    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        {
            metrics::counter!("qrpc.connection.closed").increment(1);
            metrics::gauge!("qrpc.connection.active").decrement(1.0);
        }
    }

    /// Records a failed physical open.
    pub fn record_open_error(&self) {
        self.open_errors.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.connection.errors.open").increment(1);
    }

    /// Records a failed physical close.
    pub fn record_close_error(&self) {
        self.close_errors.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.connection.errors.close").increment(1);
    }

    /// Records a successful acquire.
    pub fn record_acquire(&self) {
        self.acquires.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.connection.acquires").increment(1);
    }

    /// Records a successful release.
    pub fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.connection.releases").increment(1);
    }

    /// Physical connections currently open.
    #[must_use]
    pub fn active_connections(&self) -> u64 {
        let opened = self.connections_opened.load(Ordering::Relaxed);
        let closed = self.connections_closed.load(Ordering::Relaxed);
        opened.saturating_sub(closed)
    }

    /// Total physical opens.
    #[must_use]
    pub fn total_connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    /// Total physical closes.
    #[must_use]
    pub fn total_connections_closed(&self) -> u64 {
        self.connections_closed.load(Ordering::Relaxed)
    }

    /// Total failed opens.
    #[must_use]
    pub fn total_open_errors(&self) -> u64 {
        self.open_errors.load(Ordering::Relaxed)
    }

    /// Total failed closes.
    #[must_use]
    pub fn total_close_errors(&self) -> u64 {
        self.close_errors.load(Ordering::Relaxed)
    }

    /// Total successful acquires.
    #[must_use]
    pub fn total_acquires(&self) -> u64 {
        self.acquires.load(Ordering::Relaxed)
    }

    /// Total successful releases.
    #[must_use]
    pub fn total_releases(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        self.connections_opened.store(0, Ordering::Relaxed);
        self.connections_closed.store(0, Ordering::Relaxed);
        self.open_errors.store(0, Ordering::Relaxed);
        self.close_errors.store(0, Ordering::Relaxed);
        self.acquires.store(0, Ordering::Relaxed);
        self.releases.store(0, Ordering::Relaxed);
    }
}

/// Metrics for the in-process correlation router.
#[derive(Debug, Default)]
pub struct CorrelationMetrics {
    matches_created: AtomicU64,
    handoffs: AtomicU64,
    receive_timeouts: AtomicU64,
    delivery_timeouts: AtomicU64,
    cancelled: AtomicU64,
}

impl CorrelationMetrics {
    /// Creates a new correlation metrics tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records creation of a rendezvous slot.
    pub fn record_match_created(&self) {
        self.matches_created.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.correlation.matches.created").increment(1);
    }

    /// Records a completed hand-off.
    pub fn record_handoff(&self) {
        self.handoffs.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.correlation.handoffs").increment(1);
    }

    /// Records a receiver giving up.
    pub fn record_receive_timeout(&self) {
        self.receive_timeouts.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.correlation.timeouts.receive").increment(1);
    }

    /// Records an uncollected delivery.
    pub fn record_delivery_timeout(&self) {
        self.delivery_timeouts.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.correlation.timeouts.delivery").increment(1);
    }

    /// Records slots removed by a clear.
    pub fn record_cancelled(&self, count: u64) {
        self.cancelled.fetch_add(count, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.correlation.cancelled").increment(count);
    }

    /// Total slots created.
    #[must_use]
    pub fn total_matches_created(&self) -> u64 {
        self.matches_created.load(Ordering::Relaxed)
    }

    /// Total completed hand-offs.
    #[must_use]
    pub fn total_handoffs(&self) -> u64 {
        self.handoffs.load(Ordering::Relaxed)
    }

    /// Total receive timeouts.
    #[must_use]
    pub fn total_receive_timeouts(&self) -> u64 {
        self.receive_timeouts.load(Ordering::Relaxed)
    }

    /// Total delivery timeouts.
    #[must_use]
    pub fn total_delivery_timeouts(&self) -> u64 {
        self.delivery_timeouts.load(Ordering::Relaxed)
    }

    /// Total slots cancelled by a clear.
    #[must_use]
    pub fn total_cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        self.matches_created.store(0, Ordering::Relaxed);
        self.handoffs.store(0, Ordering::Relaxed);
        self.receive_timeouts.store(0, Ordering::Relaxed);
        self.delivery_timeouts.store(0, Ordering::Relaxed);
        self.cancelled.store(0, Ordering::Relaxed);
    }
}

/// Metrics for request-side traffic.
///
/// Tracks requests, replies, timeouts, reply-queue churn and round-trip
/// latency.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    requests_sent: AtomicU64,
    replies_received: AtomicU64,
    timeouts: AtomicU64,
    remote_failures: AtomicU64,
    temporary_queues_created: AtomicU64,
    temporary_queues_deleted: AtomicU64,
    total_latency_us: AtomicU64,
    latency_samples: AtomicU64,
}

impl RequestMetrics {
    /// Creates a new request metrics tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request (or fire-and-forget message) sent.
    pub fn record_request_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.request.sent").increment(1);
    }

    /// Records a reply received, with the round-trip time.
    pub fn record_reply(&self, latency: Duration) {
        self.replies_received.fetch_add(1, Ordering::Relaxed);
        let us = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.total_latency_us.fetch_add(us, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        {
            metrics::counter!("qrpc.request.replies").increment(1);
            metrics::histogram!("qrpc.request.latency.us").record(us as f64);
        }
    }

    /// Records a reply that did not arrive in time.
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.request.timeouts").increment(1);
    }

    /// Records an error reply.
    pub fn record_remote_failure(&self) {
        self.remote_failures.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.request.remote_failures").increment(1);
    }

    /// Records creation of a temporary reply queue.
    pub fn record_temporary_queue_created(&self) {
        self.temporary_queues_created.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.request.reply_queues.created").increment(1);
    }

    /// Records deletion of a temporary reply queue.
    pub fn record_temporary_queue_deleted(&self) {
        self.temporary_queues_deleted.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.request.reply_queues.deleted").increment(1);
    }

    /// Total requests sent.
    #[must_use]
    pub fn total_requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    /// Total replies received.
    #[must_use]
    pub fn total_replies_received(&self) -> u64 {
        self.replies_received.load(Ordering::Relaxed)
    }

    /// Total reply timeouts.
    #[must_use]
    pub fn total_timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Total error replies.
    #[must_use]
    pub fn total_remote_failures(&self) -> u64 {
        self.remote_failures.load(Ordering::Relaxed)
    }

    /// Total temporary reply queues created.
    #[must_use]
    pub fn total_temporary_queues_created(&self) -> u64 {
        self.temporary_queues_created.load(Ordering::Relaxed)
    }

    /// Total temporary reply queues deleted.
    #[must_use]
    pub fn total_temporary_queues_deleted(&self) -> u64 {
        self.temporary_queues_deleted.load(Ordering::Relaxed)
    }

    /// Average round-trip latency, or zero with no samples.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.total_latency_us.load(Ordering::Relaxed) / samples)
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        self.requests_sent.store(0, Ordering::Relaxed);
        self.replies_received.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.remote_failures.store(0, Ordering::Relaxed);
        self.temporary_queues_created.store(0, Ordering::Relaxed);
        self.temporary_queues_deleted.store(0, Ordering::Relaxed);
        self.total_latency_us.store(0, Ordering::Relaxed);
        self.latency_samples.store(0, Ordering::Relaxed);
    }
}

/// Metrics for provider loops.
#[derive(Debug, Default)]
pub struct ProviderMetrics {
    messages_received: AtomicU64,
    messages_processed: AtomicU64,
    processing_errors: AtomicU64,
    poison_messages: AtomicU64,
    replies_sent: AtomicU64,
    reply_failures: AtomicU64,
    commits: AtomicU64,
    commit_failures: AtomicU64,
}

impl ProviderMetrics {
    /// Creates a new provider metrics tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a message pulled from the input destination.
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.provider.received").increment(1);
    }

    /// Records a message the processor handled successfully.
    pub fn record_message_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.provider.processed").increment(1);
    }

    /// Records a processor failure.
    pub fn record_processing_error(&self) {
        self.processing_errors.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.provider.errors.processing").increment(1);
    }

    /// Records a skipped poison message.
    pub fn record_poison_message(&self) {
        self.poison_messages.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.provider.poison").increment(1);
    }

    /// Records a reply (normal or error) delivered to the transport.
    pub fn record_reply_sent(&self) {
        self.replies_sent.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.provider.replies").increment(1);
    }

    /// Records a reply that could not be sent.
    pub fn record_reply_failure(&self) {
        self.reply_failures.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.provider.errors.reply").increment(1);
    }

    /// Records a successful commit.
    pub fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.provider.commits").increment(1);
    }

    /// Records a failed commit.
    pub fn record_commit_failure(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "observability")]
        metrics::counter!("qrpc.provider.errors.commit").increment(1);
    }

    /// Total messages received.
    #[must_use]
    pub fn total_messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Total messages processed.
    #[must_use]
    pub fn total_messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    /// Total processor failures.
    #[must_use]
    pub fn total_processing_errors(&self) -> u64 {
        self.processing_errors.load(Ordering::Relaxed)
    }

    /// Total poison messages skipped.
    #[must_use]
    pub fn total_poison_messages(&self) -> u64 {
        self.poison_messages.load(Ordering::Relaxed)
    }

    /// Total replies sent.
    #[must_use]
    pub fn total_replies_sent(&self) -> u64 {
        self.replies_sent.load(Ordering::Relaxed)
    }

    /// Total replies that could not be sent.
    #[must_use]
    pub fn total_reply_failures(&self) -> u64 {
        self.reply_failures.load(Ordering::Relaxed)
    }

    /// Total commits.
    #[must_use]
    pub fn total_commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Total failed commits.
    #[must_use]
    pub fn total_commit_failures(&self) -> u64 {
        self.commit_failures.load(Ordering::Relaxed)
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        self.messages_received.store(0, Ordering::Relaxed);
        self.messages_processed.store(0, Ordering::Relaxed);
        self.processing_errors.store(0, Ordering::Relaxed);
        self.poison_messages.store(0, Ordering::Relaxed);
        self.replies_sent.store(0, Ordering::Relaxed);
        self.reply_failures.store(0, Ordering::Relaxed);
        self.commits.store(0, Ordering::Relaxed);
        self.commit_failures.store(0, Ordering::Relaxed);
    }
}
