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

//! Reply destination lifecycle.

use super::{ReplyQueueDescriptor, ReplyQueueMode};
use crate::connection::{Connection, Session};
use crate::error::{QrpcError, Result};
use crate::observability::RequestMetrics;
use crate::transport::{Destination, Directory, Selector, Transport};
use std::sync::Arc;

#[cfg(feature = "observability")]
use tracing::{debug, trace, warn};

/// Decides where replies arrive and manages the lifetime of that destination.
///
/// | Mode | Resolve | Release |
/// |---|---|---|
/// | `Static` | directory lookup by requester id | nothing |
/// | `DynamicPerCall` | new temporary destination | delete it |
/// | `DynamicShared` | temporary destination created once per connection | nothing; deleted when the connection closes |
///
/// # Examples
///
/// ```rust
/// use qrpc::connection::ConnectionRegistry;
/// use qrpc::reply::{ReplyQueueManager, ReplyQueueMode};
/// use qrpc::transport::{AckMode, MemoryTransport, MessageProtocol};
/// use std::sync::Arc;
///
/// # async fn example() -> qrpc::Result<()> {
/// let broker = MemoryTransport::new();
/// let registry = ConnectionRegistry::new(Arc::new(broker.clone()));
/// let replies = ReplyQueueManager::new(Arc::new(broker.clone()), "app");
///
/// let connection = registry.acquire("app").await?;
/// let session = connection
///     .open_session(MessageProtocol::RequestReply, false, AckMode::Auto)
///     .await?;
///
/// let descriptor = replies
///     .resolve(&connection, &session, ReplyQueueMode::DynamicPerCall)
///     .await?;
/// assert!(descriptor.destination().is_temporary());
/// replies.release(descriptor).await?;
/// assert_eq!(broker.stats().temporary_deleted, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ReplyQueueManager {
    directory: Arc<dyn Directory>,
    requester_id: String,
    metrics: Arc<RequestMetrics>,
}

impl ReplyQueueManager {
    /// Creates a manager resolving static reply queues for `requester_id`.
    #[must_use]
    pub fn new(directory: Arc<dyn Directory>, requester_id: impl Into<String>) -> Self {
        Self::with_metrics(directory, requester_id, Arc::new(RequestMetrics::new()))
    }

    /// Creates a manager that records queue churn into `metrics`.
    #[must_use]
    pub fn with_metrics(
        directory: Arc<dyn Directory>,
        requester_id: impl Into<String>,
        metrics: Arc<RequestMetrics>,
    ) -> Self {
        Self {
            directory,
            requester_id: requester_id.into(),
            metrics,
        }
    }

    /// Identity static reply queues are looked up under.
    #[must_use]
    pub fn requester_id(&self) -> &str {
        &self.requester_id
    }

    /// Resolves the reply destination for one request.
    ///
    /// # Errors
    ///
    /// - [`QrpcError::Connection`] if a static lookup fails
    /// - [`QrpcError::Transport`] if a temporary destination cannot be created
    pub async fn resolve(
        &self,
        connection: &Connection,
        session: &Session,
        mode: ReplyQueueMode,
    ) -> Result<ReplyQueueDescriptor> {
        let destination = match mode {
            ReplyQueueMode::Static => self
                .directory
                .lookup_reply(&self.requester_id)
                .await
                .map_err(|e| {
                    QrpcError::connection(format!("reply queue of '{}'", self.requester_id), e)
                })?,
            ReplyQueueMode::DynamicPerCall => {
                let destination = session.create_temporary_destination().await?;
                self.metrics.record_temporary_queue_created();
                destination
            }
            ReplyQueueMode::DynamicShared => connection
                .shared_reply_queue()
                .get_or_try_init(|| async {
                    let destination = session.create_temporary_destination().await?;
                    self.metrics.record_temporary_queue_created();

                    #[cfg(feature = "observability")]
                    debug!(
                        endpoint = %connection.key(),
                        queue = %destination,
                        "Created shared reply queue"
                    );

                    Ok::<_, QrpcError>(destination)
                })
                .await?
                .clone(),
        };

        #[cfg(feature = "observability")]
        trace!(mode = %mode, queue = %destination, "Resolved reply queue");

        Ok(ReplyQueueDescriptor::new(mode, destination, connection.clone()))
    }

    /// Releases a reply destination after its reply was consumed or abandoned.
    ///
    /// # Errors
    ///
    /// - [`QrpcError::ProtocolViolation`] if a per-call descriptor does not
    ///   name a temporary destination
    /// - [`QrpcError::Transport`] if deleting the destination fails
    pub async fn release(&self, descriptor: ReplyQueueDescriptor) -> Result<()> {
        match descriptor.mode() {
            ReplyQueueMode::Static | ReplyQueueMode::DynamicShared => Ok(()),
            ReplyQueueMode::DynamicPerCall => {
                let destination = descriptor.destination();
                if !destination.is_temporary() {
                    return Err(QrpcError::protocol_violation(format!(
                        "refusing to delete non-temporary reply queue '{}'",
                        destination
                    )));
                }
                descriptor
                    .connection()
                    .transport()
                    .delete_destination(destination)
                    .await?;
                self.metrics.record_temporary_queue_deleted();
                Ok(())
            }
        }
    }

    /// Guards `descriptor` until [`release`](Self::release) has run for it.
    ///
    /// If the guard is dropped armed, a per-call queue is deleted on a
    /// background task. Other modes need nothing.
    pub(crate) fn guard(&self, descriptor: &ReplyQueueDescriptor) -> PerCallQueueGuard {
        PerCallQueueGuard {
            transport: Arc::clone(descriptor.connection().transport()),
            destination: (descriptor.mode() == ReplyQueueMode::DynamicPerCall)
                .then(|| descriptor.destination().clone()),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Selector a reply receiver must use for `correlation_id`.
    ///
    /// Static queues are shared by every requester of an identity, so their
    /// replies are always filtered. A shared dynamic queue is exclusive to one
    /// connection but may carry replies to concurrent calls on it, so it is
    /// filtered too. A per-call queue carries a single reply and needs none.
    #[must_use]
    pub fn reply_selector(
        &self,
        descriptor: &ReplyQueueDescriptor,
        correlation_id: &str,
    ) -> Option<Selector> {
        match descriptor.mode() {
            ReplyQueueMode::Static | ReplyQueueMode::DynamicShared => {
                Some(Selector::correlation_id(correlation_id))
            }
            ReplyQueueMode::DynamicPerCall => None,
        }
    }

    /// Reply-queue metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<RequestMetrics> {
        &self.metrics
    }
}

impl std::fmt::Debug for ReplyQueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyQueueManager")
            .field("requester_id", &self.requester_id)
            .finish()
    }
}

/// Deletes a per-call reply queue whose caller went away before releasing it.
pub(crate) struct PerCallQueueGuard {
    transport: Arc<dyn Transport>,
    destination: Option<Destination>,
    metrics: Arc<RequestMetrics>,
}

impl PerCallQueueGuard {
    pub(crate) fn disarm(mut self) {
        self.destination = None;
    }
}

impl Drop for PerCallQueueGuard {
    fn drop(&mut self) {
        let Some(destination) = self.destination.take() else {
            return;
        };
        let transport = Arc::clone(&self.transport);
        let metrics = Arc::clone(&self.metrics);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    match transport.delete_destination(&destination).await {
                        Ok(()) => metrics.record_temporary_queue_deleted(),
                        Err(_e) => {
                            #[cfg(feature = "observability")]
                            debug!(queue = %destination, error = %_e, "Abandoned reply queue was already gone");
                        }
                    }
                });
            }
            Err(_e) => {
                #[cfg(feature = "observability")]
                warn!(queue = %destination, "Reply queue abandoned outside a runtime; left to the connection close");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionRegistry;
    use crate::transport::{AckMode, Destination, MemoryTransport, MessageProtocol};

    struct Fixture {
        broker: MemoryTransport,
        registry: ConnectionRegistry,
        replies: ReplyQueueManager,
    }

    fn fixture() -> Fixture {
        let broker = MemoryTransport::new();
        broker.bind_reply("app", Destination::queue("APP.REPLY"));
        Fixture {
            registry: ConnectionRegistry::new(Arc::new(broker.clone())),
            replies: ReplyQueueManager::new(Arc::new(broker.clone()), "app"),
            broker,
        }
    }

    async fn open(fixture: &Fixture) -> (Connection, Session) {
        let connection = fixture.registry.acquire("app").await.unwrap();
        let session = connection
            .open_session(MessageProtocol::RequestReply, false, AckMode::Auto)
            .await
            .unwrap();
        (connection, session)
    }

    #[tokio::test]
    async fn test_static_never_creates_or_deletes() {
        let fixture = fixture();
        let (connection, session) = open(&fixture).await;

        for _ in 0..3 {
            let descriptor = fixture
                .replies
                .resolve(&connection, &session, ReplyQueueMode::Static)
                .await
                .unwrap();
            assert_eq!(descriptor.destination().name(), "APP.REPLY");
            assert!(fixture.replies.reply_selector(&descriptor, "c").is_some());
            fixture.replies.release(descriptor).await.unwrap();
        }

        let stats = fixture.broker.stats();
        assert_eq!(stats.temporary_created, 0);
        assert_eq!(stats.temporary_deleted, 0);
    }

    #[tokio::test]
    async fn test_static_lookup_failure_is_connection_error() {
        let fixture = fixture();
        let replies = ReplyQueueManager::new(Arc::new(fixture.broker.clone()), "unbound");
        let (connection, session) = open(&fixture).await;

        let error = replies
            .resolve(&connection, &session, ReplyQueueMode::Static)
            .await
            .unwrap_err();
        assert!(error.is_connection_error());
    }

    #[tokio::test]
    async fn test_per_call_creates_and_deletes_each_time() {
        let fixture = fixture();
        let (connection, session) = open(&fixture).await;

        for _ in 0..3 {
            let descriptor = fixture
                .replies
                .resolve(&connection, &session, ReplyQueueMode::DynamicPerCall)
                .await
                .unwrap();
            assert!(fixture.replies.reply_selector(&descriptor, "c").is_none());
            fixture.replies.release(descriptor).await.unwrap();
        }

        let stats = fixture.broker.stats();
        assert_eq!(stats.temporary_created, 3);
        assert_eq!(stats.temporary_deleted, 3);
        assert_eq!(fixture.replies.metrics().total_temporary_queues_deleted(), 3);
    }

    #[tokio::test]
    async fn test_shared_created_once_per_connection() {
        let fixture = fixture();
        let (connection, session) = open(&fixture).await;

        let first = fixture
            .replies
            .resolve(&connection, &session, ReplyQueueMode::DynamicShared)
            .await
            .unwrap();
        let second = fixture
            .replies
            .resolve(&connection, &session, ReplyQueueMode::DynamicShared)
            .await
            .unwrap();
        assert_eq!(first.destination(), second.destination());
        fixture.replies.release(first).await.unwrap();
        fixture.replies.release(second).await.unwrap();
        assert_eq!(fixture.broker.stats().temporary_created, 1);
        assert_eq!(fixture.broker.stats().temporary_deleted, 0);

        session.close().await.unwrap();
        fixture.registry.release(&connection).await.unwrap();
        assert_eq!(fixture.broker.stats().temporary_deleted, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shared_concurrent_resolution_creates_one() {
        let fixture = Arc::new(fixture());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let fixture = Arc::clone(&fixture);
            tasks.push(tokio::spawn(async move {
                let (connection, session) = open(&fixture).await;
                let descriptor = fixture
                    .replies
                    .resolve(&connection, &session, ReplyQueueMode::DynamicShared)
                    .await
                    .unwrap();
                let name = descriptor.destination().name().to_string();
                session.close().await.unwrap();
                (connection, name)
            }));
        }

        let mut leases = Vec::new();
        for task in tasks {
            leases.push(task.await.unwrap());
        }
        let first = &leases[0].1;
        assert!(leases.iter().all(|(_, name)| name == first));
        assert_eq!(fixture.broker.stats().temporary_created, 1);

        for (connection, _) in &leases {
            fixture.registry.release(connection).await.unwrap();
        }
        assert_eq!(fixture.broker.temporary_destinations(), 0);
    }
}
