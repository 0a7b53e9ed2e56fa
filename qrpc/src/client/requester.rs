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

//! Request-side orchestration.

use super::config::{CallOptions, ClientConfig};
use crate::connection::{Connection, ConnectionRegistry, Session};
use crate::correlation::{CorrelationIdGenerator, CorrelationIdSource};
use crate::deadline::Deadline;
use crate::error::{QrpcError, Result, with_cleanup};
use crate::observability::RequestMetrics;
use crate::reply::{ReplyQueueDescriptor, ReplyQueueManager};
use crate::transaction::{NoDistributedTransaction, TransactionContext, owns_commit};
use crate::transport::{
    Destination, Directory, Message, MessageId, MessageKind, MessageProtocol, OutboundMessage,
    Selector, TransportError,
};
use std::sync::Arc;
use tokio::time::Instant;

#[cfg(feature = "observability")]
use tracing::{debug, warn};

/// Sends requests over a shared connection and waits for correlated replies.
///
/// Every call acquires the connection for
/// [`ClientConfig::application_id`] from the registry, opens its own
/// session, and releases both before returning, on success and on every
/// error path. Cleanup runs innermost first: reply queue, then session,
/// then connection. When a call is already failing, cleanup errors are
/// logged and the original error is returned. A call whose future is dropped
/// mid-flight hands the same cleanup to background tasks of the runtime.
///
/// # Example
///
/// ```rust
/// use qrpc::client::{CallOptions, ClientConfig, RequestReplyClient};
/// use qrpc::connection::ConnectionRegistry;
/// use qrpc::transport::{Destination, MemoryTransport};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> qrpc::Result<()> {
/// let broker = MemoryTransport::new();
/// let registry = ConnectionRegistry::new(Arc::new(broker.clone()));
/// let client = RequestReplyClient::new(
///     registry,
///     Arc::new(broker.clone()),
///     ClientConfig::new("billing"),
/// )?;
///
/// let result = client
///     .send_and_await_reply(
///         &Destination::queue("NOBODY.LISTENS"),
///         b"ping".to_vec(),
///         CallOptions::with_timeout(Duration::from_millis(20)),
///     )
///     .await;
/// assert!(result.unwrap_err().is_timeout());
/// assert_eq!(broker.open_connections(), 0);
/// # Ok(())
/// # }
/// ```
pub struct RequestReplyClient {
    registry: ConnectionRegistry,
    directory: Arc<dyn Directory>,
    replies: ReplyQueueManager,
    config: ClientConfig,
    ids: CorrelationIdGenerator,
    transactions: Arc<dyn TransactionContext>,
    metrics: Arc<RequestMetrics>,
}

impl RequestReplyClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfiguration`] if the configuration
    /// does not validate.
    pub fn new(
        registry: ConnectionRegistry,
        directory: Arc<dyn Directory>,
        config: ClientConfig,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|reason| TransportError::InvalidConfiguration { reason })?;

        let metrics = Arc::new(RequestMetrics::new());
        let replies = ReplyQueueManager::with_metrics(
            Arc::clone(&directory),
            config.requester_id.clone(),
            Arc::clone(&metrics),
        );
        Ok(Self {
            registry,
            directory,
            replies,
            config,
            ids: CorrelationIdGenerator::new(),
            transactions: Arc::new(NoDistributedTransaction),
            metrics,
        })
    }

    /// Sets how the client detects an active distributed transaction.
    #[must_use]
    pub fn with_transaction_context(mut self, transactions: Arc<dyn TransactionContext>) -> Self {
        self.transactions = transactions;
        self
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Request metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<RequestMetrics> {
        &self.metrics
    }

    /// Looks up the destination of [`ClientConfig::service_id`].
    ///
    /// # Errors
    ///
    /// - [`QrpcError::ProtocolViolation`] if no service id is configured
    /// - [`QrpcError::Connection`] if the lookup fails
    pub async fn resolve_service(&self) -> Result<Destination> {
        let service_id = self.config.service_id.as_deref().ok_or_else(|| {
            QrpcError::protocol_violation("client has no service id configured")
        })?;
        self.directory
            .lookup_service(service_id)
            .await
            .map_err(|e| QrpcError::connection(format!("service '{}'", service_id), e))
    }

    /// Reply timeout the directory advertises for
    /// [`ClientConfig::service_id`], if any. A zero timeout counts as none.
    ///
    /// # Errors
    ///
    /// - [`QrpcError::ProtocolViolation`] if no service id is configured
    /// - [`QrpcError::Connection`] if the lookup fails
    pub async fn service_timeout(&self) -> Result<Option<std::time::Duration>> {
        let service_id = self.config.service_id.as_deref().ok_or_else(|| {
            QrpcError::protocol_violation("client has no service id configured")
        })?;
        let timeout = self
            .directory
            .lookup_service_timeout(service_id)
            .await
            .map_err(|e| QrpcError::connection(format!("service '{}'", service_id), e))?;
        Ok(timeout.filter(|timeout| !timeout.is_zero()))
    }

    /// Sends `body` to the configured service and waits for the reply.
    ///
    /// The reply timeout is the one in `options`, else the one the directory
    /// advertises for the service, else [`ClientConfig::timeout`].
    ///
    /// # Errors
    ///
    /// Everything [`resolve_service`](Self::resolve_service),
    /// [`service_timeout`](Self::service_timeout) and
    /// [`send_and_await_reply`](Self::send_and_await_reply) return.
    pub async fn call(&self, body: Vec<u8>, options: CallOptions) -> Result<Vec<u8>> {
        let destination = self.resolve_service().await?;
        let options = match options.timeout {
            Some(_) => options,
            None => CallOptions {
                timeout: self.service_timeout().await?,
            },
        };
        self.send_and_await_reply(&destination, body, options).await
    }

    /// Sends a request to `destination` and waits for the correlated reply.
    ///
    /// # Errors
    ///
    /// - [`QrpcError::CorrelationTimeout`] if no reply arrives in time, or
    ///   the reply says the service timed out
    /// - [`QrpcError::RemoteFailure`] if the provider answered with an error
    ///   reply and [`ClientConfig::error_replies_as_errors`] is set
    /// - [`QrpcError::ProtocolViolation`] if the client is configured for
    ///   fire-and-forget, a distributed transaction is active, or caller
    ///   assigned ids are configured on a transport that refuses them
    /// - [`QrpcError::Connection`] or [`QrpcError::Transport`] on transport
    ///   failures
    pub async fn send_and_await_reply(
        &self,
        destination: &Destination,
        body: Vec<u8>,
        options: CallOptions,
    ) -> Result<Vec<u8>> {
        if self.config.protocol != MessageProtocol::RequestReply {
            return Err(QrpcError::protocol_violation(
                "send_and_await_reply requires a request-reply client",
            ));
        }
        if self.transactions.in_distributed_transaction() {
            return Err(QrpcError::protocol_violation(
                "request-reply cannot run inside a distributed transaction",
            ));
        }
        self.check_correlation_source()?;

        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let connection = self.registry.acquire(self.config.application_id.as_str()).await?;
        let result = self
            .request_on(&connection, destination, body, timeout)
            .await;
        let released = self.registry.release(&connection).await;
        with_cleanup(result, released, "connection release")
    }

    /// Sends a fire-and-forget message to `destination`.
    ///
    /// Returns the id the transport assigned to the message.
    ///
    /// # Errors
    ///
    /// - [`QrpcError::ProtocolViolation`] if the client is configured for
    ///   request-reply
    /// - [`QrpcError::TransactionCommit`] if the commit fails
    /// - [`QrpcError::Connection`] or [`QrpcError::Transport`] on transport
    ///   failures
    pub async fn send(&self, destination: &Destination, body: Vec<u8>) -> Result<MessageId> {
        if self.config.protocol != MessageProtocol::FireAndForget {
            return Err(QrpcError::protocol_violation(
                "send requires a fire-and-forget client",
            ));
        }
        self.check_correlation_source()?;

        let connection = self.registry.acquire(self.config.application_id.as_str()).await?;
        let result = self.publish_on(&connection, destination, body).await;
        let released = self.registry.release(&connection).await;
        with_cleanup(result, released, "connection release")
    }

    fn check_correlation_source(&self) -> Result<()> {
        if self.config.correlation_id_source == CorrelationIdSource::CallerAssigned
            && !self.registry.transport().supports_caller_correlation_ids()
        {
            return Err(QrpcError::protocol_violation(format!(
                "transport '{}' does not accept caller-assigned correlation ids",
                self.registry.transport().name()
            )));
        }
        Ok(())
    }

    fn caller_correlation_id(&self) -> Option<String> {
        match self.config.correlation_id_source {
            CorrelationIdSource::CallerAssigned => Some(self.ids.next_id()),
            CorrelationIdSource::TransportGenerated => None,
        }
    }

    async fn open_session(&self, connection: &Connection) -> Result<Session> {
        connection
            .open_session(
                self.config.protocol,
                self.config.session_transacted(),
                self.config.session_ack_mode(),
            )
            .await
    }

    async fn request_on(
        &self,
        connection: &Connection,
        destination: &Destination,
        body: Vec<u8>,
        timeout: std::time::Duration,
    ) -> Result<Vec<u8>> {
        let session = self.open_session(connection).await?;
        let result = async {
            let descriptor = self
                .replies
                .resolve(connection, &session, self.config.reply_queue_mode)
                .await?;
            let guard = self.replies.guard(&descriptor);
            let result = self
                .exchange(&session, &descriptor, destination, body, timeout)
                .await;
            let released = self.replies.release(descriptor).await;
            guard.disarm();
            with_cleanup(result, released, "reply queue release")
        }
        .await;
        let closed = session.close().await;
        with_cleanup(result, closed, "session close")
    }

    async fn exchange(
        &self,
        session: &Session,
        descriptor: &ReplyQueueDescriptor,
        destination: &Destination,
        body: Vec<u8>,
        timeout: std::time::Duration,
    ) -> Result<Vec<u8>> {
        let assigned = self.caller_correlation_id();
        let deadline = Deadline::after(timeout);

        let mut request = OutboundMessage::request(body, MessageProtocol::RequestReply)
            .with_reply_to(descriptor.destination().clone())
            .with_expiration(Some(deadline.wall_clock()));
        if let Some(correlation_id) = &assigned {
            request = request.with_correlation_id(correlation_id.clone());
        }

        let started = Instant::now();
        let message_id = session.send(destination, request).await?;
        self.metrics.record_request_sent();
        let correlation_id = assigned.unwrap_or_else(|| message_id.into_string());

        #[cfg(feature = "observability")]
        debug!(
            destination = %destination,
            reply_to = %descriptor.destination(),
            correlation_id = %correlation_id,
            "Request sent"
        );

        if owns_commit(session, self.transactions.as_ref()) {
            session.commit().await?;
        }

        let selector = self.replies.reply_selector(descriptor, &correlation_id);
        let reply = self
            .await_reply(session, descriptor, selector.as_ref(), &correlation_id, deadline)
            .await?;

        if reply.kind == MessageKind::TimeoutReply {
            self.metrics.record_timeout();

            #[cfg(feature = "observability")]
            warn!(correlation_id = %correlation_id, "Service reported a timeout");

            return Err(QrpcError::CorrelationTimeout {
                correlation_id,
                timeout: deadline.timeout(),
            });
        }
        if reply.kind == MessageKind::ErrorReply && self.config.error_replies_as_errors {
            self.metrics.record_remote_failure();
            return Err(QrpcError::RemoteFailure {
                correlation_id,
                message: String::from_utf8_lossy(&reply.body).into_owned(),
            });
        }
        self.metrics.record_reply(started.elapsed());
        Ok(reply.body)
    }

    async fn await_reply(
        &self,
        session: &Session,
        descriptor: &ReplyQueueDescriptor,
        selector: Option<&Selector>,
        correlation_id: &str,
        deadline: Deadline,
    ) -> Result<Message> {
        loop {
            let received = session
                .receive(descriptor.destination(), selector, deadline.remaining())
                .await?;
            let Some(reply) = received else {
                self.metrics.record_timeout();

                #[cfg(feature = "observability")]
                warn!(
                    correlation_id = %correlation_id,
                    reply_to = %descriptor.destination(),
                    timeout_ms = deadline.timeout().as_millis() as u64,
                    "No reply within timeout"
                );

                return Err(QrpcError::CorrelationTimeout {
                    correlation_id: correlation_id.to_string(),
                    timeout: deadline.timeout(),
                });
            };

            if reply.kind != MessageKind::Request
                && reply.correlation_id.as_deref() == Some(correlation_id)
            {
                return Ok(reply);
            }

            #[cfg(feature = "observability")]
            debug!(
                expected = %correlation_id,
                received = ?reply.correlation_id,
                message_id = %reply.id,
                "Discarded unrelated message on reply queue"
            );
        }
    }

    async fn publish_on(
        &self,
        connection: &Connection,
        destination: &Destination,
        body: Vec<u8>,
    ) -> Result<MessageId> {
        let session = self.open_session(connection).await?;
        let result = async {
            let mut message = OutboundMessage::request(body, MessageProtocol::FireAndForget);
            if let Some(correlation_id) = self.caller_correlation_id() {
                message = message.with_correlation_id(correlation_id);
            }

            let in_distributed = self.transactions.in_distributed_transaction();
            if !session.is_transacted() && !in_distributed {
                #[cfg(feature = "observability")]
                warn!(
                    destination = %destination,
                    "Fire-and-forget send outside any transaction"
                );
            }

            let message_id = session.send(destination, message).await?;
            self.metrics.record_request_sent();
            if session.is_transacted() && !in_distributed {
                session.commit().await?;
            }

            #[cfg(feature = "observability")]
            debug!(destination = %destination, message_id = %message_id, "Message sent");

            Ok::<_, QrpcError>(message_id)
        }
        .await;
        let closed = session.close().await;
        with_cleanup(result, closed, "session close")
    }
}

impl std::fmt::Debug for RequestReplyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestReplyClient")
            .field("application_id", &self.config.application_id)
            .field("protocol", &self.config.protocol)
            .field("reply_queue_mode", &self.config.reply_queue_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::ReplyQueueMode;
    use crate::transport::{AckMode, MemoryTransport, Transport};
    use std::time::Duration;

    fn client(broker: &MemoryTransport, config: ClientConfig) -> RequestReplyClient {
        let registry = ConnectionRegistry::new(Arc::new(broker.clone()));
        RequestReplyClient::new(registry, Arc::new(broker.clone()), config).unwrap()
    }

    /// Answers one request on `queue` with `reply`.
    async fn answer_once(broker: &MemoryTransport, queue: &Destination, reply: &[u8]) {
        let connection = broker.open(&"responder".into()).await.unwrap();
        let session = broker
            .create_session(&connection, false, AckMode::Auto)
            .await
            .unwrap();
        let request = broker
            .receive(&session, queue, None, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        let reply_to = request.reply_to.clone().unwrap();
        let outbound = OutboundMessage::reply(reply.to_vec(), request.effective_correlation_id());
        broker.send(&session, &reply_to, outbound).await.unwrap();
        broker.close(&connection).await.unwrap();
    }

    #[tokio::test]
    async fn test_request_reply_round_trip() {
        let broker = MemoryTransport::new();
        let queue = Destination::queue("SVC");
        let client = client(&broker, ClientConfig::new("app"));

        let responder = {
            let broker = broker.clone();
            let queue = queue.clone();
            tokio::spawn(async move { answer_once(&broker, &queue, b"pong").await })
        };

        let reply = client
            .send_and_await_reply(&queue, b"ping".to_vec(), CallOptions::default())
            .await
            .unwrap();
        responder.await.unwrap();

        assert_eq!(reply, b"pong");
        assert_eq!(client.metrics().total_replies_received(), 1);
        assert_eq!(broker.open_connections(), 0);
        assert_eq!(broker.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_protocol_mismatch_is_violation() {
        let broker = MemoryTransport::new();
        let queue = Destination::queue("SVC");

        let rr = client(&broker, ClientConfig::new("app"));
        assert!(rr.send(&queue, Vec::new()).await.unwrap_err().is_protocol_violation());

        let ff = client(
            &broker,
            ClientConfig::new("app").with_protocol(MessageProtocol::FireAndForget),
        );
        let error = ff
            .send_and_await_reply(&queue, Vec::new(), CallOptions::default())
            .await
            .unwrap_err();
        assert!(error.is_protocol_violation());
        assert_eq!(broker.stats().opens, 0);
    }

    #[tokio::test]
    async fn test_caller_assigned_refused_by_transport() {
        let broker = MemoryTransport::new();
        broker.set_caller_correlation_ids(false);
        let client = client(
            &broker,
            ClientConfig::new("app").with_correlation_id_source(CorrelationIdSource::CallerAssigned),
        );

        let error = client
            .send_and_await_reply(&Destination::queue("SVC"), Vec::new(), CallOptions::default())
            .await
            .unwrap_err();
        assert!(error.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_timeout_releases_everything() {
        let broker = MemoryTransport::new();
        let client = client(
            &broker,
            ClientConfig::new("app").with_reply_queue_mode(ReplyQueueMode::DynamicPerCall),
        );

        let error = client
            .send_and_await_reply(
                &Destination::queue("SVC"),
                Vec::new(),
                CallOptions::with_timeout(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();

        assert!(matches!(error, QrpcError::CorrelationTimeout { .. }));
        let stats = broker.stats();
        assert_eq!(stats.temporary_created, 1);
        assert_eq!(stats.temporary_deleted, 1);
        assert_eq!(stats.sessions_created, stats.sessions_closed);
        assert_eq!(stats.opens, stats.closes);
    }

    #[tokio::test]
    async fn test_send_failure_still_releases_connection() {
        let broker = MemoryTransport::new();
        let client = client(&broker, ClientConfig::new("app"));
        broker.fail_next_sends(1);

        let error = client
            .send_and_await_reply(&Destination::queue("SVC"), Vec::new(), CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(error, QrpcError::Transport(TransportError::SendFailed { .. })));
        assert_eq!(client.registry.ref_count("app"), 0);
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_resolve_service_requires_configuration() {
        let broker = MemoryTransport::new();
        let client = client(&broker, ClientConfig::new("app"));
        assert!(client.resolve_service().await.unwrap_err().is_protocol_violation());

        let client = RequestReplyClient::new(
            ConnectionRegistry::new(Arc::new(broker.clone())),
            Arc::new(broker.clone()),
            ClientConfig::new("app").with_service_id("missing"),
        )
        .unwrap();
        assert!(client.resolve_service().await.unwrap_err().is_connection_error());
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let broker = MemoryTransport::new();
        let result = RequestReplyClient::new(
            ConnectionRegistry::new(Arc::new(broker.clone())),
            Arc::new(broker),
            ClientConfig::new(""),
        );
        assert!(matches!(
            result,
            Err(QrpcError::Transport(TransportError::InvalidConfiguration { .. }))
        ));
    }
}
