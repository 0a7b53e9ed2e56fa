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

//! Provider receive loop.

use super::config::{CommitFailurePolicy, ProviderConfig};
use super::context::ProcessContext;
use super::processor::Processor;
use crate::connection::{Connection, ConnectionRegistry, Session};
use crate::error::{BoxError, QrpcError, Result, with_cleanup};
use crate::observability::{ProviderMetrics, log_error};
use crate::transaction::{NoDistributedTransaction, TransactionContext, owns_commit};
use crate::transport::{
    Destination, Directory, Message, MessageKind, MessageProtocol, OutboundMessage, Selector,
    TransportError,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[cfg(feature = "observability")]
use tracing::{debug, error, info, warn};

/// Where a provider worker is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopState {
    /// Between iterations.
    Idle,
    /// Waiting for the next request.
    Receiving,
    /// Running the processor.
    Processing,
    /// Sending the reply.
    Replying,
    /// Committing the session.
    Committing,
    /// Skipping an unusable message.
    PoisonDetected,
    /// The worker has exited.
    Stopped,
}

impl LoopState {
    /// Returns the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Receiving => "receiving",
            Self::Processing => "processing",
            Self::Replying => "replying",
            Self::Committing => "committing",
            Self::PoisonDetected => "poison-detected",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an iteration left its session.
enum SessionFate {
    Keep,
    Discard,
}

/// Serves requests arriving for one application id.
///
/// Each worker acquires the shared connection for
/// [`ProviderConfig::application_id`], then repeats:
///
/// 1. receive the next request, waiting at most the poll interval
/// 2. skip it as poison if it cannot be served
/// 3. run the [`Processor`]
/// 4. for request-reply, send the reply (or an error reply) to the
///    request's reply-to address, correlated by the request's
///    correlation id or, failing that, its message id
/// 5. commit, when the session is locally transacted and no distributed
///    transaction is active
///
/// Stopping is cooperative: workers notice a stop request between
/// iterations, so a stop takes effect within one poll interval.
///
/// # Example
///
/// ```rust
/// use qrpc::connection::ConnectionRegistry;
/// use qrpc::provider::{ProcessContext, ProviderConfig, ServiceProviderLoop, from_fn};
/// use qrpc::transport::{Destination, MemoryTransport};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> qrpc::Result<()> {
/// let broker = MemoryTransport::new();
/// broker.bind_service("echo", Destination::queue("ECHO.IN"));
/// let registry = ConnectionRegistry::new(Arc::new(broker.clone()));
///
/// let provider = ServiceProviderLoop::new(
///     registry,
///     Arc::new(broker.clone()),
///     Arc::new(from_fn(|body: Vec<u8>, _context: ProcessContext| async move {
///         Ok::<_, qrpc::BoxError>(body)
///     })),
///     ProviderConfig::new("echo").with_poll_interval(Duration::from_millis(20)),
/// )?;
///
/// let handle = provider.spawn().await?;
/// handle.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct ServiceProviderLoop {
    registry: ConnectionRegistry,
    directory: Arc<dyn Directory>,
    processor: Arc<dyn Processor>,
    config: ProviderConfig,
    transactions: Arc<dyn TransactionContext>,
    metrics: Arc<ProviderMetrics>,
}

impl ServiceProviderLoop {
    /// Creates a provider loop.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfiguration`] if the configuration
    /// does not validate.
    pub fn new(
        registry: ConnectionRegistry,
        directory: Arc<dyn Directory>,
        processor: Arc<dyn Processor>,
        config: ProviderConfig,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|reason| TransportError::InvalidConfiguration { reason })?;
        Ok(Self {
            registry,
            directory,
            processor,
            config,
            transactions: Arc::new(NoDistributedTransaction),
            metrics: Arc::new(ProviderMetrics::new()),
        })
    }

    /// Sets how the loop detects an active distributed transaction.
    #[must_use]
    pub fn with_transaction_context(mut self, transactions: Arc<dyn TransactionContext>) -> Self {
        self.transactions = transactions;
        self
    }

    /// Provider configuration.
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Provider metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<ProviderMetrics> {
        &self.metrics
    }

    /// Resolves the input destination and starts the workers.
    ///
    /// # Errors
    ///
    /// Returns [`QrpcError::Connection`] if the input destination cannot be
    /// looked up.
    pub async fn spawn(self) -> Result<ProviderHandle> {
        let application_id = self.config.application_id.clone();
        let input = self
            .directory
            .lookup_provider_input(&application_id)
            .await
            .map_err(|e| QrpcError::connection(format!("provider input of '{}'", application_id), e))?;

        #[cfg(feature = "observability")]
        info!(
            application_id = %application_id,
            input = %input,
            protocol = %self.config.protocol,
            workers = self.config.workers,
            "Starting service provider"
        );

        let (stop, stop_rx) = watch::channel(false);
        let metrics = Arc::clone(&self.metrics);
        let shared = Arc::new(Shared {
            loop_config: self,
            input,
        });

        let mut states = Vec::with_capacity(shared.loop_config.config.workers);
        let mut workers = Vec::with_capacity(shared.loop_config.config.workers);
        for index in 0..shared.loop_config.config.workers {
            let state = Arc::new(Mutex::new(LoopState::Idle));
            let worker = Worker {
                shared: Arc::clone(&shared),
                index,
                state: Arc::clone(&state),
                selector: shared
                    .loop_config
                    .config
                    .use_protocol_selector
                    .then_some(Selector::Protocol(shared.loop_config.config.protocol)),
            };
            states.push(state);
            workers.push(tokio::spawn(worker.run(stop_rx.clone())));
        }

        Ok(ProviderHandle {
            stop,
            workers,
            states,
            metrics,
        })
    }
}

impl fmt::Debug for ServiceProviderLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProviderLoop")
            .field("config", &self.config)
            .finish()
    }
}

struct Shared {
    loop_config: ServiceProviderLoop,
    input: Destination,
}

struct Worker {
    shared: Arc<Shared>,
    index: usize,
    state: Arc<Mutex<LoopState>>,
    selector: Option<Selector>,
}

impl Worker {
    fn provider(&self) -> &ServiceProviderLoop {
        &self.shared.loop_config
    }

    fn config(&self) -> &ProviderConfig {
        &self.shared.loop_config.config
    }

    fn set_state(&self, state: LoopState) {
        *self.state.lock() = state;
    }

    async fn run(mut self, stop: watch::Receiver<bool>) -> Result<()> {
        let registry = self.provider().registry.clone();
        let result = match registry.acquire(self.config().application_id.as_str()).await {
            Ok(connection) => {
                let result = self.serve(&connection, stop).await;
                let released = registry.release(&connection).await;
                with_cleanup(result, released, "connection release")
            }
            Err(e) => Err(e),
        };
        self.set_state(LoopState::Stopped);

        #[cfg(feature = "observability")]
        match &result {
            Ok(()) => debug!(worker = self.index, "Provider worker stopped"),
            Err(e) => error!(worker = self.index, error = %e, "Provider worker failed"),
        }

        result
    }

    async fn serve(&mut self, connection: &Connection, mut stop: watch::Receiver<bool>) -> Result<()> {
        let mut pooled: Option<Session> = None;
        let result = loop {
            if *stop.borrow() {
                break Ok(());
            }

            let session = match pooled.take() {
                Some(session) => session,
                None => match self.open_session(connection).await {
                    Ok(session) => session,
                    Err(e) => break Err(e),
                },
            };

            match self.iterate(&session, &mut stop).await {
                Ok(SessionFate::Keep) if self.config().session_pooling => pooled = Some(session),
                Ok(_) => close_quietly(&session).await,
                Err(e) => {
                    close_quietly(&session).await;
                    log_error(&e);
                    if is_connection_fatal(&e) {
                        break Err(e);
                    }
                    // Back off before retrying so a persistent failure does not spin.
                    let backoff = tokio::time::sleep(self.config().poll_interval);
                    tokio::select! {
                        () = backoff => {}
                        _ = stop.changed() => {}
                    }
                }
            }
            self.set_state(LoopState::Idle);
        };

        if let Some(session) = pooled {
            close_quietly(&session).await;
        }
        result
    }

    async fn open_session(&self, connection: &Connection) -> Result<Session> {
        connection
            .open_session(
                self.config().protocol,
                self.config().session_transacted(),
                self.config().session_ack_mode(),
            )
            .await
    }

    async fn iterate(
        &mut self,
        session: &Session,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<SessionFate> {
        self.set_state(LoopState::Receiving);
        // A stop request interrupts the wait for a message, never its processing.
        let received = tokio::select! {
            received = session.receive(
                &self.shared.input,
                self.selector.as_ref(),
                self.config().poll_interval,
            ) => received,
            _ = stop.changed() => return Ok(SessionFate::Keep),
        };

        let mut message = match received {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(SessionFate::Keep),
            Err(QrpcError::Transport(e)) if e.is_invalid_selector() && self.selector.is_some() => {
                #[cfg(feature = "observability")]
                warn!(
                    worker = self.index,
                    error = %e,
                    "Transport rejected the protocol selector; receiving without one"
                );
                self.selector = None;
                return Ok(SessionFate::Keep);
            }
            Err(QrpcError::Transport(TransportError::MalformedMessage { message_id, reason })) => {
                let poison = QrpcError::PoisonMessage { message_id, reason };
                return self.skip_poison(session, poison).await;
            }
            Err(e) => return Err(e),
        };
        self.provider().metrics.record_message_received();

        if let Some(reason) = self.classify(&message) {
            let poison = QrpcError::PoisonMessage {
                message_id: Some(message.id.to_string()),
                reason,
            };
            return self.skip_poison(session, poison).await;
        }

        self.set_state(LoopState::Processing);
        let context = ProcessContext::from_message(&message, self.index);
        let body = std::mem::take(&mut message.body);
        let outcome = self.provider().processor.process(body, &context).await;
        match &outcome {
            Ok(_) => self.provider().metrics.record_message_processed(),
            Err(_e) => {
                self.provider().metrics.record_processing_error();
                #[cfg(feature = "observability")]
                warn!(
                    worker = self.index,
                    message_id = %context.message_id,
                    error = %_e,
                    "Processing failed"
                );
            }
        }

        if self.config().protocol == MessageProtocol::RequestReply {
            self.set_state(LoopState::Replying);
            self.reply(session, &message, &context, outcome).await;
        }

        self.commit(session).await
    }

    /// Returns why `message` cannot be served, if it cannot.
    fn classify(&self, message: &Message) -> Option<String> {
        if message.kind != MessageKind::Request {
            return Some(format!("expected a request, received {:?}", message.kind));
        }
        if message.protocol != self.config().protocol {
            return Some(format!(
                "protocol {} does not match provider protocol {}",
                message.protocol,
                self.config().protocol
            ));
        }
        if message.protocol == MessageProtocol::RequestReply && message.reply_to.is_none() {
            return Some("request-reply message has no reply-to address".to_string());
        }
        None
    }

    async fn skip_poison(&self, session: &Session, poison: QrpcError) -> Result<SessionFate> {
        self.set_state(LoopState::PoisonDetected);
        self.provider().metrics.record_poison_message();
        log_error(&poison);
        self.commit(session).await
    }

    async fn reply(
        &self,
        session: &Session,
        request: &Message,
        context: &ProcessContext,
        outcome: std::result::Result<Vec<u8>, BoxError>,
    ) {
        let Some(reply_to) = context.reply_to.as_ref() else {
            return;
        };
        let correlation_id = context.correlation_id.as_str();
        let reply = match outcome {
            Ok(body) => OutboundMessage::reply(body, correlation_id),
            Err(e) => OutboundMessage::error_reply(&e.to_string(), correlation_id),
        }
        .with_expiration(request.expiration);

        let metrics = &self.provider().metrics;
        match session.send(reply_to, reply).await {
            Ok(_) => {
                metrics.record_reply_sent();

                #[cfg(feature = "observability")]
                debug!(
                    worker = self.index,
                    reply_to = %reply_to,
                    correlation_id = %correlation_id,
                    "Reply sent"
                );
            }
            Err(e) => {
                metrics.record_reply_failure();
                log_error(&e);

                let fallback = OutboundMessage::error_reply(
                    &format!("reply could not be sent: {}", e),
                    correlation_id,
                )
                .with_expiration(request.expiration);
                match session.send(reply_to, fallback).await {
                    Ok(_) => metrics.record_reply_sent(),
                    Err(_e) => {
                        #[cfg(feature = "observability")]
                        error!(
                            worker = self.index,
                            reply_to = %reply_to,
                            correlation_id = %correlation_id,
                            error = %_e,
                            "Error reply could not be sent either; caller will time out"
                        );
                    }
                }
            }
        }
    }

    async fn commit(&self, session: &Session) -> Result<SessionFate> {
        if !owns_commit(session, self.provider().transactions.as_ref()) {
            return Ok(SessionFate::Keep);
        }

        self.set_state(LoopState::Committing);
        match session.commit().await {
            Ok(()) => {
                self.provider().metrics.record_commit();
                Ok(SessionFate::Keep)
            }
            Err(e) => {
                self.provider().metrics.record_commit_failure();
                match self.config().commit_failure {
                    CommitFailurePolicy::Warn => {
                        #[cfg(feature = "observability")]
                        warn!(
                            worker = self.index,
                            error = %e,
                            "Commit failed; replacing session"
                        );
                        #[cfg(not(feature = "observability"))]
                        let _ = e;
                        Ok(SessionFate::Discard)
                    }
                    CommitFailurePolicy::Fatal => Err(e),
                }
            }
        }
    }
}

fn is_connection_fatal(error: &QrpcError) -> bool {
    match error {
        QrpcError::Transport(source) | QrpcError::Connection { source, .. } => {
            source.should_close_connection()
        }
        _ => false,
    }
}

async fn close_quietly(session: &Session) {
    if let Err(_e) = session.close().await {
        #[cfg(feature = "observability")]
        warn!(error = %_e, "Failed to close provider session");
    }
}

/// Controls a running [`ServiceProviderLoop`].
///
/// Dropping the handle requests a stop but does not wait for the workers.
pub struct ProviderHandle {
    stop: watch::Sender<bool>,
    workers: Vec<JoinHandle<Result<()>>>,
    states: Vec<Arc<Mutex<LoopState>>>,
    metrics: Arc<ProviderMetrics>,
}

impl ProviderHandle {
    /// Asks every worker to stop after its current iteration.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Returns `true` once a stop was requested.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        *self.stop.borrow()
    }

    /// Current state of every worker, by worker index.
    #[must_use]
    pub fn states(&self) -> Vec<LoopState> {
        self.states.iter().map(|state| *state.lock()).collect()
    }

    /// Provider metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<ProviderMetrics> {
        &self.metrics
    }

    /// Waits for every worker to exit.
    ///
    /// # Errors
    ///
    /// Returns the first worker error, or [`QrpcError::Processing`] if a
    /// worker panicked.
    pub async fn join(mut self) -> Result<()> {
        let mut first_error = None;
        for worker in std::mem::take(&mut self.workers) {
            let outcome = match worker.await {
                Ok(result) => result,
                Err(join_error) => Err(QrpcError::Processing(Box::new(join_error))),
            };
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stops the workers and waits for them to exit.
    ///
    /// # Errors
    ///
    /// Same as [`join`](Self::join).
    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.join().await
    }
}

impl Drop for ProviderHandle {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("workers", &self.workers.len())
            .field("states", &self.states())
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::from_fn;
    use crate::transport::{AckMode, EndpointKey, MemoryTransport, Transport};
    use std::time::Duration;

    fn echo() -> Arc<dyn Processor> {
        Arc::new(from_fn(|body: Vec<u8>, _context| async move { Ok(body) }))
    }

    fn provider(broker: &MemoryTransport, config: ProviderConfig) -> ServiceProviderLoop {
        broker.bind_service("svc", Destination::queue("SVC.IN"));
        ServiceProviderLoop::new(
            ConnectionRegistry::new(Arc::new(broker.clone())),
            Arc::new(broker.clone()),
            echo(),
            config,
        )
        .unwrap()
    }

    fn config() -> ProviderConfig {
        ProviderConfig::new("svc").with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_spawn_fails_without_input() {
        let broker = MemoryTransport::new();
        let provider = ServiceProviderLoop::new(
            ConnectionRegistry::new(Arc::new(broker.clone())),
            Arc::new(broker.clone()),
            echo(),
            ProviderConfig::new("unbound"),
        )
        .unwrap();
        assert!(provider.spawn().await.unwrap_err().is_connection_error());
    }

    #[tokio::test]
    async fn test_stop_releases_connection() {
        let broker = MemoryTransport::new();
        let handle = provider(&broker, config().with_workers(3)).spawn().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(broker.stats().opens, 1);

        handle.shutdown().await.unwrap();
        assert_eq!(broker.open_connections(), 0);
        assert_eq!(broker.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_reply_carries_request_message_id() {
        let broker = MemoryTransport::new();
        let handle = provider(&broker, config()).spawn().await.unwrap();

        let connection = broker.open(&EndpointKey::new("caller")).await.unwrap();
        let session = broker
            .create_session(&connection, false, AckMode::Auto)
            .await
            .unwrap();
        let reply_queue = broker.create_temporary_destination(&session).await.unwrap();
        let request = OutboundMessage::request(b"hi".to_vec(), MessageProtocol::RequestReply)
            .with_reply_to(reply_queue.clone());
        let message_id = broker
            .send(&session, &Destination::queue("SVC.IN"), request)
            .await
            .unwrap();

        let reply = broker
            .receive(&session, &reply_queue, None, Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.body, b"hi");
        assert_eq!(reply.kind, MessageKind::Reply);
        assert_eq!(reply.correlation_id.as_deref(), Some(message_id.as_str()));

        handle.shutdown().await.unwrap();
        broker.close(&connection).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_selector_falls_back() {
        let broker = MemoryTransport::new();
        broker.reject_protocol_selectors(true);
        let handle = provider(&broker, config()).spawn().await.unwrap();

        let connection = broker.open(&EndpointKey::new("caller")).await.unwrap();
        let session = broker
            .create_session(&connection, false, AckMode::Auto)
            .await
            .unwrap();
        let reply_queue = broker.create_temporary_destination(&session).await.unwrap();
        let request = OutboundMessage::request(b"x".to_vec(), MessageProtocol::RequestReply)
            .with_reply_to(reply_queue.clone());
        broker
            .send(&session, &Destination::queue("SVC.IN"), request)
            .await
            .unwrap();

        let reply = broker
            .receive(&session, &reply_queue, None, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(reply.is_some());

        handle.shutdown().await.unwrap();
    }

    #[test]
    fn test_loop_state_names() {
        assert_eq!(LoopState::PoisonDetected.to_string(), "poison-detected");
        assert_eq!(LoopState::Idle.as_str(), "idle");
    }
}
