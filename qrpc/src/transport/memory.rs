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

//! In-memory transport implementation.
//!
//! This module provides an in-process message broker implementing both
//! [`Transport`] and [`Directory`]. It is primarily useful for testing and
//! benchmarking the correlation layer without a real broker, and for wiring
//! components of one process together through queues.
//!
//! The broker keeps named queues and temporary destinations, evaluates
//! selectors, drops expired messages, buffers the sends of transacted
//! sessions until commit, and counts every lifecycle call so tests can assert
//! exact open/close and create/delete numbers. Faults can be injected to
//! exercise error paths.

use super::error::TransportError;
use super::selector::Selector;
use super::traits::{Directory, Transport};
use super::types::{
    AckMode, ConnectionHandle, Destination, EndpointKey, Message, MessageId, OutboundMessage,
    SessionHandle,
};
use crate::deadline::Deadline;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;

#[cfg(feature = "observability")]
use tracing::{debug, trace};

/// Snapshot of a [`MemoryTransport`]'s lifecycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryTransportStats {
    /// Physical connections opened
    pub opens: u64,
    /// Physical connections closed
    pub closes: u64,
    /// Sessions created
    pub sessions_created: u64,
    /// Sessions closed
    pub sessions_closed: u64,
    /// Temporary destinations created
    pub temporary_created: u64,
    /// Temporary destinations deleted
    pub temporary_deleted: u64,
    /// Messages accepted by `send`
    pub sends: u64,
    /// Successful commits
    pub commits: u64,
}

#[derive(Debug, Default)]
struct Counters {
    opens: AtomicU64,
    closes: AtomicU64,
    sessions_created: AtomicU64,
    sessions_closed: AtomicU64,
    temporary_created: AtomicU64,
    temporary_deleted: AtomicU64,
    sends: AtomicU64,
    commits: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> MemoryTransportStats {
        MemoryTransportStats {
            opens: self.opens.load(Ordering::SeqCst),
            closes: self.closes.load(Ordering::SeqCst),
            sessions_created: self.sessions_created.load(Ordering::SeqCst),
            sessions_closed: self.sessions_closed.load(Ordering::SeqCst),
            temporary_created: self.temporary_created.load(Ordering::SeqCst),
            temporary_deleted: self.temporary_deleted.load(Ordering::SeqCst),
            sends: self.sends.load(Ordering::SeqCst),
            commits: self.commits.load(Ordering::SeqCst),
        }
    }
}

/// A queued entry. Malformed entries stand in for messages a real broker
/// delivered but that could not be decoded.
#[derive(Debug)]
enum Stored {
    Message(Message),
    Malformed {
        message_id: Option<String>,
        reason: String,
    },
}

impl Stored {
    fn is_expired_at(&self, now: SystemTime) -> bool {
        match self {
            Self::Message(message) => message.is_expired_at(now),
            Self::Malformed { .. } => false,
        }
    }

    fn passes(&self, selector: Option<&Selector>) -> bool {
        match (self, selector) {
            (_, None) => true,
            (Self::Message(message), Some(selector)) => selector.matches(message),
            (Self::Malformed { .. }, Some(Selector::Protocol(_))) => true,
            (Self::Malformed { .. }, Some(Selector::CorrelationId(_))) => false,
        }
    }
}

#[derive(Debug)]
struct SessionState {
    connection_id: u64,
    transacted: bool,
    pending: Vec<(Destination, Message)>,
}

#[derive(Debug, Default)]
struct Faults {
    failing_opens: usize,
    failing_sends: usize,
    failing_commits: usize,
    reject_protocol_selectors: bool,
    open_delays: HashMap<EndpointKey, Duration>,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<Stored>>,
    /// Temporary destination name to owning connection id.
    temporaries: HashMap<String, u64>,
    connections: HashMap<u64, EndpointKey>,
    sessions: HashMap<u64, SessionState>,
    services: HashMap<String, Destination>,
    service_timeouts: HashMap<String, Duration>,
    replies: HashMap<String, Destination>,
    provider_inputs: HashMap<String, Destination>,
}

impl BrokerState {
    fn session(&self, session: &SessionHandle) -> Result<&SessionState, TransportError> {
        self.sessions
            .get(&session.id())
            .ok_or(TransportError::UnknownHandle {
                kind: "session",
                id: session.id(),
            })
    }

    fn enqueue(&mut self, destination: &Destination, message: Message) -> Result<(), TransportError> {
        if destination.is_temporary() && !self.temporaries.contains_key(destination.name()) {
            return Err(TransportError::DestinationNotFound {
                name: destination.name().to_string(),
            });
        }
        self.queues
            .entry(destination.name().to_string())
            .or_default()
            .push_back(Stored::Message(message));
        Ok(())
    }

    fn take_matching(
        &mut self,
        source: &Destination,
        selector: Option<&Selector>,
    ) -> Result<Option<Stored>, TransportError> {
        if source.is_temporary() && !self.temporaries.contains_key(source.name()) {
            return Err(TransportError::DestinationNotFound {
                name: source.name().to_string(),
            });
        }
        let Some(queue) = self.queues.get_mut(source.name()) else {
            return Ok(None);
        };
        let now = SystemTime::now();
        queue.retain(|stored| !stored.is_expired_at(now));
        let position = queue.iter().position(|stored| stored.passes(selector));
        Ok(position.and_then(|index| queue.remove(index)))
    }
}

struct BrokerInner {
    name: String,
    state: Mutex<BrokerState>,
    faults: Mutex<Faults>,
    arrivals: Notify,
    next_id: AtomicU64,
    counters: Counters,
    caller_correlation_ids: AtomicBool,
}

/// In-memory message broker.
///
/// `MemoryTransport` is cheap to clone; clones share the same broker.
///
/// # Examples
///
/// ```rust
/// use qrpc::transport::{
///     AckMode, Destination, EndpointKey, MemoryTransport, MessageProtocol, OutboundMessage,
///     Transport,
/// };
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = MemoryTransport::new();
/// let connection = broker.open(&EndpointKey::new("svcA")).await?;
/// let session = broker.create_session(&connection, false, AckMode::Auto).await?;
///
/// let queue = Destination::queue("REQUESTS");
/// let outbound = OutboundMessage::request(b"hello".to_vec(), MessageProtocol::FireAndForget);
/// broker.send(&session, &queue, outbound).await?;
///
/// let received = broker
///     .receive(&session, &queue, None, Duration::from_millis(10))
///     .await?
///     .expect("message");
/// assert_eq!(received.body, b"hello");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<BrokerInner>,
}

impl MemoryTransport {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::with_name("memory")
    }

    /// Creates an empty broker with a name used in logs.
    #[must_use]
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                name: name.into(),
                state: Mutex::new(BrokerState::default()),
                faults: Mutex::new(Faults::default()),
                arrivals: Notify::new(),
                next_id: AtomicU64::new(1),
                counters: Counters::default(),
                caller_correlation_ids: AtomicBool::new(true),
            }),
        }
    }

    /// Binds a service id to its request destination.
    pub fn bind_service(&self, service_id: impl Into<String>, destination: Destination) {
        self.inner
            .state
            .lock()
            .services
            .insert(service_id.into(), destination);
    }

    /// Advertises a default reply timeout for a service id.
    pub fn bind_service_timeout(&self, service_id: impl Into<String>, timeout: Duration) {
        self.inner
            .state
            .lock()
            .service_timeouts
            .insert(service_id.into(), timeout);
    }

    /// Binds a requester id to its static reply destination.
    pub fn bind_reply(&self, requester_id: impl Into<String>, destination: Destination) {
        self.inner
            .state
            .lock()
            .replies
            .insert(requester_id.into(), destination);
    }

    /// Binds an application id to the destination its provider listens on.
    ///
    /// Unbound application ids fall back to the service bindings.
    pub fn bind_provider_input(&self, application_id: impl Into<String>, destination: Destination) {
        self.inner
            .state
            .lock()
            .provider_inputs
            .insert(application_id.into(), destination);
    }

    /// Controls whether senders may set their own correlation ids.
    pub fn set_caller_correlation_ids(&self, allowed: bool) {
        self.inner
            .caller_correlation_ids
            .store(allowed, Ordering::SeqCst);
    }

    /// Makes the next `count` calls to `open` fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.inner.faults.lock().failing_opens = count;
    }

    /// Makes the next `count` calls to `send` fail.
    pub fn fail_next_sends(&self, count: usize) {
        self.inner.faults.lock().failing_sends = count;
    }

    /// Makes the next `count` calls to `commit` fail.
    pub fn fail_next_commits(&self, count: usize) {
        self.inner.faults.lock().failing_commits = count;
    }

    /// Rejects protocol selectors with [`TransportError::InvalidSelector`].
    pub fn reject_protocol_selectors(&self, reject: bool) {
        self.inner.faults.lock().reject_protocol_selectors = reject;
    }

    /// Delays every `open` for `endpoint` by `delay`.
    pub fn set_open_delay(&self, endpoint: impl Into<EndpointKey>, delay: Duration) {
        self.inner
            .faults
            .lock()
            .open_delays
            .insert(endpoint.into(), delay);
    }

    /// Places a message directly on a destination, bypassing sessions.
    pub fn inject(&self, destination: &Destination, outbound: OutboundMessage) -> MessageId {
        let id = self.next_message_id();
        let message = Message::from_outbound(id.clone(), outbound);
        self.inner
            .state
            .lock()
            .queues
            .entry(destination.name().to_string())
            .or_default()
            .push_back(Stored::Message(message));
        self.inner.arrivals.notify_waiters();
        id
    }

    /// Places an unreadable message on a destination.
    pub fn inject_malformed(&self, destination: &Destination, reason: impl Into<String>) {
        let message_id = Some(self.next_message_id().into_string());
        self.inner
            .state
            .lock()
            .queues
            .entry(destination.name().to_string())
            .or_default()
            .push_back(Stored::Malformed {
                message_id,
                reason: reason.into(),
            });
        self.inner.arrivals.notify_waiters();
    }

    /// Returns a snapshot of the lifecycle counters.
    #[must_use]
    pub fn stats(&self) -> MemoryTransportStats {
        self.inner.counters.snapshot()
    }

    /// Number of messages currently queued on `destination`, expired ones included.
    #[must_use]
    pub fn queue_depth(&self, destination: &Destination) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(destination.name())
            .map_or(0, VecDeque::len)
    }

    /// Number of connections currently open.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    /// Number of sessions currently open.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.inner.state.lock().sessions.len()
    }

    /// Number of temporary destinations currently alive.
    #[must_use]
    pub fn temporary_destinations(&self) -> usize {
        self.inner.state.lock().temporaries.len()
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn next_message_id(&self) -> MessageId {
        MessageId::new(format!("ID:{}", uuid::Uuid::new_v4()))
    }

    fn take_fault(slot: &mut usize) -> bool {
        if *slot > 0 {
            *slot -= 1;
            true
        } else {
            false
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish()
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn open(&self, endpoint: &EndpointKey) -> Result<ConnectionHandle, TransportError> {
        let (fail, delay) = {
            let mut faults = self.inner.faults.lock();
            let fail = Self::take_fault(&mut faults.failing_opens);
            (fail, faults.open_delays.get(endpoint).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(TransportError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: "injected open failure".to_string(),
            });
        }

        let id = self.next_id();
        self.inner
            .state
            .lock()
            .connections
            .insert(id, endpoint.clone());
        self.inner.counters.opens.fetch_add(1, Ordering::SeqCst);

        #[cfg(feature = "observability")]
        debug!(broker = %self.inner.name, endpoint = %endpoint, connection_id = id, "Connection opened");

        Ok(ConnectionHandle::new(id, endpoint.clone()))
    }

    async fn close(&self, connection: &ConnectionHandle) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock();
        if state.connections.remove(&connection.id()).is_none() {
            return Err(TransportError::UnknownHandle {
                kind: "connection",
                id: connection.id(),
            });
        }

        // Closing a connection closes its sessions and temporary destinations.
        let before = state.sessions.len();
        state
            .sessions
            .retain(|_, session| session.connection_id != connection.id());
        let closed_sessions = (before - state.sessions.len()) as u64;

        let owned: Vec<String> = state
            .temporaries
            .iter()
            .filter(|(_, owner)| **owner == connection.id())
            .map(|(name, _)| name.clone())
            .collect();
        for name in &owned {
            state.temporaries.remove(name);
            state.queues.remove(name);
        }
        drop(state);

        let counters = &self.inner.counters;
        counters.closes.fetch_add(1, Ordering::SeqCst);
        counters
            .sessions_closed
            .fetch_add(closed_sessions, Ordering::SeqCst);
        counters
            .temporary_deleted
            .fetch_add(owned.len() as u64, Ordering::SeqCst);
        self.inner.arrivals.notify_waiters();

        #[cfg(feature = "observability")]
        debug!(broker = %self.inner.name, connection_id = connection.id(), "Connection closed");

        Ok(())
    }

    async fn create_session(
        &self,
        connection: &ConnectionHandle,
        transacted: bool,
        ack_mode: AckMode,
    ) -> Result<SessionHandle, TransportError> {
        let id = self.next_id();
        let mut state = self.inner.state.lock();
        if !state.connections.contains_key(&connection.id()) {
            return Err(TransportError::UnknownHandle {
                kind: "connection",
                id: connection.id(),
            });
        }
        state.sessions.insert(
            id,
            SessionState {
                connection_id: connection.id(),
                transacted,
                pending: Vec::new(),
            },
        );
        self.inner
            .counters
            .sessions_created
            .fetch_add(1, Ordering::SeqCst);
        Ok(SessionHandle::new(id, connection.id(), transacted, ack_mode))
    }

    async fn close_session(&self, session: &SessionHandle) -> Result<(), TransportError> {
        let removed = self.inner.state.lock().sessions.remove(&session.id());
        match removed {
            Some(_) => {
                self.inner
                    .counters
                    .sessions_closed
                    .fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(TransportError::UnknownHandle {
                kind: "session",
                id: session.id(),
            }),
        }
    }

    async fn send(
        &self,
        session: &SessionHandle,
        destination: &Destination,
        message: OutboundMessage,
    ) -> Result<MessageId, TransportError> {
        if Self::take_fault(&mut self.inner.faults.lock().failing_sends) {
            return Err(TransportError::SendFailed {
                destination: destination.to_string(),
                reason: "injected send failure".to_string(),
            });
        }

        let id = self.next_message_id();
        let message = Message::from_outbound(id.clone(), message);
        {
            let mut state = self.inner.state.lock();
            let transacted = state.session(session)?.transacted;
            if destination.is_temporary() && !state.temporaries.contains_key(destination.name()) {
                return Err(TransportError::DestinationNotFound {
                    name: destination.name().to_string(),
                });
            }
            if transacted {
                if let Some(pending) = state.sessions.get_mut(&session.id()) {
                    pending.pending.push((destination.clone(), message));
                }
            } else {
                state.enqueue(destination, message)?;
            }
        }
        self.inner.counters.sends.fetch_add(1, Ordering::SeqCst);
        self.inner.arrivals.notify_waiters();

        #[cfg(feature = "observability")]
        trace!(broker = %self.inner.name, destination = %destination, message_id = %id, "Message sent");

        Ok(id)
    }

    async fn receive(
        &self,
        session: &SessionHandle,
        source: &Destination,
        selector: Option<&Selector>,
        timeout: Duration,
    ) -> Result<Option<Message>, TransportError> {
        if let Some(selector @ Selector::Protocol(_)) = selector {
            if self.inner.faults.lock().reject_protocol_selectors {
                return Err(TransportError::InvalidSelector {
                    selector: selector.to_string(),
                    reason: "protocol selectors disabled".to_string(),
                });
            }
        }

        let deadline = Deadline::after(timeout).instant();
        loop {
            let notified = self.inner.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let taken = {
                let mut state = self.inner.state.lock();
                state.session(session)?;
                state.take_matching(source, selector)?
            };
            match taken {
                Some(Stored::Message(message)) => return Ok(Some(message)),
                Some(Stored::Malformed { message_id, reason }) => {
                    return Err(TransportError::MalformedMessage { message_id, reason });
                }
                None => {}
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn create_temporary_destination(
        &self,
        session: &SessionHandle,
    ) -> Result<Destination, TransportError> {
        let name = format!("TEMP.{}.{}", session.connection_id(), self.next_id());
        {
            let mut state = self.inner.state.lock();
            state.session(session)?;
            state
                .temporaries
                .insert(name.clone(), session.connection_id());
            state.queues.insert(name.clone(), VecDeque::new());
        }
        self.inner
            .counters
            .temporary_created
            .fetch_add(1, Ordering::SeqCst);
        Ok(Destination::temporary(name))
    }

    async fn delete_destination(&self, destination: &Destination) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock();
        if destination.is_temporary() {
            if state.temporaries.remove(destination.name()).is_none() {
                return Err(TransportError::DestinationNotFound {
                    name: destination.name().to_string(),
                });
            }
            state.queues.remove(destination.name());
            drop(state);
            self.inner
                .counters
                .temporary_deleted
                .fetch_add(1, Ordering::SeqCst);
        } else if state.queues.remove(destination.name()).is_none() {
            return Err(TransportError::DestinationNotFound {
                name: destination.name().to_string(),
            });
        }
        self.inner.arrivals.notify_waiters();
        Ok(())
    }

    async fn commit(&self, session: &SessionHandle) -> Result<(), TransportError> {
        if Self::take_fault(&mut self.inner.faults.lock().failing_commits) {
            return Err(TransportError::CommitFailed {
                reason: "injected commit failure".to_string(),
            });
        }

        {
            let mut state = self.inner.state.lock();
            let pending = match state.sessions.get_mut(&session.id()) {
                Some(entry) => std::mem::take(&mut entry.pending),
                None => {
                    return Err(TransportError::UnknownHandle {
                        kind: "session",
                        id: session.id(),
                    });
                }
            };
            for (destination, message) in pending {
                // A temporary destination deleted before commit loses the message.
                if let Err(_e) = state.enqueue(&destination, message) {
                    #[cfg(feature = "observability")]
                    debug!(broker = %self.inner.name, error = %_e, "Dropped committed message");
                }
            }
        }
        self.inner.counters.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.arrivals.notify_waiters();
        Ok(())
    }

    fn supports_caller_correlation_ids(&self) -> bool {
        self.inner.caller_correlation_ids.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Directory for MemoryTransport {
    async fn lookup_service(&self, service_id: &str) -> Result<Destination, TransportError> {
        self.inner
            .state
            .lock()
            .services
            .get(service_id)
            .cloned()
            .ok_or_else(|| TransportError::NameNotFound {
                name: service_id.to_string(),
            })
    }

    async fn lookup_service_timeout(
        &self,
        service_id: &str,
    ) -> Result<Option<Duration>, TransportError> {
        Ok(self
            .inner
            .state
            .lock()
            .service_timeouts
            .get(service_id)
            .copied())
    }

    async fn lookup_reply(&self, requester_id: &str) -> Result<Destination, TransportError> {
        self.inner
            .state
            .lock()
            .replies
            .get(requester_id)
            .cloned()
            .ok_or_else(|| TransportError::NameNotFound {
                name: requester_id.to_string(),
            })
    }

    async fn lookup_provider_input(
        &self,
        application_id: &str,
    ) -> Result<Destination, TransportError> {
        let bound = self
            .inner
            .state
            .lock()
            .provider_inputs
            .get(application_id)
            .cloned();
        match bound {
            Some(destination) => Ok(destination),
            None => self.lookup_service(application_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::types::MessageProtocol;

    async fn session(broker: &MemoryTransport, transacted: bool) -> SessionHandle {
        let connection = broker.open(&EndpointKey::new("test")).await.unwrap();
        broker
            .create_session(&connection, transacted, AckMode::Auto)
            .await
            .unwrap()
    }

    fn request(body: &[u8]) -> OutboundMessage {
        OutboundMessage::request(body.to_vec(), MessageProtocol::RequestReply)
    }

    #[tokio::test]
    async fn test_send_receive() {
        let broker = MemoryTransport::new();
        let session = session(&broker, false).await;
        let queue = Destination::queue("Q");

        let id = broker.send(&session, &queue, request(b"one")).await.unwrap();
        let message = broker
            .receive(&session, &queue, None, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.id, id);
        assert_eq!(message.body, b"one");
        assert_eq!(broker.queue_depth(&queue), 0);
    }

    #[tokio::test]
    async fn test_receive_times_out_empty() {
        let broker = MemoryTransport::new();
        let session = session(&broker, false).await;
        let received = broker
            .receive(&session, &Destination::queue("EMPTY"), None, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_receive_wakes_on_arrival() {
        let broker = MemoryTransport::new();
        let session = session(&broker, false).await;
        let queue = Destination::queue("Q");

        let sender = broker.clone();
        let send_session = session.clone();
        let send_queue = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sender
                .send(&send_session, &send_queue, request(b"late"))
                .await
                .unwrap();
        });

        let message = broker
            .receive(&session, &queue, None, Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.body, b"late");
    }

    #[tokio::test]
    async fn test_selector_filters() {
        let broker = MemoryTransport::new();
        let session = session(&broker, false).await;
        let queue = Destination::queue("REPLIES");

        broker
            .send(&session, &queue, OutboundMessage::reply(b"a".to_vec(), "c-a"))
            .await
            .unwrap();
        broker
            .send(&session, &queue, OutboundMessage::reply(b"b".to_vec(), "c-b"))
            .await
            .unwrap();

        let selector = Selector::correlation_id("c-b");
        let message = broker
            .receive(&session, &queue, Some(&selector), Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.body, b"b");
        assert_eq!(broker.queue_depth(&queue), 1);
    }

    #[tokio::test]
    async fn test_transacted_send_visible_after_commit() {
        let broker = MemoryTransport::new();
        let session = session(&broker, true).await;
        let queue = Destination::queue("Q");

        broker.send(&session, &queue, request(b"tx")).await.unwrap();
        assert_eq!(broker.queue_depth(&queue), 0);

        broker.commit(&session).await.unwrap();
        assert_eq!(broker.queue_depth(&queue), 1);
        assert_eq!(broker.stats().commits, 1);
    }

    #[tokio::test]
    async fn test_expired_messages_are_dropped() {
        let broker = MemoryTransport::new();
        let session = session(&broker, false).await;
        let queue = Destination::queue("Q");

        let expired = request(b"old").with_expiration(Some(SystemTime::now() - Duration::from_secs(1)));
        broker.send(&session, &queue, expired).await.unwrap();

        let received = broker
            .receive(&session, &queue, None, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_temporary_destination_lifecycle() {
        let broker = MemoryTransport::new();
        let session = session(&broker, false).await;

        let temp = broker.create_temporary_destination(&session).await.unwrap();
        assert!(temp.is_temporary());
        assert_eq!(broker.temporary_destinations(), 1);

        broker.delete_destination(&temp).await.unwrap();
        assert_eq!(broker.temporary_destinations(), 0);

        let result = broker.send(&session, &temp, request(b"x")).await;
        assert!(matches!(result, Err(TransportError::DestinationNotFound { .. })));

        let stats = broker.stats();
        assert_eq!(stats.temporary_created, 1);
        assert_eq!(stats.temporary_deleted, 1);
    }

    #[tokio::test]
    async fn test_close_connection_drops_owned_resources() {
        let broker = MemoryTransport::new();
        let connection = broker.open(&EndpointKey::new("a")).await.unwrap();
        let session = broker
            .create_session(&connection, false, AckMode::Auto)
            .await
            .unwrap();
        broker.create_temporary_destination(&session).await.unwrap();

        broker.close(&connection).await.unwrap();
        assert_eq!(broker.open_sessions(), 0);
        assert_eq!(broker.temporary_destinations(), 0);
        assert!(broker.close(&connection).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let broker = MemoryTransport::new();
        broker.fail_next_opens(1);
        assert!(broker.open(&EndpointKey::new("a")).await.is_err());
        assert!(broker.open(&EndpointKey::new("a")).await.is_ok());

        let session = session(&broker, false).await;
        broker.fail_next_sends(1);
        let queue = Destination::queue("Q");
        assert!(broker.send(&session, &queue, request(b"x")).await.is_err());
        assert!(broker.send(&session, &queue, request(b"x")).await.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_message_surfaces_as_error() {
        let broker = MemoryTransport::new();
        let session = session(&broker, false).await;
        let queue = Destination::queue("Q");
        broker.inject_malformed(&queue, "garbled");

        let result = broker
            .receive(&session, &queue, None, Duration::from_millis(10))
            .await;
        assert!(matches!(result, Err(TransportError::MalformedMessage { .. })));
        assert_eq!(broker.queue_depth(&queue), 0);
    }

    #[tokio::test]
    async fn test_directory_lookups() {
        let broker = MemoryTransport::new();
        broker.bind_service("svc", Destination::queue("SVC.IN"));
        broker.bind_reply("app", Destination::queue("APP.REPLY"));

        assert_eq!(broker.lookup_service("svc").await.unwrap().name(), "SVC.IN");
        assert_eq!(broker.lookup_reply("app").await.unwrap().name(), "APP.REPLY");
        assert_eq!(
            broker.lookup_provider_input("svc").await.unwrap().name(),
            "SVC.IN"
        );
        assert!(matches!(
            broker.lookup_reply("missing").await,
            Err(TransportError::NameNotFound { .. })
        ));
    }
}
