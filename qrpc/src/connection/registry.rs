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

//! Reference-counted sharing of physical connections per endpoint key.

use super::session::Session;
use crate::error::{QrpcError, Result};
use crate::observability::ConnectionMetrics;
use crate::transport::{
    AckMode, ConnectionHandle, Destination, EndpointKey, MessageProtocol, Transport,
    TransportError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::OnceCell;

#[cfg(feature = "observability")]
use tracing::{debug, info, warn};

/// Per-instance state of one shared connection.
///
/// A slot lives from the first acquire of its key until the release that
/// drops the reference count to zero. A later acquire of the same key gets a
/// fresh slot and therefore a fresh physical connection.
pub(crate) struct ConnectionSlot {
    key: EndpointKey,
    handle: OnceCell<ConnectionHandle>,
    shared_reply_queue: OnceCell<Destination>,
    open_sessions: AtomicUsize,
}

impl ConnectionSlot {
    fn new(key: EndpointKey) -> Self {
        Self {
            key,
            handle: OnceCell::new(),
            shared_reply_queue: OnceCell::new(),
            open_sessions: AtomicUsize::new(0),
        }
    }
}

struct Entry {
    slot: Arc<ConnectionSlot>,
    ref_count: usize,
}

struct RegistryInner {
    transport: Arc<dyn Transport>,
    entries: Mutex<HashMap<EndpointKey, Entry>>,
    metrics: Arc<ConnectionMetrics>,
    next_lease: AtomicU64,
}

/// Maps endpoint keys to reference-counted shared connections.
///
/// The first [`acquire`](Self::acquire) of a key opens the physical
/// connection; later acquires share it. The [`release`](Self::release) that
/// brings the count back to zero closes it and forgets the key. Exactly one
/// physical open and one physical close happen per connection instance no
/// matter how acquires and releases interleave.
///
/// The registry lock is only held to look up or create an entry and to
/// adjust its count. The physical open runs outside that lock, performed by
/// a single winner while concurrent acquirers of the same key wait for its
/// outcome. Acquirers of other keys are never blocked by it.
///
/// The registry is cheap to clone; clones share state.
///
/// # Examples
///
/// ```rust
/// use qrpc::connection::ConnectionRegistry;
/// use qrpc::transport::MemoryTransport;
/// use std::sync::Arc;
///
/// # async fn example() -> qrpc::Result<()> {
/// let broker = MemoryTransport::new();
/// let registry = ConnectionRegistry::new(Arc::new(broker.clone()));
///
/// let first = registry.acquire("svcA").await?;
/// let second = registry.acquire("svcA").await?;
/// assert_eq!(first.handle(), second.handle());
/// assert_eq!(registry.ref_count("svcA"), 2);
///
/// registry.release(&first).await?;
/// registry.release(&second).await?;
/// assert_eq!(broker.stats().opens, 1);
/// assert_eq!(broker.stats().closes, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    /// Creates a registry over a transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                transport,
                entries: Mutex::new(HashMap::new()),
                metrics: Arc::new(ConnectionMetrics::new()),
                next_lease: AtomicU64::new(1),
            }),
        }
    }

    /// Acquires the shared connection for `endpoint`, opening it if needed.
    ///
    /// Dropping the returned future before it completes leaves the reference
    /// count as it was.
    ///
    /// # Errors
    ///
    /// Returns [`QrpcError::Connection`] if the physical open fails. A failed
    /// acquire leaves the reference count unchanged.
    pub async fn acquire(&self, endpoint: impl Into<EndpointKey>) -> Result<Connection> {
        let key = endpoint.into();
        let slot = {
            let mut entries = self.inner.entries.lock();
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
                slot: Arc::new(ConnectionSlot::new(key.clone())),
                ref_count: 0,
            });
            entry.ref_count += 1;
            Arc::clone(&entry.slot)
        };
        let pending = PendingAcquire::new(&self.inner, &slot);

        let transport = &self.inner.transport;
        let metrics = &self.inner.metrics;
        let opened = slot
            .handle
            .get_or_try_init(|| async {
                let handle = transport.open(&key).await?;
                metrics.record_connection_opened();

                #[cfg(feature = "observability")]
                info!(
                    endpoint = %key,
                    connection_id = handle.id(),
                    transport = transport.name(),
                    "Opened shared connection"
                );

                Ok::<_, TransportError>(handle)
            })
            .await;

        match opened {
            Ok(handle) => {
                pending.disarm();
                metrics.record_acquire();
                Ok(Connection {
                    handle: handle.clone(),
                    slot: Arc::clone(&slot),
                    transport: Arc::clone(transport),
                    lease: Arc::new(Lease {
                        id: self.inner.next_lease.fetch_add(1, Ordering::Relaxed),
                        released: AtomicBool::new(false),
                        registry: Arc::clone(&self.inner),
                        slot,
                    }),
                })
            }
            Err(e) => {
                drop(pending);
                metrics.record_open_error();

                #[cfg(feature = "observability")]
                warn!(endpoint = %key, error = %e, "Failed to open shared connection");

                Err(QrpcError::connection(key.to_string(), e))
            }
        }
    }

    /// Releases a connection obtained from [`acquire`](Self::acquire).
    ///
    /// When this is the last outstanding lease, the connection's shared
    /// reply queue (if any) is deleted and the physical connection closed.
    /// A lease whose last clone is dropped unreleased is released the same
    /// way, with the close running on a background task.
    ///
    /// # Errors
    ///
    /// - [`QrpcError::ProtocolViolation`] if the lease was already released,
    ///   or if the connection is no longer registered
    /// - [`QrpcError::Connection`] if the physical close fails; the entry is
    ///   removed regardless
    pub async fn release(&self, connection: &Connection) -> Result<()> {
        if connection.lease.released.swap(true, Ordering::SeqCst) {
            return Err(QrpcError::protocol_violation(format!(
                "connection lease {} for '{}' released more than once",
                connection.lease.id, connection.slot.key
            )));
        }

        let Some(last) = self.inner.decrement(&connection.slot) else {
            return Err(QrpcError::protocol_violation(format!(
                "connection for '{}' released more times than acquired",
                connection.slot.key
            )));
        };
        self.inner.metrics.record_release();

        if last {
            self.inner
                .close_slot(&connection.slot, &connection.handle)
                .await
        } else {
            Ok(())
        }
    }

    /// Current reference count for `endpoint`, zero if unknown.
    #[must_use]
    pub fn ref_count(&self, endpoint: &str) -> usize {
        self.inner
            .entries
            .lock()
            .get(endpoint)
            .map_or(0, |entry| entry.ref_count)
    }

    /// Returns `true` if a physical connection is open for `endpoint`.
    #[must_use]
    pub fn is_open(&self, endpoint: &str) -> bool {
        self.inner
            .entries
            .lock()
            .get(endpoint)
            .is_some_and(|entry| entry.slot.handle.initialized())
    }

    /// Number of registered endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Returns `true` if no endpoint is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    /// Registered endpoint keys.
    #[must_use]
    pub fn endpoints(&self) -> Vec<EndpointKey> {
        self.inner.entries.lock().keys().cloned().collect()
    }

    /// The transport connections are opened on.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Connection metrics for this registry.
    #[must_use]
    pub fn metrics(&self) -> &Arc<ConnectionMetrics> {
        &self.inner.metrics
    }
}

impl RegistryInner {
    /// Drops one reference to `slot`. Returns whether it was the last one,
    /// or `None` if the slot is no longer registered.
    fn decrement(&self, slot: &Arc<ConnectionSlot>) -> Option<bool> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&slot.key)?;
        if !Arc::ptr_eq(&entry.slot, slot) || entry.ref_count == 0 {
            return None;
        }
        entry.ref_count -= 1;
        let last = entry.ref_count == 0;
        if last {
            entries.remove(&slot.key);
        }
        Some(last)
    }

    async fn close_slot(&self, slot: &ConnectionSlot, handle: &ConnectionHandle) -> Result<()> {
        if let Some(queue) = slot.shared_reply_queue.get() {
            if let Err(_e) = self.transport.delete_destination(queue).await {
                #[cfg(feature = "observability")]
                warn!(endpoint = %slot.key, queue = %queue, error = %_e, "Failed to delete shared reply queue");
            }
        }

        #[cfg(feature = "observability")]
        {
            let open_sessions = slot.open_sessions.load(Ordering::SeqCst);
            if open_sessions > 0 {
                warn!(
                    endpoint = %slot.key,
                    open_sessions,
                    "Closing connection with sessions still open"
                );
            }
        }

        match self.transport.close(handle).await {
            Ok(()) => {
                self.metrics.record_connection_closed();

                #[cfg(feature = "observability")]
                info!(endpoint = %slot.key, connection_id = handle.id(), "Closed shared connection");

                Ok(())
            }
            Err(e) => {
                self.metrics.record_close_error();
                Err(QrpcError::connection(slot.key.to_string(), e))
            }
        }
    }

    /// Closes a slot whose last reference went away on a path that cannot
    /// await. Nothing to do if the connection never opened.
    fn close_in_background(self: Arc<Self>, slot: Arc<ConnectionSlot>) {
        let Some(handle) = slot.handle.get().cloned() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(_e) = self.close_slot(&slot, &handle).await {
                        #[cfg(feature = "observability")]
                        warn!(endpoint = %slot.key, error = %_e, "Failed to close abandoned connection");
                    }
                });
            }
            Err(_e) => {
                #[cfg(feature = "observability")]
                warn!(endpoint = %slot.key, "Abandoned connection dropped outside a runtime; left open");
            }
        }
    }
}

/// Undoes an acquire's count increment if the acquire does not finish.
struct PendingAcquire<'a> {
    registry: &'a Arc<RegistryInner>,
    slot: &'a Arc<ConnectionSlot>,
    armed: bool,
}

impl<'a> PendingAcquire<'a> {
    fn new(registry: &'a Arc<RegistryInner>, slot: &'a Arc<ConnectionSlot>) -> Self {
        Self {
            registry,
            slot,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingAcquire<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Another holder may have opened the slot and released in between.
        if self.registry.decrement(self.slot) == Some(true) {
            Arc::clone(self.registry).close_in_background(Arc::clone(self.slot));
        }
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("transport", &self.inner.transport.name())
            .field("endpoints", &self.len())
            .finish()
    }
}

struct Lease {
    id: u64,
    released: AtomicBool,
    registry: Arc<RegistryInner>,
    slot: Arc<ConnectionSlot>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let last = self.registry.decrement(&self.slot);
        self.registry.metrics.record_release();

        #[cfg(feature = "observability")]
        debug!(endpoint = %self.slot.key, lease = self.id, "Connection lease dropped without release");

        if last == Some(true) {
            Arc::clone(&self.registry).close_in_background(Arc::clone(&self.slot));
        }
    }
}

/// A lease on a shared connection.
///
/// Clones share the lease: releasing any clone releases it, and releasing a
/// second clone is a protocol violation. When the last clone of an
/// unreleased lease is dropped, the lease is released in the background.
#[derive(Clone)]
pub struct Connection {
    handle: ConnectionHandle,
    slot: Arc<ConnectionSlot>,
    transport: Arc<dyn Transport>,
    lease: Arc<Lease>,
}

impl Connection {
    /// Endpoint key this connection is shared under.
    #[must_use]
    pub fn key(&self) -> &EndpointKey {
        &self.slot.key
    }

    /// Physical connection handle.
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Id of this lease, unique within the registry.
    #[must_use]
    pub fn lease_id(&self) -> u64 {
        self.lease.id
    }

    /// Returns `true` once this lease has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.lease.released.load(Ordering::SeqCst)
    }

    /// Sessions opened on this connection and not yet closed, across all leases.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.slot.open_sessions.load(Ordering::SeqCst)
    }

    /// Transport the connection belongs to.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Opens a session on this connection.
    ///
    /// # Errors
    ///
    /// Returns [`QrpcError::ProtocolViolation`] on a released lease, or
    /// [`QrpcError::Transport`] if the transport refuses the session.
    pub async fn open_session(
        &self,
        protocol: MessageProtocol,
        transacted: bool,
        ack_mode: AckMode,
    ) -> Result<Session> {
        if self.is_released() {
            return Err(QrpcError::protocol_violation(format!(
                "session requested on released connection lease {}",
                self.lease.id
            )));
        }
        let handle = self
            .transport
            .create_session(&self.handle, transacted, ack_mode)
            .await?;
        self.slot.open_sessions.fetch_add(1, Ordering::SeqCst);

        #[cfg(feature = "observability")]
        debug!(
            endpoint = %self.slot.key,
            session_id = handle.id(),
            protocol = %protocol,
            transacted,
            ack_mode = %ack_mode,
            "Session opened"
        );

        Ok(Session::new(handle, self.clone(), protocol))
    }

    /// The connection-wide shared reply queue cell.
    pub(crate) fn shared_reply_queue(&self) -> &OnceCell<Destination> {
        &self.slot.shared_reply_queue
    }

    pub(crate) fn session_closed(&self) {
        self.slot.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.slot.key)
            .field("connection_id", &self.handle.id())
            .field("lease", &self.lease.id)
            .field("released", &self.is_released())
            .finish()
    }
}
