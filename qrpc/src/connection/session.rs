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

//! Sessions on a shared connection.

use super::registry::Connection;
use crate::error::{QrpcError, Result};
use crate::transport::{
    AckMode, Destination, Message, MessageId, MessageProtocol, OutboundMessage, Selector,
    SessionHandle,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[cfg(feature = "observability")]
use tracing::{debug, warn};

/// A session owned by one caller at a time.
///
/// The session keeps its [`Connection`] lease alive for as long as it
/// exists, but never releases it; the caller that acquired the connection
/// does that after closing the session.
///
/// A session dropped without [`close`](Self::close) is closed on a
/// background task of the current runtime, discarding any uncommitted work.
pub struct Session {
    handle: SessionHandle,
    connection: Connection,
    protocol: MessageProtocol,
    closed: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        handle: SessionHandle,
        connection: Connection,
        protocol: MessageProtocol,
    ) -> Self {
        Self {
            handle,
            connection,
            protocol,
            closed: AtomicBool::new(false),
        }
    }

    /// Transport handle of the session.
    #[must_use]
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Connection the session was opened on.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Protocol the session was opened for.
    #[must_use]
    pub const fn protocol(&self) -> MessageProtocol {
        self.protocol
    }

    /// Whether the session groups its work into local transactions.
    #[must_use]
    pub const fn is_transacted(&self) -> bool {
        self.handle.is_transacted()
    }

    /// Acknowledgement mode of the session.
    #[must_use]
    pub const fn ack_mode(&self) -> AckMode {
        self.handle.ack_mode()
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sends a message on this session.
    ///
    /// # Errors
    ///
    /// Returns [`QrpcError::Transport`] if the transport rejects the send.
    pub async fn send(
        &self,
        destination: &Destination,
        message: OutboundMessage,
    ) -> Result<MessageId> {
        Ok(self
            .connection
            .transport()
            .send(&self.handle, destination, message)
            .await?)
    }

    /// Receives from `source`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`QrpcError::Transport`] if the receive fails, including the
    /// [`MalformedMessage`](crate::transport::TransportError::MalformedMessage)
    /// case where a message was consumed but could not be read.
    pub async fn receive(
        &self,
        source: &Destination,
        selector: Option<&Selector>,
        timeout: Duration,
    ) -> Result<Option<Message>> {
        Ok(self
            .connection
            .transport()
            .receive(&self.handle, source, selector, timeout)
            .await?)
    }

    /// Creates a temporary destination on the session's connection.
    ///
    /// # Errors
    ///
    /// Returns [`QrpcError::Transport`] if the transport cannot create one.
    pub async fn create_temporary_destination(&self) -> Result<Destination> {
        Ok(self
            .connection
            .transport()
            .create_temporary_destination(&self.handle)
            .await?)
    }

    /// Commits the session's local transaction.
    ///
    /// # Errors
    ///
    /// Returns [`QrpcError::TransactionCommit`] if the commit fails.
    pub async fn commit(&self) -> Result<()> {
        self.connection
            .transport()
            .commit(&self.handle)
            .await
            .map_err(|source| QrpcError::TransactionCommit { source })?;

        #[cfg(feature = "observability")]
        debug!(session_id = self.handle.id(), "Session committed");

        Ok(())
    }

    /// Closes the session. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`QrpcError::Transport`] if the transport fails to close it.
    /// The session counts as closed either way.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.connection.session_closed();
        self.connection
            .transport()
            .close_session(&self.handle)
            .await?;

        #[cfg(feature = "observability")]
        debug!(session_id = self.handle.id(), endpoint = %self.connection.key(), "Session closed");

        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connection.session_closed();

        let transport = std::sync::Arc::clone(self.connection.transport());
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(_e) = transport.close_session(&handle).await {
                        #[cfg(feature = "observability")]
                        debug!(session_id = handle.id(), error = %_e, "Dropped session was already gone");
                    }
                });
            }
            Err(_e) => {
                #[cfg(feature = "observability")]
                warn!(session_id = self.handle.id(), "Session dropped outside a runtime; left to the connection close");
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.handle.id())
            .field("endpoint", self.connection.key())
            .field("protocol", &self.protocol)
            .field("transacted", &self.is_transacted())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::connection::ConnectionRegistry;
    use crate::error::QrpcError;
    use crate::transport::{
        AckMode, Destination, MemoryTransport, MessageProtocol, OutboundMessage,
    };
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_transacted_session_commit() {
        let broker = MemoryTransport::new();
        let registry = ConnectionRegistry::new(Arc::new(broker.clone()));
        let connection = registry.acquire("app").await.unwrap();
        let session = connection
            .open_session(MessageProtocol::FireAndForget, true, AckMode::Auto)
            .await
            .unwrap();
        assert!(session.is_transacted());

        let queue = Destination::queue("OUT");
        let outbound = OutboundMessage::request(b"x".to_vec(), MessageProtocol::FireAndForget);
        session.send(&queue, outbound).await.unwrap();
        assert_eq!(broker.queue_depth(&queue), 0);
        session.commit().await.unwrap();
        assert_eq!(broker.queue_depth(&queue), 1);

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(broker.stats().sessions_closed, 1);
        registry.release(&connection).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_failure_is_typed() {
        let broker = MemoryTransport::new();
        let registry = ConnectionRegistry::new(Arc::new(broker.clone()));
        let connection = registry.acquire("app").await.unwrap();
        let session = connection
            .open_session(MessageProtocol::FireAndForget, true, AckMode::Auto)
            .await
            .unwrap();

        broker.fail_next_commits(1);
        let error = session.commit().await.unwrap_err();
        assert!(matches!(error, QrpcError::TransactionCommit { .. }));

        let received = session
            .receive(&Destination::queue("NONE"), None, Duration::from_millis(5))
            .await
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_dropped_session_is_closed() {
        let broker = MemoryTransport::new();
        let registry = ConnectionRegistry::new(Arc::new(broker.clone()));
        let connection = registry.acquire("app").await.unwrap();
        let session = connection
            .open_session(MessageProtocol::FireAndForget, true, AckMode::Auto)
            .await
            .unwrap();
        let queue = Destination::queue("OUT");
        let outbound = OutboundMessage::request(b"x".to_vec(), MessageProtocol::FireAndForget);
        session.send(&queue, outbound).await.unwrap();

        drop(session);
        assert_eq!(connection.open_sessions(), 0);
        while broker.open_sessions() > 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(broker.stats().sessions_closed, 1);
        assert_eq!(broker.queue_depth(&queue), 0);
        registry.release(&connection).await.unwrap();
    }
}
