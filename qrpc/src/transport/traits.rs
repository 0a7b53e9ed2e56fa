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

//! Core transport traits.
//!
//! [`Transport`] is the single polymorphic seam between the correlation
//! layer and a message broker. [`Directory`] resolves logical names into
//! destinations. Both are object safe and are held as `Arc<dyn ...>` by the
//! components that need them.

use super::error::TransportError;
use super::selector::Selector;
use super::types::{
    AckMode, ConnectionHandle, Destination, EndpointKey, Message, MessageId, OutboundMessage,
    SessionHandle,
};
use std::time::Duration;

/// A queue-based message transport.
///
/// Implementations own the physical resources behind the handles they hand
/// out. Callers never open or close connections directly; that is the job of
/// the [`ConnectionRegistry`](crate::connection::ConnectionRegistry).
///
/// # Receive semantics
///
/// [`receive`](Transport::receive) waits at most `timeout` and returns
/// `Ok(None)` when nothing matching arrived. A message that was consumed but
/// cannot be read is reported as [`TransportError::MalformedMessage`].
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Opens a physical connection to an endpoint.
    async fn open(&self, endpoint: &EndpointKey) -> Result<ConnectionHandle, TransportError>;

    /// Closes a physical connection.
    async fn close(&self, connection: &ConnectionHandle) -> Result<(), TransportError>;

    /// Creates a session on a connection.
    async fn create_session(
        &self,
        connection: &ConnectionHandle,
        transacted: bool,
        ack_mode: AckMode,
    ) -> Result<SessionHandle, TransportError>;

    /// Closes a session. Uncommitted work is discarded.
    async fn close_session(&self, session: &SessionHandle) -> Result<(), TransportError>;

    /// Sends a message. Returns the transport-assigned message id.
    async fn send(
        &self,
        session: &SessionHandle,
        destination: &Destination,
        message: OutboundMessage,
    ) -> Result<MessageId, TransportError>;

    /// Receives the next message from `source` that passes `selector`.
    async fn receive(
        &self,
        session: &SessionHandle,
        source: &Destination,
        selector: Option<&Selector>,
        timeout: Duration,
    ) -> Result<Option<Message>, TransportError>;

    /// Creates a temporary destination scoped to the session's connection.
    async fn create_temporary_destination(
        &self,
        session: &SessionHandle,
    ) -> Result<Destination, TransportError>;

    /// Deletes a destination.
    async fn delete_destination(&self, destination: &Destination) -> Result<(), TransportError>;

    /// Commits the local transaction of a transacted session.
    async fn commit(&self, session: &SessionHandle) -> Result<(), TransportError>;

    /// Whether senders may set their own correlation ids.
    ///
    /// Some brokers overwrite or reject caller-assigned correlation ids; such
    /// transports return `false` and requests must be correlated on the
    /// transport-generated message id instead.
    fn supports_caller_correlation_ids(&self) -> bool {
        true
    }
}

/// Directory (naming) lookups for service and reply destinations.
#[async_trait::async_trait]
pub trait Directory: Send + Sync + 'static {
    /// Resolves the request destination of a service.
    async fn lookup_service(&self, service_id: &str) -> Result<Destination, TransportError>;

    /// Reply timeout the directory advertises for a service, if any.
    ///
    /// Callers fall back to it when a call sets no timeout of its own.
    /// Defaults to `None`.
    async fn lookup_service_timeout(
        &self,
        service_id: &str,
    ) -> Result<Option<Duration>, TransportError> {
        let _ = service_id;
        Ok(None)
    }

    /// Resolves the static reply destination of a requester.
    async fn lookup_reply(&self, requester_id: &str) -> Result<Destination, TransportError>;

    /// Resolves the destination a provider listens on.
    ///
    /// Defaults to [`lookup_service`](Directory::lookup_service).
    async fn lookup_provider_input(
        &self,
        application_id: &str,
    ) -> Result<Destination, TransportError> {
        self.lookup_service(application_id).await
    }
}
