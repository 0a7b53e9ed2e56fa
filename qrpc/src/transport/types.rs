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

//! Value types exchanged with a transport.

use std::borrow::Borrow;
use std::fmt;
use std::time::SystemTime;

/// Key identifying a logical endpoint (an application or service id).
///
/// Connections are shared per endpoint key by the
/// [`ConnectionRegistry`](crate::connection::ConnectionRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EndpointKey(String);

impl EndpointKey {
    /// Creates an endpoint key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for EndpointKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EndpointKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for EndpointKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Opaque handle to a physical connection owned by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    id: u64,
    endpoint: EndpointKey,
}

impl ConnectionHandle {
    /// Creates a handle. Called by transport implementations.
    #[must_use]
    pub fn new(id: u64, endpoint: EndpointKey) -> Self {
        Self { id, endpoint }
    }

    /// Transport-assigned connection id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Endpoint this connection was opened for.
    #[must_use]
    pub fn endpoint(&self) -> &EndpointKey {
        &self.endpoint
    }
}

/// Opaque handle to a session created on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: u64,
    connection_id: u64,
    transacted: bool,
    ack_mode: AckMode,
}

impl SessionHandle {
    /// Creates a handle. Called by transport implementations.
    #[must_use]
    pub const fn new(id: u64, connection_id: u64, transacted: bool, ack_mode: AckMode) -> Self {
        Self {
            id,
            connection_id,
            transacted,
            ack_mode,
        }
    }

    /// Transport-assigned session id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Id of the connection the session belongs to.
    #[must_use]
    pub const fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Whether sends and receives on this session are grouped into local transactions.
    #[must_use]
    pub const fn is_transacted(&self) -> bool {
        self.transacted
    }

    /// Acknowledgement mode of the session.
    #[must_use]
    pub const fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }
}

/// Acknowledgement mode for a non-transacted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AckMode {
    /// Messages are acknowledged as soon as they are received.
    #[default]
    Auto,
    /// The receiver acknowledges explicitly.
    Client,
    /// Lazy acknowledgement; duplicates are tolerated.
    DupsOk,
}

impl AckMode {
    /// Returns the mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Client => "client",
            Self::DupsOk => "dups_ok",
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messaging protocol of a session or message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MessageProtocol {
    /// No reply is expected.
    FireAndForget,
    /// The sender blocks for exactly one reply.
    #[default]
    RequestReply,
}

impl MessageProtocol {
    /// Returns the short protocol name ("FF" or "RR").
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FireAndForget => "FF",
            Self::RequestReply => "RR",
        }
    }

    /// Returns `true` for [`MessageProtocol::RequestReply`].
    #[must_use]
    pub const fn expects_reply(&self) -> bool {
        matches!(self, Self::RequestReply)
    }

    /// Default transaction mode for sessions of this protocol.
    ///
    /// Fire-and-forget sessions are transacted so the send and any receive
    /// commit together. Request-reply sessions are not.
    #[must_use]
    pub const fn default_transacted(&self) -> bool {
        matches!(self, Self::FireAndForget)
    }
}

impl fmt::Display for MessageProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queue or temporary destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Destination {
    name: String,
    temporary: bool,
}

impl Destination {
    /// A named, pre-provisioned queue.
    #[must_use]
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            temporary: false,
        }
    }

    /// A temporary destination created by a transport.
    #[must_use]
    pub fn temporary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            temporary: true,
        }
    }

    /// Destination name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if the destination was created on demand.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        self.temporary
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Transport-assigned message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MessageId(String);

impl MessageId {
    /// Creates a message id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the id, returning the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a message is, from the correlation layer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MessageKind {
    /// A request sent by a client.
    #[default]
    Request,
    /// A normal reply.
    Reply,
    /// A reply reporting that the provider failed to produce a result.
    ErrorReply,
    /// A reply reporting that the service gave up before producing a result.
    TimeoutReply,
}

/// A message about to be sent.
///
/// # Examples
///
/// ```rust
/// use qrpc::transport::{Destination, MessageProtocol, OutboundMessage};
///
/// let request = OutboundMessage::request(b"ping".to_vec(), MessageProtocol::RequestReply)
///     .with_reply_to(Destination::queue("REPLY.Q"))
///     .with_correlation_id("c-1");
/// assert_eq!(request.correlation_id.as_deref(), Some("c-1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Payload bytes
    pub body: Vec<u8>,
    /// Correlation id; `None` lets the reply side fall back to the message id
    pub correlation_id: Option<String>,
    /// Where the provider should send the reply
    pub reply_to: Option<Destination>,
    /// When the transport may discard the message
    pub expiration: Option<SystemTime>,
    /// Request, reply or error reply
    pub kind: MessageKind,
    /// Protocol the message belongs to
    pub protocol: MessageProtocol,
}

impl OutboundMessage {
    /// Creates a request message.
    #[must_use]
    pub fn request(body: Vec<u8>, protocol: MessageProtocol) -> Self {
        Self {
            body,
            correlation_id: None,
            reply_to: None,
            expiration: None,
            kind: MessageKind::Request,
            protocol,
        }
    }

    /// Creates a reply correlated to `correlation_id`.
    #[must_use]
    pub fn reply(body: Vec<u8>, correlation_id: impl Into<String>) -> Self {
        Self {
            body,
            correlation_id: Some(correlation_id.into()),
            reply_to: None,
            expiration: None,
            kind: MessageKind::Reply,
            protocol: MessageProtocol::RequestReply,
        }
    }

    /// Creates an error reply correlated to `correlation_id`.
    #[must_use]
    pub fn error_reply(reason: &str, correlation_id: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::ErrorReply,
            ..Self::reply(reason.as_bytes().to_vec(), correlation_id)
        }
    }

    /// Creates a reply telling the requester that `correlation_id` timed out
    /// on the service side.
    #[must_use]
    pub fn timeout_reply(correlation_id: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::TimeoutReply,
            ..Self::reply(Vec::new(), correlation_id)
        }
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the reply-to destination.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: Destination) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    /// Sets the expiration time.
    #[must_use]
    pub fn with_expiration(mut self, expiration: Option<SystemTime>) -> Self {
        self.expiration = expiration;
        self
    }
}

/// A message received from a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Transport-assigned id
    pub id: MessageId,
    /// Correlation id, if the sender set one
    pub correlation_id: Option<String>,
    /// Reply address carried by a request
    pub reply_to: Option<Destination>,
    /// Payload bytes
    pub body: Vec<u8>,
    /// When the message was sent
    pub timestamp: SystemTime,
    /// When the transport may discard the message
    pub expiration: Option<SystemTime>,
    /// Request, reply or error reply
    pub kind: MessageKind,
    /// Protocol the message belongs to
    pub protocol: MessageProtocol,
}

impl Message {
    /// Builds the received form of an outbound message.
    #[must_use]
    pub fn from_outbound(id: MessageId, outbound: OutboundMessage) -> Self {
        Self {
            id,
            correlation_id: outbound.correlation_id,
            reply_to: outbound.reply_to,
            body: outbound.body,
            timestamp: SystemTime::now(),
            expiration: outbound.expiration,
            kind: outbound.kind,
            protocol: outbound.protocol,
        }
    }

    /// The id a reply to this message must carry.
    ///
    /// This is the correlation id when the sender set one, otherwise the
    /// message id.
    #[must_use]
    pub fn effective_correlation_id(&self) -> &str {
        self.correlation_id.as_deref().unwrap_or(self.id.as_str())
    }

    /// Returns `true` if the message expired before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expiration.is_some_and(|at| at <= now)
    }
}
