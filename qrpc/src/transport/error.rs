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

//! Transport layer error types.
//!
//! Transport errors are the lowest level of the error hierarchy. They are
//! what a [`Transport`](super::Transport) or [`Directory`](super::Directory)
//! implementation reports, and they are wrapped into
//! [`QrpcError`](crate::QrpcError) by the components that know what the
//! failed operation meant (opening a connection, looking up a reply queue,
//! committing a session, ...).
//!
//! # Error Categories
//!
//! - **Connection errors**: the broker could not be reached or dropped us
//! - **Naming errors**: a directory lookup or destination did not resolve
//! - **Session errors**: send, receive or commit failed on a session
//! - **Message errors**: an inbound message could not be read

use thiserror::Error;

/// Errors that can occur in the transport layer.
///
/// # Examples
///
/// ```rust
/// use qrpc::transport::TransportError;
///
/// let error = TransportError::ConnectionFailed {
///     endpoint: "svcA".to_string(),
///     reason: "broker unreachable".to_string(),
/// };
/// assert!(error.is_recoverable());
/// assert!(error.should_close_connection());
/// ```
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to open a physical connection to the endpoint.
    #[error("failed to connect to {endpoint}: {reason}")]
    ConnectionFailed {
        /// The endpoint key that failed to open
        endpoint: String,
        /// Description of the failure
        reason: String,
    },

    /// An established connection became unusable.
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// Description of why the connection was lost
        reason: String,
    },

    /// The connection or session handle is not known to the transport.
    ///
    /// Usually means the handle was already closed.
    #[error("unknown {kind} handle {id}")]
    UnknownHandle {
        /// Kind of handle ("connection" or "session")
        kind: &'static str,
        /// The raw handle id
        id: u64,
    },

    /// A directory lookup did not resolve.
    #[error("name '{name}' not bound in directory")]
    NameNotFound {
        /// The name that was looked up
        name: String,
    },

    /// The destination does not exist (or a temporary destination was deleted).
    #[error("destination '{name}' does not exist")]
    DestinationNotFound {
        /// The destination name
        name: String,
    },

    /// A message could not be sent.
    #[error("send to '{destination}' failed: {reason}")]
    SendFailed {
        /// The destination name
        destination: String,
        /// Description of the failure
        reason: String,
    },

    /// A receive call failed for a reason other than an empty poll.
    #[error("receive failed: {reason}")]
    ReceiveFailed {
        /// Description of the failure
        reason: String,
    },

    /// The selector is not supported by this transport.
    #[error("selector '{selector}' rejected: {reason}")]
    InvalidSelector {
        /// The rendered selector expression
        selector: String,
        /// Description of why it was rejected
        reason: String,
    },

    /// Committing a transacted session failed.
    #[error("commit failed: {reason}")]
    CommitFailed {
        /// Description of the failure
        reason: String,
    },

    /// A message was consumed but could not be read.
    ///
    /// The message is gone from the destination. Receivers treat this as a
    /// poison message rather than as a failed receive.
    #[error("malformed message{}: {reason}", message_id.as_deref().map(|id| format!(" {id}")).unwrap_or_default())]
    MalformedMessage {
        /// The transport message id, if it could be read
        message_id: Option<String>,
        /// Description of what was wrong
        reason: String,
    },

    /// The operation is not supported by this transport.
    #[error("operation not supported: {operation}")]
    Unsupported {
        /// Name of the unsupported operation
        operation: String,
    },

    /// Invalid transport configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Description of the configuration error
        reason: String,
    },

    /// The transport has been shut down.
    #[error("transport is closed")]
    Closed,
}

impl TransportError {
    /// Returns `true` if retrying the operation may succeed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use qrpc::transport::TransportError;
    ///
    /// assert!(!TransportError::Closed.is_recoverable());
    /// assert!(TransportError::ConnectionLost { reason: "reset".into() }.is_recoverable());
    /// ```
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::ConnectionLost { .. }
                | Self::SendFailed { .. }
                | Self::ReceiveFailed { .. }
                | Self::CommitFailed { .. }
                | Self::NameNotFound { .. }
        )
    }

    /// Returns `true` if the underlying connection should be considered dead.
    #[must_use]
    pub fn should_close_connection(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::ConnectionLost { .. } | Self::Closed
        )
    }

    /// Returns `true` if this error reports an unreadable inbound message.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedMessage { .. })
    }

    /// Returns `true` if this error reports a rejected selector.
    #[must_use]
    pub const fn is_invalid_selector(&self) -> bool {
        matches!(self, Self::InvalidSelector { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = TransportError::ConnectionFailed {
            endpoint: "svcA".to_string(),
            reason: "refused".to_string(),
        };
        assert_eq!(error.to_string(), "failed to connect to svcA: refused");

        let error = TransportError::DestinationNotFound {
            name: "TEMP.1".to_string(),
        };
        assert_eq!(error.to_string(), "destination 'TEMP.1' does not exist");
    }

    #[test]
    fn test_malformed_display() {
        let with_id = TransportError::MalformedMessage {
            message_id: Some("ID:7".to_string()),
            reason: "bad header".to_string(),
        };
        assert_eq!(with_id.to_string(), "malformed message ID:7: bad header");

        let without_id = TransportError::MalformedMessage {
            message_id: None,
            reason: "truncated".to_string(),
        };
        assert_eq!(without_id.to_string(), "malformed message: truncated");
        assert!(without_id.is_malformed());
    }

    #[test]
    fn test_classification() {
        assert!(TransportError::ConnectionLost { reason: "x".into() }.should_close_connection());
        assert!(!TransportError::CommitFailed { reason: "x".into() }.should_close_connection());
        assert!(TransportError::CommitFailed { reason: "x".into() }.is_recoverable());
        assert!(!TransportError::Unsupported { operation: "x".into() }.is_recoverable());
        assert!(
            TransportError::InvalidSelector {
                selector: "a".into(),
                reason: "b".into()
            }
            .is_invalid_selector()
        );
    }
}
