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

//! Top-level error types for qrpc.
//!
//! [`QrpcError`] is the error taxonomy every public operation returns. It
//! sits on top of [`TransportError`], which is what transport
//! implementations report.
//!
//! # Error Handling Strategy
//!
//! - **Connection errors** → fatal to the single call; retry by acquiring again
//! - **Protocol violations** → programmer error; never retried
//! - **Correlation timeouts** → caller-visible; retried only by caller policy
//! - **Delivery timeouts** → producer-side; the payload was not collected
//! - **Poison messages** → logged and skipped by receive loops
//! - **Commit failures** → logged; fatal to the iteration or a warning, per configuration
//!
//! Timeouts are always errors. A timed-out call never yields an empty body
//! that could be confused with a real, empty reply.
//!
//! # Examples
//!
//! ```rust
//! use qrpc::QrpcError;
//! use std::time::Duration;
//!
//! let error = QrpcError::CorrelationTimeout {
//!     correlation_id: "ID:7".to_string(),
//!     timeout: Duration::from_millis(50),
//! };
//! assert!(error.is_timeout());
//! assert_eq!(error.to_string(), "no reply within timeout for id ID:7");
//! ```

use crate::transport::TransportError;
use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by business processing callbacks.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Top-level error type for qrpc operations.
#[derive(Debug, Error)]
pub enum QrpcError {
    /// A connection could not be opened, or a directory lookup failed.
    ///
    /// Fatal to the single call. Acquiring again may succeed.
    #[error("connection error ({context}): {source}")]
    Connection {
        /// What was being attempted (endpoint key or lookup name)
        context: String,
        /// The transport failure
        #[source]
        source: TransportError,
    },

    /// The API was misused: double release, wrong role or protocol, a second
    /// concurrent receiver for one correlation id, and so on.
    #[error("protocol violation: {reason}")]
    ProtocolViolation {
        /// Description of the misuse
        reason: String,
    },

    /// No reply (or rendezvous value) arrived before the deadline.
    #[error("no reply within timeout for id {correlation_id}")]
    CorrelationTimeout {
        /// Correlation id that was waited on
        correlation_id: String,
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// A delivered value was not collected before the deadline.
    ///
    /// The payload may be considered lost by the caller.
    #[error("value for id {correlation_id} was not collected within {timeout:?}")]
    DeliveryTimeout {
        /// Correlation id the value was delivered for
        correlation_id: String,
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// An inbound message could not be processed.
    #[error("poison message{}: {reason}", message_id.as_deref().map(|id| format!(" {id}")).unwrap_or_default())]
    PoisonMessage {
        /// Transport message id, if it could be read
        message_id: Option<String>,
        /// Why the message was rejected
        reason: String,
    },

    /// Committing a transacted session failed.
    #[error("transaction commit failed: {source}")]
    TransactionCommit {
        /// The transport failure
        #[source]
        source: TransportError,
    },

    /// The provider answered with an error reply.
    #[error("remote failure for id {correlation_id}: {message}")]
    RemoteFailure {
        /// Correlation id of the request
        correlation_id: String,
        /// Error text carried by the reply
        message: String,
    },

    /// A blocking call was released by shutdown rather than by its counterpart.
    #[error("cancelled: {reason}")]
    Cancelled {
        /// What cancelled the call
        reason: String,
    },

    /// The business processing callback failed.
    #[error("processing failed: {0}")]
    Processing(#[source] BoxError),

    /// A transport operation failed outside connection setup.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl QrpcError {
    /// Builds a [`QrpcError::ProtocolViolation`].
    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }

    /// Builds a [`QrpcError::Connection`].
    pub fn connection(context: impl Into<String>, source: TransportError) -> Self {
        Self::Connection {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` for both correlation and delivery timeouts.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::CorrelationTimeout { .. } | Self::DeliveryTimeout { .. }
        )
    }

    /// Returns `true` if this is a [`QrpcError::Connection`].
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Returns `true` if this is a [`QrpcError::ProtocolViolation`].
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }

    /// Returns `true` if this is a [`QrpcError::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns `true` if the same call may succeed when retried.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use qrpc::QrpcError;
    ///
    /// assert!(!QrpcError::protocol_violation("double release").is_recoverable());
    /// ```
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Connection { source, .. } | Self::Transport(source) => source.is_recoverable(),
            Self::CorrelationTimeout { .. } | Self::DeliveryTimeout { .. } => true,
            Self::TransactionCommit { .. } => true,
            Self::ProtocolViolation { .. }
            | Self::PoisonMessage { .. }
            | Self::RemoteFailure { .. }
            | Self::Cancelled { .. }
            | Self::Processing(_) => false,
        }
    }

    /// Correlation id the error refers to, if any.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::CorrelationTimeout { correlation_id, .. }
            | Self::DeliveryTimeout { correlation_id, .. }
            | Self::RemoteFailure { correlation_id, .. } => Some(correlation_id),
            _ => None,
        }
    }
}

/// Result type used throughout qrpc.
pub type Result<T, E = QrpcError> = std::result::Result<T, E>;

/// Combines the result of an operation with the result of a cleanup step
/// that followed it.
///
/// A failing operation keeps its own error and the cleanup error is only
/// logged. A successful operation reports the cleanup error.
pub(crate) fn with_cleanup<T>(result: Result<T>, cleanup: Result<()>, step: &'static str) -> Result<T> {
    match (result, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
        (Err(e), Err(_cleanup)) => {
            #[cfg(feature = "observability")]
            tracing::warn!(step = step, error = %_cleanup, "Cleanup failed after an earlier error");
            #[cfg(not(feature = "observability"))]
            let _ = step;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_distinct_from_delivery_timeout() {
        let receive = QrpcError::CorrelationTimeout {
            correlation_id: "a".into(),
            timeout: Duration::from_millis(1),
        };
        let deliver = QrpcError::DeliveryTimeout {
            correlation_id: "a".into(),
            timeout: Duration::from_millis(1),
        };
        assert!(receive.is_timeout());
        assert!(deliver.is_timeout());
        assert!(matches!(deliver, QrpcError::DeliveryTimeout { .. }));
        assert_eq!(receive.correlation_id(), Some("a"));
    }

    #[test]
    fn test_connection_error_wraps_source() {
        let error = QrpcError::connection(
            "svcA",
            TransportError::ConnectionFailed {
                endpoint: "svcA".into(),
                reason: "refused".into(),
            },
        );
        assert!(error.is_connection_error());
        assert!(error.is_recoverable());
        assert!(error.source().is_some());
        assert_eq!(
            error.to_string(),
            "connection error (svcA): failed to connect to svcA: refused"
        );
    }

    #[test]
    fn test_poison_display() {
        let error = QrpcError::PoisonMessage {
            message_id: Some("ID:1".into()),
            reason: "no reply-to".into(),
        };
        assert_eq!(error.to_string(), "poison message ID:1: no reply-to");
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_from_transport_error() {
        let error: QrpcError = TransportError::Closed.into();
        assert!(matches!(error, QrpcError::Transport(TransportError::Closed)));
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_processing_error() {
        let error = QrpcError::Processing("bad input".into());
        assert_eq!(error.to_string(), "processing failed: bad input");
        assert!(!error.is_timeout());
    }

    #[test]
    fn test_cleanup_error_never_masks_original() {
        let original: Result<()> = Err(QrpcError::protocol_violation("first"));
        let cleanup: Result<()> = Err(QrpcError::protocol_violation("second"));
        let error = with_cleanup(original, cleanup, "test").unwrap_err();
        assert!(error.to_string().contains("first"));

        let cleanup: Result<()> = Err(QrpcError::protocol_violation("second"));
        let error = with_cleanup(Ok(1), cleanup, "test").unwrap_err();
        assert!(error.to_string().contains("second"));
        assert_eq!(with_cleanup(Ok(1), Ok(()), "test").unwrap(), 1);
    }
}
