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

//! Configuration types for request-reply clients.

use crate::correlation::CorrelationIdSource;
use crate::reply::ReplyQueueMode;
use crate::transport::{AckMode, MessageProtocol};
use std::time::Duration;

/// Configuration for a [`RequestReplyClient`](super::RequestReplyClient).
///
/// # Examples
///
/// ```rust
/// use qrpc::client::ClientConfig;
/// use qrpc::reply::ReplyQueueMode;
/// use qrpc::transport::MessageProtocol;
/// use std::time::Duration;
///
/// let config = ClientConfig::new("billing")
///     .with_service_id("invoices")
///     .with_timeout(Duration::from_secs(5))
///     .with_reply_queue_mode(ReplyQueueMode::Static);
///
/// assert_eq!(config.protocol, MessageProtocol::RequestReply);
/// assert_eq!(config.requester_id, "billing");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientConfig {
    /// Endpoint key of the shared connection.
    pub application_id: String,

    /// Identity static reply queues are looked up under.
    ///
    /// Default: the application id
    pub requester_id: String,

    /// Service [`call`](super::RequestReplyClient::call) sends to.
    ///
    /// Default: None
    pub service_id: Option<String>,

    /// Protocol the client speaks.
    ///
    /// Default: `RequestReply`
    pub protocol: MessageProtocol,

    /// How long to wait for a reply when the call does not override it.
    ///
    /// Default: 20 seconds
    pub timeout: Duration,

    /// Where replies arrive.
    ///
    /// Default: `DynamicShared`
    pub reply_queue_mode: ReplyQueueMode,

    /// Which id correlates a reply with its request.
    ///
    /// Default: `TransportGenerated`
    pub correlation_id_source: CorrelationIdSource,

    /// Whether sessions are locally transacted.
    ///
    /// Default: None, meaning transacted for fire-and-forget and not for
    /// request-reply
    pub transacted: Option<bool>,

    /// Session acknowledgement mode.
    ///
    /// Default: None, meaning `Auto`
    pub ack_mode: Option<AckMode>,

    /// Whether an error reply from the provider fails the call.
    ///
    /// When false the error text is returned as the reply body.
    ///
    /// Default: true
    pub error_replies_as_errors: bool,
}

impl ClientConfig {
    /// Creates a configuration for `application_id` with default values.
    pub fn new(application_id: impl Into<String>) -> Self {
        let application_id = application_id.into();
        Self {
            requester_id: application_id.clone(),
            application_id,
            service_id: None,
            protocol: MessageProtocol::RequestReply,
            timeout: Duration::from_secs(20),
            reply_queue_mode: ReplyQueueMode::default(),
            correlation_id_source: CorrelationIdSource::default(),
            transacted: None,
            ack_mode: None,
            error_replies_as_errors: true,
        }
    }

    /// Sets the requester identity.
    #[must_use]
    pub fn with_requester_id(mut self, requester_id: impl Into<String>) -> Self {
        self.requester_id = requester_id.into();
        self
    }

    /// Sets the default service.
    #[must_use]
    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    /// Sets the protocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: MessageProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the default reply timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the reply queue mode.
    #[must_use]
    pub fn with_reply_queue_mode(mut self, mode: ReplyQueueMode) -> Self {
        self.reply_queue_mode = mode;
        self
    }

    /// Sets the correlation id source.
    #[must_use]
    pub fn with_correlation_id_source(mut self, source: CorrelationIdSource) -> Self {
        self.correlation_id_source = source;
        self
    }

    /// Overrides whether sessions are transacted.
    #[must_use]
    pub fn with_transacted(mut self, transacted: bool) -> Self {
        self.transacted = Some(transacted);
        self
    }

    /// Overrides the acknowledgement mode.
    #[must_use]
    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = Some(ack_mode);
        self
    }

    /// Sets whether error replies fail the call.
    #[must_use]
    pub fn with_error_replies_as_errors(mut self, enabled: bool) -> Self {
        self.error_replies_as_errors = enabled;
        self
    }

    /// Whether sessions opened by the client are transacted.
    #[must_use]
    pub fn session_transacted(&self) -> bool {
        self.transacted
            .unwrap_or_else(|| self.protocol.default_transacted())
    }

    /// Acknowledgement mode of sessions opened by the client.
    #[must_use]
    pub fn session_ack_mode(&self) -> AckMode {
        self.ack_mode.unwrap_or(AckMode::Auto)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.application_id.is_empty() {
            return Err("application_id must not be empty".to_string());
        }
        if self.requester_id.is_empty() {
            return Err("requester_id must not be empty".to_string());
        }
        if self.service_id.as_deref() == Some("") {
            return Err("service_id must not be empty when set".to_string());
        }
        if self.timeout.is_zero() {
            return Err("timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Overrides [`ClientConfig::timeout`] for this call.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    /// Options with an explicit reply timeout.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::new("app");
        assert_eq!(config.requester_id, "app");
        assert_eq!(config.timeout, Duration::from_secs(20));
        assert_eq!(config.reply_queue_mode, ReplyQueueMode::DynamicShared);
        assert_eq!(
            config.correlation_id_source,
            CorrelationIdSource::TransportGenerated
        );
        assert!(config.error_replies_as_errors);
        assert!(!config.session_transacted());
        assert_eq!(config.session_ack_mode(), AckMode::Auto);
    }

    #[test]
    fn test_fire_and_forget_is_transacted_by_default() {
        let config = ClientConfig::new("app").with_protocol(MessageProtocol::FireAndForget);
        assert!(config.session_transacted());
        assert!(!config.with_transacted(false).session_transacted());
    }

    #[test]
    fn test_validate() {
        assert!(ClientConfig::new("").validate().is_err());
        assert!(ClientConfig::new("app").with_requester_id("").validate().is_err());
        assert!(ClientConfig::new("app").with_service_id("").validate().is_err());
        assert!(
            ClientConfig::new("app")
                .with_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_roundtrip() {
        let config = ClientConfig::new("app").with_reply_queue_mode(ReplyQueueMode::Static);
        let json = serde_json::to_string(&config).unwrap();
        let back: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
