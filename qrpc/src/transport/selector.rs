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

//! Message selectors.
//!
//! A selector narrows what a receive call may return. Transports render
//! selectors into their own filter syntax; [`Selector::matches`] gives the
//! reference semantics used by in-process transports.

use super::types::{Message, MessageProtocol};
use std::fmt;

/// Filter applied by a receiver.
///
/// # Examples
///
/// ```rust
/// use qrpc::transport::Selector;
///
/// let selector = Selector::correlation_id("ID:42");
/// assert_eq!(selector.to_string(), "correlation_id = 'ID:42'");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Matches messages whose correlation id equals the value.
    CorrelationId(String),
    /// Matches messages sent with the given protocol.
    Protocol(MessageProtocol),
}

impl Selector {
    /// Creates a correlation-id equality selector.
    #[must_use]
    pub fn correlation_id(id: impl Into<String>) -> Self {
        Self::CorrelationId(id.into())
    }

    /// Returns `true` if `message` passes the filter.
    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        match self {
            Self::CorrelationId(id) => message.correlation_id.as_deref() == Some(id.as_str()),
            Self::Protocol(protocol) => message.protocol == *protocol,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Quotes inside the id are doubled, as in SQL-92 literals.
            Self::CorrelationId(id) => write!(f, "correlation_id = '{}'", id.replace('\'', "''")),
            Self::Protocol(protocol) => write!(f, "protocol = '{}'", protocol.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::types::{MessageId, OutboundMessage};

    fn message(correlation_id: Option<&str>, protocol: MessageProtocol) -> Message {
        let mut outbound = OutboundMessage::request(Vec::new(), protocol);
        outbound.correlation_id = correlation_id.map(str::to_string);
        Message::from_outbound(MessageId::new("ID:1"), outbound)
    }

    #[test]
    fn test_correlation_selector() {
        let selector = Selector::correlation_id("a");
        assert!(selector.matches(&message(Some("a"), MessageProtocol::RequestReply)));
        assert!(!selector.matches(&message(Some("b"), MessageProtocol::RequestReply)));
        assert!(!selector.matches(&message(None, MessageProtocol::RequestReply)));
    }

    #[test]
    fn test_protocol_selector() {
        let selector = Selector::Protocol(MessageProtocol::FireAndForget);
        assert!(selector.matches(&message(None, MessageProtocol::FireAndForget)));
        assert!(!selector.matches(&message(None, MessageProtocol::RequestReply)));
        assert_eq!(selector.to_string(), "protocol = 'FF'");
    }

    #[test]
    fn test_rendering_escapes_quotes() {
        assert_eq!(
            Selector::correlation_id("it's").to_string(),
            "correlation_id = 'it''s'"
        );
    }
}
