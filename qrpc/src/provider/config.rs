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

//! Configuration types for service providers.

use crate::transport::{AckMode, MessageProtocol};
use std::fmt;
use std::time::Duration;

/// What the provider loop does when a commit fails.
///
/// A failed session is never committed against again, whatever the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CommitFailurePolicy {
    /// Log a warning, replace the session, and keep going.
    #[default]
    Warn,
    /// Fail the iteration with the commit error and replace the session.
    Fatal,
}

impl CommitFailurePolicy {
    /// Returns the policy name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warn => "warn",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for CommitFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for a [`ServiceProviderLoop`](super::ServiceProviderLoop).
///
/// # Examples
///
/// ```rust
/// use qrpc::provider::{CommitFailurePolicy, ProviderConfig};
/// use qrpc::transport::{AckMode, MessageProtocol};
/// use std::time::Duration;
///
/// let config = ProviderConfig::new("invoices")
///     .with_poll_interval(Duration::from_millis(250))
///     .with_workers(4)
///     .with_commit_failure(CommitFailurePolicy::Fatal);
///
/// assert_eq!(config.protocol, MessageProtocol::RequestReply);
/// assert_eq!(config.session_ack_mode(), AckMode::Client);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProviderConfig {
    /// Endpoint key of the shared connection, also used to look up the
    /// input destination.
    pub application_id: String,

    /// Protocol the provider serves.
    ///
    /// Default: `RequestReply`
    pub protocol: MessageProtocol,

    /// Longest single wait for the next request. Bounds how quickly the loop
    /// notices a stop request.
    ///
    /// Default: 3 seconds
    pub poll_interval: Duration,

    /// Whether sessions are locally transacted.
    ///
    /// Default: None, meaning transacted for fire-and-forget and not for
    /// request-reply
    pub transacted: Option<bool>,

    /// Session acknowledgement mode.
    ///
    /// Default: None, meaning `Client` for request-reply and `Auto` for
    /// fire-and-forget
    pub ack_mode: Option<AckMode>,

    /// Keep one session per worker for the life of the loop instead of
    /// opening one per message.
    ///
    /// Default: true
    pub session_pooling: bool,

    /// Receive only messages of [`protocol`](Self::protocol).
    ///
    /// Default: true
    pub use_protocol_selector: bool,

    /// Reaction to a failed commit.
    ///
    /// Default: `Warn`
    pub commit_failure: CommitFailurePolicy,

    /// Number of concurrent receive loops.
    ///
    /// Default: 1
    pub workers: usize,
}

impl ProviderConfig {
    /// Creates a configuration for `application_id` with default values.
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            protocol: MessageProtocol::RequestReply,
            poll_interval: Duration::from_secs(3),
            transacted: None,
            ack_mode: None,
            session_pooling: true,
            use_protocol_selector: true,
            commit_failure: CommitFailurePolicy::default(),
            workers: 1,
        }
    }

    /// Sets the protocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: MessageProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
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

    /// Enables or disables session pooling.
    #[must_use]
    pub fn with_session_pooling(mut self, enabled: bool) -> Self {
        self.session_pooling = enabled;
        self
    }

    /// Enables or disables the protocol selector.
    #[must_use]
    pub fn with_protocol_selector(mut self, enabled: bool) -> Self {
        self.use_protocol_selector = enabled;
        self
    }

    /// Sets the commit failure policy.
    #[must_use]
    pub fn with_commit_failure(mut self, policy: CommitFailurePolicy) -> Self {
        self.commit_failure = policy;
        self
    }

    /// Sets the number of workers.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Whether provider sessions are transacted.
    #[must_use]
    pub fn session_transacted(&self) -> bool {
        self.transacted
            .unwrap_or_else(|| self.protocol.default_transacted())
    }

    /// Acknowledgement mode of provider sessions.
    #[must_use]
    pub fn session_ack_mode(&self) -> AckMode {
        self.ack_mode.unwrap_or(match self.protocol {
            MessageProtocol::RequestReply => AckMode::Client,
            MessageProtocol::FireAndForget => AckMode::Auto,
        })
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
        if self.poll_interval.is_zero() {
            return Err("poll_interval must be greater than 0".to_string());
        }
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProviderConfig::new("svc");
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert!(config.session_pooling);
        assert!(config.use_protocol_selector);
        assert_eq!(config.commit_failure, CommitFailurePolicy::Warn);
        assert_eq!(config.workers, 1);
        assert!(!config.session_transacted());
        assert_eq!(config.session_ack_mode(), AckMode::Client);
    }

    #[test]
    fn test_fire_and_forget_defaults() {
        let config = ProviderConfig::new("svc").with_protocol(MessageProtocol::FireAndForget);
        assert!(config.session_transacted());
        assert_eq!(config.session_ack_mode(), AckMode::Auto);
        assert_eq!(
            config.with_ack_mode(AckMode::DupsOk).session_ack_mode(),
            AckMode::DupsOk
        );
    }

    #[test]
    fn test_validate() {
        assert!(ProviderConfig::new("svc").validate().is_ok());
        assert!(ProviderConfig::new("").validate().is_err());
        assert!(ProviderConfig::new("svc").with_workers(0).validate().is_err());
        assert!(
            ProviderConfig::new("svc")
                .with_poll_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_policy_serde() {
        let json = serde_json::to_string(&CommitFailurePolicy::Fatal).unwrap();
        assert_eq!(json, "\"Fatal\"");
        let back: CommitFailurePolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CommitFailurePolicy::Fatal);
    }
}
