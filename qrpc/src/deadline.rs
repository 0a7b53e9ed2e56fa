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

//! Monotonic deadlines.

use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// Longest wait a deadline represents. Larger timeouts are clamped to it.
pub const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A point on the monotonic clock after which a blocking call gives up.
///
/// Built on [`tokio::time::Instant`], so paused test clocks apply.
///
/// # Examples
///
/// ```rust
/// use qrpc::Deadline;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let deadline = Deadline::after(Duration::from_secs(5));
/// assert!(!deadline.is_expired());
/// assert!(deadline.remaining() <= Duration::from_secs(5));
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    at: Instant,
    timeout: Duration,
}

impl Deadline {
    /// A deadline `timeout` from now.
    ///
    /// Timeouts beyond [`FAR_FUTURE`] wait for [`FAR_FUTURE`] instead of
    /// overflowing the clock.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            at: now.checked_add(timeout.min(FAR_FUTURE)).unwrap_or(now),
            timeout,
        }
    }

    /// The instant the deadline expires.
    #[must_use]
    pub const fn instant(&self) -> Instant {
        self.at
    }

    /// The timeout the deadline was created from.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left, saturating at zero.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Returns `true` once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Wall-clock expiration to stamp on messages that should not outlive the deadline.
    #[must_use]
    pub fn wall_clock(&self) -> SystemTime {
        let now = SystemTime::now();
        now.checked_add(self.remaining()).unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry() {
        let deadline = Deadline::after(Duration::from_millis(100));
        assert_eq!(deadline.timeout(), Duration::from_millis(100));
        assert!(!deadline.is_expired());

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(deadline.remaining(), Duration::from_millis(40));

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_huge_timeout_is_clamped() {
        let deadline = Deadline::after(Duration::MAX);
        assert_eq!(deadline.timeout(), Duration::MAX);
        assert!(!deadline.is_expired());
        assert!(deadline.remaining() <= FAR_FUTURE);
        assert!(deadline.remaining() > FAR_FUTURE - Duration::from_secs(60));
        assert!(deadline.wall_clock() > SystemTime::now());
    }

    #[tokio::test]
    async fn test_zero_timeout_is_already_expired() {
        assert!(Deadline::after(Duration::ZERO).is_expired());
    }
}
