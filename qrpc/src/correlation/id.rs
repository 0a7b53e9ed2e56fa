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

//! Correlation id selection.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Where the correlation id of a request comes from.
///
/// Some transports refuse caller-assigned correlation ids. Requests sent
/// through them must be correlated by the message id the transport assigns
/// on send, which the provider copies onto its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CorrelationIdSource {
    /// The client generates an id and sets it on the request.
    CallerAssigned,
    /// The transport's message id of the sent request is the correlation id.
    #[default]
    TransportGenerated,
}

impl CorrelationIdSource {
    /// Returns the source name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CallerAssigned => "caller-assigned",
            Self::TransportGenerated => "transport-generated",
        }
    }
}

impl fmt::Display for CorrelationIdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generates caller-assigned correlation ids.
///
/// Ids are random UUID v4 strings, so they stay unique across processes and
/// restarts. A late reply can never carry an id that is handed out again.
///
/// # Example
///
/// ```rust
/// use qrpc::correlation::CorrelationIdGenerator;
///
/// let generator = CorrelationIdGenerator::new();
/// let first = generator.next_id();
/// let second = generator.next_id();
/// assert_ne!(first, second);
/// assert_eq!(generator.issued(), 2);
/// ```
#[derive(Debug, Default)]
pub struct CorrelationIdGenerator {
    issued: AtomicU64,
}

impl CorrelationIdGenerator {
    /// Creates a new generator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            issued: AtomicU64::new(0),
        }
    }

    /// Generates the next correlation id.
    #[must_use]
    pub fn next_id(&self) -> String {
        self.issued.fetch_add(1, Ordering::Relaxed);
        Uuid::new_v4().to_string()
    }

    /// Number of ids handed out so far.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_default_source_is_transport_generated() {
        assert_eq!(
            CorrelationIdSource::default(),
            CorrelationIdSource::TransportGenerated
        );
        assert_eq!(CorrelationIdSource::CallerAssigned.to_string(), "caller-assigned");
    }

    #[test]
    fn test_ids_parse_as_uuid() {
        let generator = CorrelationIdGenerator::new();
        let id = generator.next_id();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_generator_concurrent() {
        let generator = Arc::new(CorrelationIdGenerator::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let generator = Arc::clone(&generator);
            handles.push(tokio::spawn(async move {
                (0..100).map(|_| generator.next_id()).collect::<Vec<_>>()
            }));
        }

        let mut all_ids = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(all_ids.insert(id.clone()), "Duplicate id: {}", id);
            }
        }

        assert_eq!(all_ids.len(), 1000);
        assert_eq!(generator.issued(), 1000);
    }
}
