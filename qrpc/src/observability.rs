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

//! Observability support for qrpc.
//!
//! - **[`ConnectionMetrics`]**: connection sharing and physical lifecycle
//! - **[`CorrelationMetrics`]**: rendezvous hand-offs and timeouts
//! - **[`RequestMetrics`]**: requests, replies, reply-queue churn, latency
//! - **[`ProviderMetrics`]**: provider loop throughput and failures
//! - **[`log_error`]**: structured logging of a [`QrpcError`]
//!
//! With the `observability` feature enabled (the default), every counter is
//! also exported through the [`metrics`](https://docs.rs/metrics) facade and
//! components emit `tracing` events. Install any `metrics` recorder and
//! `tracing` subscriber to collect them:
//!
//! ```rust,ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
//!     .init();
//! ```

mod metrics;

pub use self::metrics::{ConnectionMetrics, CorrelationMetrics, ProviderMetrics, RequestMetrics};

use crate::error::QrpcError;

/// Logs an error with its classification as structured fields.
///
/// Timeouts and poison messages are logged at `WARN`, everything else at
/// `ERROR`.
///
/// # Examples
///
/// ```rust
/// use qrpc::QrpcError;
/// use qrpc::observability::log_error;
///
/// log_error(&QrpcError::protocol_violation("released twice"));
/// ```
#[cfg(feature = "observability")]
pub fn log_error(error: &QrpcError) {
    match error {
        QrpcError::CorrelationTimeout { .. }
        | QrpcError::DeliveryTimeout { .. }
        | QrpcError::PoisonMessage { .. }
        | QrpcError::Cancelled { .. } => {
            tracing::warn!(
                error = %error,
                correlation_id = ?error.correlation_id(),
                recoverable = error.is_recoverable(),
                "qrpc operation did not complete"
            );
        }
        _ => {
            tracing::error!(
                error = %error,
                correlation_id = ?error.correlation_id(),
                recoverable = error.is_recoverable(),
                "qrpc operation failed"
            );
        }
    }
}

/// Logs an error with structured context (no-op when observability is disabled).
#[cfg(not(feature = "observability"))]
#[inline]
pub fn log_error(_error: &QrpcError) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_log_error_accepts_every_kind() {
        log_error(&QrpcError::protocol_violation("x"));
        log_error(&QrpcError::CorrelationTimeout {
            correlation_id: "c".into(),
            timeout: Duration::from_millis(1),
        });
        log_error(&QrpcError::Processing("boom".into()));
    }
}
