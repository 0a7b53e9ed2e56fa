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

#![doc = include_str!("../../README.md")]
#![allow(clippy::module_inception)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

//! # Architecture
//!
//! qrpc is organized leaf first:
//!
//! - **[`deadline`]**: monotonic deadlines for every bounded wait
//! - **[`transport`]**: the transport and directory seams, message types,
//!   and the in-process [`MemoryTransport`](transport::MemoryTransport)
//! - **[`connection`]**: reference-counted sharing of one physical
//!   connection per endpoint key, and sessions on it
//! - **[`reply`]**: where replies arrive and how long that destination lives
//! - **[`correlation`]**: correlation id selection and the in-process
//!   rendezvous router
//! - **[`client`]**: the request side
//! - **[`provider`]**: the provider receive loop
//! - **[`transaction`]**: who owns the commit
//! - **[`observability`]**: metrics and structured error logging
//!
//! No process-wide state exists. Registries and routers are explicit
//! objects owned by the application and handed to the components that need
//! them.
//!
//! # Example
//!
//! ```rust
//! use qrpc::client::{CallOptions, ClientConfig, RequestReplyClient};
//! use qrpc::connection::ConnectionRegistry;
//! use qrpc::provider::{ProcessContext, ProviderConfig, ServiceProviderLoop, from_fn};
//! use qrpc::transport::{Destination, MemoryTransport};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> qrpc::Result<()> {
//! let broker = MemoryTransport::new();
//! broker.bind_service("echo", Destination::queue("ECHO.IN"));
//! let registry = ConnectionRegistry::new(Arc::new(broker.clone()));
//!
//! let provider = ServiceProviderLoop::new(
//!     registry.clone(),
//!     Arc::new(broker.clone()),
//!     Arc::new(from_fn(|body: Vec<u8>, _context: ProcessContext| async move {
//!         Ok::<_, qrpc::BoxError>(body)
//!     })),
//!     ProviderConfig::new("echo").with_poll_interval(Duration::from_millis(50)),
//! )?
//! .spawn()
//! .await?;
//!
//! let client = RequestReplyClient::new(
//!     registry,
//!     Arc::new(broker.clone()),
//!     ClientConfig::new("caller").with_service_id("echo"),
//! )?;
//! let reply = client.call(b"hello".to_vec(), CallOptions::default()).await?;
//! assert_eq!(reply, b"hello");
//!
//! provider.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod correlation;
pub mod deadline;
pub mod error;
pub mod observability;
pub mod provider;
pub mod reply;
pub mod transaction;
pub mod transport;

pub use client::{CallOptions, ClientConfig, RequestReplyClient};
pub use connection::{Connection, ConnectionRegistry, Session};
pub use correlation::{CorrelationIdSource, CorrelationRouter, Matcher};
pub use deadline::Deadline;
pub use error::{BoxError, QrpcError, Result};
pub use provider::{
    ProcessContext, Processor, ProviderConfig, ProviderHandle, ServiceProviderLoop,
};
pub use reply::{ReplyQueueDescriptor, ReplyQueueManager, ReplyQueueMode};
pub use transport::{Destination, Directory, MemoryTransport, Transport, TransportError};
