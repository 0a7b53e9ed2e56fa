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

//! Transport abstraction layer for qrpc.
//!
//! This module defines the seam between the correlation layer and a queue
//! broker. Everything above it (connection sharing, reply queues, request
//! correlation, provider loops) is written against the [`Transport`] and
//! [`Directory`] traits only.
//!
//! # Available Transports
//!
//! - [`MemoryTransport`]: an in-process broker, used for tests and for
//!   wiring components of one process through queues
//!
//! Other brokers are integrated by implementing [`Transport`] (and usually
//! [`Directory`]) for a client of that broker.
//!
//! # Selectors
//!
//! Receivers filter with a [`Selector`]. Reply receivers on shared queues
//! filter by correlation id; provider receivers may filter by protocol.

mod error;
mod memory;
mod selector;
mod traits;
mod types;

pub use error::TransportError;
pub use memory::{MemoryTransport, MemoryTransportStats};
pub use selector::Selector;
pub use traits::{Directory, Transport};
pub use types::{
    AckMode, ConnectionHandle, Destination, EndpointKey, Message, MessageId, MessageKind,
    MessageProtocol, OutboundMessage, SessionHandle,
};
