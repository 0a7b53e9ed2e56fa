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

//! Reply queue policy.
//!
//! A request-reply caller must tell the provider where to send the reply.
//! [`ReplyQueueMode`] selects one of three policies and
//! [`ReplyQueueManager`] resolves and releases the destination accordingly.

mod manager;

pub use manager::ReplyQueueManager;

use crate::connection::Connection;
use crate::transport::Destination;
use std::fmt;

/// Where replies to a request arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReplyQueueMode {
    /// A pre-provisioned queue looked up by requester identity. Shared by
    /// every requester with that identity.
    Static,
    /// A temporary queue created for one request and deleted afterwards.
    DynamicPerCall,
    /// One temporary queue per connection, created on first use and deleted
    /// when the connection closes.
    #[default]
    DynamicShared,
}

impl ReplyQueueMode {
    /// Returns the mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::DynamicPerCall => "dynamic-per-call",
            Self::DynamicShared => "dynamic-shared",
        }
    }

    /// Returns `true` for modes backed by temporary destinations.
    #[must_use]
    pub const fn is_dynamic(&self) -> bool {
        !matches!(self, Self::Static)
    }
}

impl fmt::Display for ReplyQueueMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved reply destination and the connection it belongs to.
#[derive(Debug, Clone)]
pub struct ReplyQueueDescriptor {
    mode: ReplyQueueMode,
    destination: Destination,
    connection: Connection,
}

impl ReplyQueueDescriptor {
    pub(crate) fn new(mode: ReplyQueueMode, destination: Destination, connection: Connection) -> Self {
        Self {
            mode,
            destination,
            connection,
        }
    }

    /// Policy the destination was resolved under.
    #[must_use]
    pub fn mode(&self) -> ReplyQueueMode {
        self.mode
    }

    /// Destination replies are addressed to.
    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Connection owning the destination.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}
