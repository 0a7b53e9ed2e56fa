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

//! Request side of qrpc.
//!
//! [`RequestReplyClient`] sends a request, tells the provider where to
//! reply, and waits a bounded time for the reply carrying the request's
//! correlation id. A client configured for fire-and-forget only sends.

mod config;
mod requester;

pub use config::{CallOptions, ClientConfig};
pub use requester::RequestReplyClient;
