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

//! Correlation of requests and replies.
//!
//! - [`CorrelationIdSource`] and [`CorrelationIdGenerator`] decide which id
//!   links a reply to its request.
//! - [`CorrelationRouter`] is a transport-independent rendezvous: one task
//!   waits for a value under a correlation id while another delivers it,
//!   with a bounded wait on both sides.

mod id;
mod router;
mod slot;

pub use id::{CorrelationIdGenerator, CorrelationIdSource};
pub use router::{CorrelationRouter, Matcher};
pub use slot::MatchPhase;
