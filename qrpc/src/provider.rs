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

//! Provider side of qrpc.
//!
//! A [`ServiceProviderLoop`] pulls requests from its input destination,
//! hands each body to a [`Processor`], and for request-reply sends the
//! result to the address carried on the request. Correlation state is never
//! kept here: the reply simply reuses the id found on the request.
//!
//! ```text
//! Idle → Receiving → Processing → Replying → Committing → Idle
//!            │
//!            └→ PoisonDetected → Committing → Idle
//! ```

mod config;
mod context;
mod listener;
mod processor;

pub use config::{CommitFailurePolicy, ProviderConfig};
pub use context::ProcessContext;
pub use listener::{LoopState, ProviderHandle, ServiceProviderLoop};
pub use processor::{FnProcessor, Processor, from_fn};
