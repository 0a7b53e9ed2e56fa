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

//! Shared connections and sessions.
//!
//! Many independent components talk to the same logical endpoint. The
//! [`ConnectionRegistry`] lets them share one physical connection per
//! endpoint key, reference counted so that it is opened by the first
//! acquirer and closed by the last releaser. Work is done on [`Session`]s
//! opened from a [`Connection`] lease.
//!
//! The registry is an explicit object. Create one per application (or per
//! transport) and hand clones to the components that need it.

mod registry;
mod session;

pub use registry::{Connection, ConnectionRegistry};
pub use session::Session;
