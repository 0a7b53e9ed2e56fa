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

use crate::transport::{Destination, Message, MessageId, MessageProtocol};
use std::time::SystemTime;

/// What a [`Processor`](super::Processor) knows about the request it handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessContext {
    /// Transport id of the request.
    pub message_id: MessageId,
    /// Id the reply will carry.
    pub correlation_id: String,
    /// When the request was sent.
    pub timestamp: SystemTime,
    /// Where the reply goes, for request-reply.
    pub reply_to: Option<Destination>,
    /// Protocol of the request.
    pub protocol: MessageProtocol,
    /// Index of the worker handling the request.
    pub worker: usize,
}

impl ProcessContext {
    pub(crate) fn from_message(message: &Message, worker: usize) -> Self {
        Self {
            message_id: message.id.clone(),
            correlation_id: message.effective_correlation_id().to_string(),
            timestamp: message.timestamp,
            reply_to: message.reply_to.clone(),
            protocol: message.protocol,
            worker,
        }
    }

    /// Returns `true` if the caller waits for a reply.
    #[must_use]
    pub fn expects_reply(&self) -> bool {
        self.protocol.expects_reply()
    }
}
