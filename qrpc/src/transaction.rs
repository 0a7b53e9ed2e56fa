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

//! Transaction boundary detection.
//!
//! qrpc commits only local session transactions. When the surrounding code
//! runs inside a distributed transaction, the transaction manager owns the
//! commit and qrpc must leave the session alone. [`TransactionContext`] is
//! how the surrounding system tells qrpc which case applies.

use crate::connection::Session;

/// Reports whether a distributed transaction is active for the current call.
///
/// # Examples
///
/// ```rust
/// use qrpc::transaction::TransactionContext;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// struct Flag(AtomicBool);
///
/// impl TransactionContext for Flag {
///     fn in_distributed_transaction(&self) -> bool {
///         self.0.load(Ordering::SeqCst)
///     }
/// }
/// ```
pub trait TransactionContext: Send + Sync + 'static {
    /// Returns `true` while a distributed transaction is active.
    fn in_distributed_transaction(&self) -> bool;
}

/// Context for code that never runs inside a distributed transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDistributedTransaction;

impl TransactionContext for NoDistributedTransaction {
    fn in_distributed_transaction(&self) -> bool {
        false
    }
}

/// Returns `true` if qrpc itself must commit `session`.
///
/// That is the case when the session is locally transacted and no
/// distributed transaction is active.
#[must_use]
pub fn owns_commit(session: &Session, context: &dyn TransactionContext) -> bool {
    session.is_transacted() && !context.in_distributed_transaction()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionRegistry;
    use crate::transport::{AckMode, MemoryTransport, MessageProtocol};
    use std::sync::Arc;

    struct Always;

    impl TransactionContext for Always {
        fn in_distributed_transaction(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_owns_commit() {
        let registry = ConnectionRegistry::new(Arc::new(MemoryTransport::new()));
        let connection = registry.acquire("app").await.unwrap();

        let transacted = connection
            .open_session(MessageProtocol::FireAndForget, true, AckMode::Auto)
            .await
            .unwrap();
        let plain = connection
            .open_session(MessageProtocol::RequestReply, false, AckMode::Auto)
            .await
            .unwrap();

        assert!(owns_commit(&transacted, &NoDistributedTransaction));
        assert!(!owns_commit(&transacted, &Always));
        assert!(!owns_commit(&plain, &NoDistributedTransaction));

        transacted.close().await.unwrap();
        plain.close().await.unwrap();
        registry.release(&connection).await.unwrap();
    }
}
