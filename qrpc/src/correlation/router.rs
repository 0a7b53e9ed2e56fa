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

//! In-process rendezvous between a receiver and a deliverer.

use super::slot::{Arrival, Match, MatchPhase, Offer, Pickup};
use crate::deadline::Deadline;
use crate::error::{QrpcError, Result};
use crate::observability::CorrelationMetrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "observability")]
use tracing::{debug, info, trace};

type SlotKey = (String, String);

struct RouterInner<T> {
    slots: Mutex<HashMap<SlotKey, Arc<Match<T>>>>,
    metrics: Arc<CorrelationMetrics>,
}

/// Matches a waiting receiver to a deliverer by correlation id.
///
/// Slots are keyed by `(matcher, correlation_id)`. A matcher is a logical
/// group of ids, typically one per pipeline stage, that can be cleared as a
/// unit at shutdown. Either side may arrive first:
///
/// - [`receive`](Self::receive) waits up to its timeout for a value
/// - [`deliver`](Self::deliver) stores the value, wakes a parked receiver,
///   and then waits up to its own timeout for confirmation that the value
///   was claimed
///
/// A slot is removed as soon as the hand-off completes or a side gives up,
/// and is never reused. A later call with the same id starts a fresh slot.
///
/// The router is cheap to clone; clones share the same table.
///
/// # Example
///
/// ```rust
/// use qrpc::correlation::CorrelationRouter;
/// use std::time::Duration;
///
/// # async fn example() -> qrpc::Result<()> {
/// let router = CorrelationRouter::<String>::new();
///
/// let receiver = {
///     let router = router.clone();
///     tokio::spawn(async move {
///         router.receive("orders", "corr-1", Duration::from_secs(2)).await
///     })
/// };
///
/// router
///     .deliver("orders", "corr-1", "PAYLOAD".to_string(), Duration::from_secs(2))
///     .await?;
/// assert_eq!(receiver.await.unwrap()?, "PAYLOAD");
/// assert!(router.is_empty());
/// # Ok(())
/// # }
/// ```
pub struct CorrelationRouter<T = Vec<u8>> {
    inner: Arc<RouterInner<T>>,
}

impl<T> Clone for CorrelationRouter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for CorrelationRouter<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CorrelationRouter<T>
where
    T: Send + 'static,
{
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(CorrelationMetrics::new()))
    }

    /// Creates an empty router recording into `metrics`.
    #[must_use]
    pub fn with_metrics(metrics: Arc<CorrelationMetrics>) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                slots: Mutex::new(HashMap::new()),
                metrics,
            }),
        }
    }

    /// Returns a handle bound to one matcher name.
    #[must_use]
    pub fn matcher(&self, name: impl Into<String>) -> Matcher<T> {
        Matcher {
            router: self.clone(),
            name: name.into(),
        }
    }

    /// Waits up to `timeout` for the value delivered under `correlation_id`.
    ///
    /// Dropping the returned future while it waits gives up the slot, so a
    /// later call with the same id starts fresh.
    ///
    /// # Errors
    ///
    /// - [`QrpcError::CorrelationTimeout`] if nothing was delivered in time
    /// - [`QrpcError::ProtocolViolation`] if another receiver is already
    ///   waiting on the same id
    /// - [`QrpcError::Cancelled`] if the matcher is cleared while waiting
    pub async fn receive(&self, matcher: &str, correlation_id: &str, timeout: Duration) -> Result<T> {
        let deadline = Deadline::after(timeout);
        loop {
            let slot = self.slot(matcher, correlation_id);
            match slot.arrive()? {
                Arrival::Taken(payload) => {
                    self.remove(matcher, &slot);
                    self.inner.metrics.record_handoff();
                    return Ok(payload);
                }
                Arrival::Parked => {
                    let guard = WaitGuard::new(self, matcher, &slot);
                    let delivered = self.await_delivery(matcher, &slot, deadline).await;
                    guard.disarm();
                    if let Some(payload) = delivered? {
                        return Ok(payload);
                    }
                }
                Arrival::Stale => self.remove(matcher, &slot),
            }
        }
    }

    /// Hands `payload` to the receiver of `correlation_id`.
    ///
    /// Returns as soon as a receiver confirms it claimed the value. If no
    /// receiver claims it within `timeout`, the value is dropped and a
    /// [`QrpcError::DeliveryTimeout`] is returned so the caller can account
    /// for the lost value. Dropping the future before confirmation also
    /// drops the value; it is counted as cancelled.
    ///
    /// # Errors
    ///
    /// - [`QrpcError::DeliveryTimeout`] if nobody claimed the value in time
    /// - [`QrpcError::ProtocolViolation`] if a value is already waiting for
    ///   pickup on the same id
    /// - [`QrpcError::Cancelled`] if the matcher is cleared while waiting
    pub async fn deliver(
        &self,
        matcher: &str,
        correlation_id: &str,
        payload: T,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Deadline::after(timeout);
        let mut payload = payload;
        loop {
            let slot = self.slot(matcher, correlation_id);
            match slot.offer(payload)? {
                Offer::Stored => {
                    let guard = WaitGuard::new(self, matcher, &slot);
                    let claimed = self.await_pickup(matcher, &slot, deadline).await;
                    guard.disarm();
                    return claimed;
                }
                Offer::Stale(returned) => {
                    payload = returned;
                    self.remove(matcher, &slot);
                }
            }
        }
    }

    /// Removes every slot of `matcher` and fails the calls waiting on them
    /// with [`QrpcError::Cancelled`]. Returns the number of slots removed.
    pub fn clear(&self, matcher: &str) -> usize {
        let cleared: Vec<Arc<Match<T>>> = {
            let mut slots = self.inner.slots.lock();
            let keys: Vec<SlotKey> = slots
                .keys()
                .filter(|(name, _)| name == matcher)
                .cloned()
                .collect();
            keys.iter().filter_map(|key| slots.remove(key)).collect()
        };

        let reason = format!("matcher '{}' was cleared", matcher);
        for slot in &cleared {
            slot.cancel(&reason);
        }
        self.inner.metrics.record_cancelled(cleared.len() as u64);

        #[cfg(feature = "observability")]
        info!(matcher = %matcher, removed = cleared.len(), "Cleared matcher");

        cleared.len()
    }

    /// Number of live slots across all matchers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.slots.lock().len()
    }

    /// Returns `true` if no slot is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.slots.lock().is_empty()
    }

    /// Number of live slots of `matcher`.
    #[must_use]
    pub fn pending_for(&self, matcher: &str) -> usize {
        self.inner
            .slots
            .lock()
            .keys()
            .filter(|(name, _)| name == matcher)
            .count()
    }

    /// Returns `true` if a slot is live for `(matcher, correlation_id)`.
    #[must_use]
    pub fn contains(&self, matcher: &str, correlation_id: &str) -> bool {
        self.inner
            .slots
            .lock()
            .contains_key(&(matcher.to_string(), correlation_id.to_string()))
    }

    /// Phase of the live slot for `(matcher, correlation_id)`, if any.
    #[must_use]
    pub fn phase(&self, matcher: &str, correlation_id: &str) -> Option<MatchPhase> {
        let slot = self
            .inner
            .slots
            .lock()
            .get(&(matcher.to_string(), correlation_id.to_string()))
            .cloned();
        slot.map(|slot| slot.phase())
    }

    /// Rendezvous metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<CorrelationMetrics> {
        &self.inner.metrics
    }

    fn slot(&self, matcher: &str, correlation_id: &str) -> Arc<Match<T>> {
        let mut slots = self.inner.slots.lock();
        let key = (matcher.to_string(), correlation_id.to_string());
        if let Some(slot) = slots.get(&key) {
            return Arc::clone(slot);
        }

        let slot = Arc::new(Match::new(correlation_id));
        slots.insert(key, Arc::clone(&slot));
        self.inner.metrics.record_match_created();

        #[cfg(feature = "observability")]
        trace!(matcher = %matcher, correlation_id = %correlation_id, "Created match");

        slot
    }

    /// Removes `slot` if it is still the live slot for its key.
    fn remove(&self, matcher: &str, slot: &Arc<Match<T>>) {
        let mut slots = self.inner.slots.lock();
        let key = (matcher.to_string(), slot.correlation_id().to_string());
        let is_current = slots
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, slot));
        if is_current {
            slots.remove(&key);
        }
    }

    /// Waits on a parked receiver's slot. `Ok(None)` means the value was
    /// abandoned by its deliverer and the receiver should start over.
    async fn await_delivery(
        &self,
        matcher: &str,
        slot: &Arc<Match<T>>,
        deadline: Deadline,
    ) -> Result<Option<T>> {
        loop {
            let notified = slot.delivered().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match slot.pickup()? {
                Pickup::Taken(payload) => {
                    self.remove(matcher, slot);
                    self.inner.metrics.record_handoff();
                    return Ok(Some(payload));
                }
                Pickup::Abandoned => {
                    self.remove(matcher, slot);
                    return Ok(None);
                }
                Pickup::Waiting => {}
            }

            if tokio::time::timeout_at(deadline.instant(), notified)
                .await
                .is_err()
            {
                let last_instant = slot.expire_receiver()?;
                self.remove(matcher, slot);
                return match last_instant {
                    Some(payload) => {
                        self.inner.metrics.record_handoff();
                        Ok(Some(payload))
                    }
                    None => {
                        self.inner.metrics.record_receive_timeout();

                        #[cfg(feature = "observability")]
                        debug!(
                            matcher = %matcher,
                            correlation_id = %slot.correlation_id(),
                            timeout_ms = deadline.timeout().as_millis() as u64,
                            "Receive timed out"
                        );

                        Err(QrpcError::CorrelationTimeout {
                            correlation_id: slot.correlation_id().to_string(),
                            timeout: deadline.timeout(),
                        })
                    }
                };
            }
        }
    }

    async fn await_pickup(
        &self,
        matcher: &str,
        slot: &Arc<Match<T>>,
        deadline: Deadline,
    ) -> Result<()> {
        loop {
            let notified = slot.claimed().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if slot.is_claimed()? {
                return Ok(());
            }
            // The receiver went away without taking the value.
            if slot.phase() == MatchPhase::TimedOut {
                return Err(self.undelivered(matcher, slot, deadline));
            }

            if tokio::time::timeout_at(deadline.instant(), notified)
                .await
                .is_err()
            {
                if slot.expire_deliverer()? {
                    return Ok(());
                }
                return Err(self.undelivered(matcher, slot, deadline));
            }
        }
    }

    fn undelivered(&self, matcher: &str, slot: &Arc<Match<T>>, deadline: Deadline) -> QrpcError {
        self.remove(matcher, slot);
        self.inner.metrics.record_delivery_timeout();

        #[cfg(feature = "observability")]
        debug!(
            matcher = %matcher,
            correlation_id = %slot.correlation_id(),
            timeout_ms = deadline.timeout().as_millis() as u64,
            "Delivered value was not collected"
        );

        QrpcError::DeliveryTimeout {
            correlation_id: slot.correlation_id().to_string(),
            timeout: deadline.timeout(),
        }
    }
}

/// Gives up a slot when the future waiting on it is dropped.
struct WaitGuard<'a, T>
where
    T: Send + 'static,
{
    router: &'a CorrelationRouter<T>,
    matcher: &'a str,
    slot: &'a Arc<Match<T>>,
    armed: bool,
}

impl<'a, T> WaitGuard<'a, T>
where
    T: Send + 'static,
{
    fn new(router: &'a CorrelationRouter<T>, matcher: &'a str, slot: &'a Arc<Match<T>>) -> Self {
        Self {
            router,
            matcher,
            slot,
            armed: true,
        }
    }

    /// The wait finished on its own and already settled the slot.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T> Drop for WaitGuard<'_, T>
where
    T: Send + 'static,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let abandoned = self.slot.abandon();
        self.router.remove(self.matcher, self.slot);
        if abandoned {
            self.router.inner.metrics.record_cancelled(1);

            #[cfg(feature = "observability")]
            debug!(
                matcher = %self.matcher,
                correlation_id = %self.slot.correlation_id(),
                "Abandoned match after its waiter was dropped"
            );
        }
    }
}

impl<T> std::fmt::Debug for CorrelationRouter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationRouter")
            .field("live", &self.inner.slots.lock().len())
            .finish()
    }
}

/// A [`CorrelationRouter`] handle bound to one matcher name.
///
/// ```rust
/// use qrpc::correlation::CorrelationRouter;
/// use std::time::Duration;
///
/// # async fn example() {
/// let router = CorrelationRouter::<u32>::new();
/// let replies = router.matcher("replies");
///
/// let result = replies.receive("never", Duration::from_millis(10)).await;
/// assert!(result.unwrap_err().is_timeout());
/// assert_eq!(replies.pending(), 0);
/// # }
/// ```
#[derive(Debug)]
pub struct Matcher<T = Vec<u8>> {
    router: CorrelationRouter<T>,
    name: String,
}

impl<T> Clone for Matcher<T> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
            name: self.name.clone(),
        }
    }
}

impl<T> Matcher<T>
where
    T: Send + 'static,
{
    /// Matcher name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Router this matcher belongs to.
    #[must_use]
    pub fn router(&self) -> &CorrelationRouter<T> {
        &self.router
    }

    /// See [`CorrelationRouter::receive`].
    ///
    /// # Errors
    ///
    /// Same as [`CorrelationRouter::receive`].
    pub async fn receive(&self, correlation_id: &str, timeout: Duration) -> Result<T> {
        self.router.receive(&self.name, correlation_id, timeout).await
    }

    /// See [`CorrelationRouter::deliver`].
    ///
    /// # Errors
    ///
    /// Same as [`CorrelationRouter::deliver`].
    pub async fn deliver(&self, correlation_id: &str, payload: T, timeout: Duration) -> Result<()> {
        self.router
            .deliver(&self.name, correlation_id, payload, timeout)
            .await
    }

    /// Clears every slot of this matcher.
    pub fn clear(&self) -> usize {
        self.router.clear(&self.name)
    }

    /// Number of live slots of this matcher.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.router.pending_for(&self.name)
    }
}
