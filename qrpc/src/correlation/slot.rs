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

//! A single rendezvous slot.
//!
//! Every state transition happens under the slot's own lock and is
//! announced on one of two [`Notify`]s: `delivered` wakes a parked
//! receiver, `claimed` wakes a deliverer waiting for pickup confirmation.
//! Waiters enable their `Notified` future before inspecting the state so a
//! wake-up between the check and the wait is never lost.

use crate::error::{QrpcError, Result};
use parking_lot::Mutex;
use std::fmt;
use tokio::sync::Notify;

/// Observable phase of a rendezvous slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchPhase {
    /// Created, neither side has arrived yet.
    Empty,
    /// A receiver is parked and waiting for a value.
    AwaitingDelivery,
    /// A value is stored and waiting for a receiver.
    AwaitingPickup,
    /// The value was handed over.
    Completed,
    /// One side gave up waiting.
    TimedOut,
    /// The slot was cleared.
    Cancelled,
}

impl fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::AwaitingDelivery => "awaiting-delivery",
            Self::AwaitingPickup => "awaiting-pickup",
            Self::Completed => "completed",
            Self::TimedOut => "timed-out",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

enum MatchState<T> {
    Empty,
    AwaitingDelivery,
    AwaitingPickup(T),
    Completed,
    TimedOut,
    Cancelled(String),
}

impl<T> MatchState<T> {
    fn phase(&self) -> MatchPhase {
        match self {
            Self::Empty => MatchPhase::Empty,
            Self::AwaitingDelivery => MatchPhase::AwaitingDelivery,
            Self::AwaitingPickup(_) => MatchPhase::AwaitingPickup,
            Self::Completed => MatchPhase::Completed,
            Self::TimedOut => MatchPhase::TimedOut,
            Self::Cancelled(_) => MatchPhase::Cancelled,
        }
    }
}

/// Outcome of a receiver arriving at a slot.
#[derive(Debug)]
pub(crate) enum Arrival<T> {
    /// A value was already waiting and is now owned by the receiver.
    Taken(T),
    /// The receiver is registered and must wait on `delivered`.
    Parked,
    /// The slot already finished; the caller needs a fresh one.
    Stale,
}

/// Outcome of a parked receiver checking its slot.
#[derive(Debug)]
pub(crate) enum Pickup<T> {
    Taken(T),
    Waiting,
    /// The deliverer gave up on the value before it was collected.
    Abandoned,
}

/// Outcome of a deliverer offering a value.
#[derive(Debug)]
pub(crate) enum Offer<T> {
    Stored,
    /// The slot already finished; the value is handed back for a fresh slot.
    Stale(T),
}

/// Rendezvous slot for one `(matcher, correlation id)` pair.
///
/// A slot is never reused once it reaches `Completed`, `TimedOut` or
/// `Cancelled`; the router replaces it with a new one.
pub(crate) struct Match<T> {
    correlation_id: String,
    state: Mutex<MatchState<T>>,
    delivered: Notify,
    claimed: Notify,
}

impl<T> Match<T> {
    pub(crate) fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            state: Mutex::new(MatchState::Empty),
            delivered: Notify::new(),
            claimed: Notify::new(),
        }
    }

    pub(crate) fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub(crate) fn phase(&self) -> MatchPhase {
        self.state.lock().phase()
    }

    /// Returns `true` once the slot can never change again.
    pub(crate) fn is_finished(&self) -> bool {
        matches!(
            self.phase(),
            MatchPhase::Completed | MatchPhase::TimedOut | MatchPhase::Cancelled
        )
    }

    pub(crate) fn delivered(&self) -> &Notify {
        &self.delivered
    }

    pub(crate) fn claimed(&self) -> &Notify {
        &self.claimed
    }

    /// Registers a receiver.
    pub(crate) fn arrive(&self) -> Result<Arrival<T>> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, MatchState::Completed) {
            MatchState::Empty => {
                *state = MatchState::AwaitingDelivery;
                Ok(Arrival::Parked)
            }
            MatchState::AwaitingPickup(payload) => {
                drop(state);
                self.claimed.notify_waiters();
                Ok(Arrival::Taken(payload))
            }
            MatchState::AwaitingDelivery => {
                *state = MatchState::AwaitingDelivery;
                Err(QrpcError::protocol_violation(format!(
                    "a receiver is already waiting for correlation id '{}'",
                    self.correlation_id
                )))
            }
            MatchState::Cancelled(reason) => {
                *state = MatchState::Cancelled(reason.clone());
                Err(QrpcError::Cancelled { reason })
            }
            previous @ (MatchState::Completed | MatchState::TimedOut) => {
                *state = previous;
                Ok(Arrival::Stale)
            }
        }
    }

    /// Checks whether a value arrived for a parked receiver.
    pub(crate) fn pickup(&self) -> Result<Pickup<T>> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, MatchState::Completed) {
            MatchState::AwaitingPickup(payload) => {
                drop(state);
                self.claimed.notify_waiters();
                Ok(Pickup::Taken(payload))
            }
            MatchState::Cancelled(reason) => {
                *state = MatchState::Cancelled(reason.clone());
                Err(QrpcError::Cancelled { reason })
            }
            previous @ (MatchState::Empty | MatchState::AwaitingDelivery) => {
                *state = previous;
                Ok(Pickup::Waiting)
            }
            previous @ (MatchState::Completed | MatchState::TimedOut) => {
                *state = previous;
                Ok(Pickup::Abandoned)
            }
        }
    }

    /// Final check of a receiver whose wait expired.
    ///
    /// Returns the value if it landed at the last instant, otherwise marks
    /// the slot timed out.
    pub(crate) fn expire_receiver(&self) -> Result<Option<T>> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, MatchState::TimedOut) {
            MatchState::AwaitingPickup(payload) => {
                *state = MatchState::Completed;
                drop(state);
                self.claimed.notify_waiters();
                Ok(Some(payload))
            }
            MatchState::Cancelled(reason) => {
                *state = MatchState::Cancelled(reason.clone());
                Err(QrpcError::Cancelled { reason })
            }
            MatchState::Completed => {
                *state = MatchState::Completed;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Stores a value and wakes a parked receiver.
    pub(crate) fn offer(&self, payload: T) -> Result<Offer<T>> {
        let mut state = self.state.lock();
        match &*state {
            MatchState::Empty => {
                *state = MatchState::AwaitingPickup(payload);
                Ok(Offer::Stored)
            }
            MatchState::AwaitingDelivery => {
                *state = MatchState::AwaitingPickup(payload);
                drop(state);
                self.delivered.notify_waiters();
                Ok(Offer::Stored)
            }
            MatchState::AwaitingPickup(_) => Err(QrpcError::protocol_violation(format!(
                "a value is already waiting for pickup on correlation id '{}'",
                self.correlation_id
            ))),
            MatchState::Cancelled(reason) => Err(QrpcError::Cancelled {
                reason: reason.clone(),
            }),
            MatchState::Completed | MatchState::TimedOut => Ok(Offer::Stale(payload)),
        }
    }

    /// Returns `true` once a receiver has claimed the stored value.
    pub(crate) fn is_claimed(&self) -> Result<bool> {
        match &*self.state.lock() {
            MatchState::Completed => Ok(true),
            MatchState::Cancelled(reason) => Err(QrpcError::Cancelled {
                reason: reason.clone(),
            }),
            _ => Ok(false),
        }
    }

    /// Final check of a deliverer whose wait expired.
    ///
    /// Returns `true` if the value was claimed at the last instant,
    /// otherwise drops the value and marks the slot timed out.
    pub(crate) fn expire_deliverer(&self) -> Result<bool> {
        let mut state = self.state.lock();
        match &*state {
            MatchState::Completed => Ok(true),
            MatchState::Cancelled(reason) => Err(QrpcError::Cancelled {
                reason: reason.clone(),
            }),
            _ => {
                *state = MatchState::TimedOut;
                Ok(false)
            }
        }
    }

    /// Gives up the slot on behalf of a side that stopped waiting.
    ///
    /// Drops any stored value, marks the slot timed out and wakes the other
    /// side. Returns `false` if the slot had already finished.
    pub(crate) fn abandon(&self) -> bool {
        {
            let mut state = self.state.lock();
            match &*state {
                MatchState::Completed | MatchState::TimedOut | MatchState::Cancelled(_) => {
                    return false;
                }
                _ => *state = MatchState::TimedOut,
            }
        }
        self.delivered.notify_waiters();
        self.claimed.notify_waiters();
        true
    }

    /// Cancels the slot and wakes both sides.
    pub(crate) fn cancel(&self, reason: &str) {
        {
            let mut state = self.state.lock();
            if matches!(*state, MatchState::Completed | MatchState::TimedOut) {
                return;
            }
            *state = MatchState::Cancelled(reason.to_string());
        }
        self.delivered.notify_waiters();
        self.claimed.notify_waiters();
    }
}

impl<T> fmt::Debug for Match<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Match")
            .field("correlation_id", &self.correlation_id)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_then_arrive() {
        let slot = Match::new("c");
        assert!(matches!(slot.offer(7).unwrap(), Offer::Stored));
        assert_eq!(slot.phase(), MatchPhase::AwaitingPickup);
        assert!(matches!(slot.arrive().unwrap(), Arrival::Taken(7)));
        assert!(slot.is_claimed().unwrap());
        assert!(slot.is_finished());
    }

    #[test]
    fn test_arrive_then_deliver() {
        let slot = Match::new("c");
        assert!(matches!(slot.arrive().unwrap(), Arrival::Parked));
        assert!(matches!(slot.pickup().unwrap(), Pickup::Waiting));
        assert!(matches!(slot.offer(1).unwrap(), Offer::Stored));
        assert!(matches!(slot.pickup().unwrap(), Pickup::Taken(1)));
        assert_eq!(slot.phase(), MatchPhase::Completed);
    }

    #[test]
    fn test_second_receiver_and_second_value_rejected() {
        let slot = Match::<u32>::new("c");
        slot.arrive().unwrap();
        assert!(slot.arrive().unwrap_err().is_protocol_violation());

        let slot = Match::new("c");
        slot.offer(1).unwrap();
        assert!(slot.offer(2).unwrap_err().is_protocol_violation());
    }

    #[test]
    fn test_expired_deliverer_drops_value() {
        let slot = Match::new("c");
        slot.offer(1).unwrap();
        assert!(!slot.expire_deliverer().unwrap());
        assert_eq!(slot.phase(), MatchPhase::TimedOut);
        assert!(matches!(slot.arrive().unwrap(), Arrival::Stale));
        assert!(matches!(slot.offer(2).unwrap(), Offer::Stale(2)));
    }

    #[test]
    fn test_expired_receiver_takes_last_instant_value() {
        let slot = Match::new("c");
        slot.arrive().unwrap();
        slot.offer(5).unwrap();
        assert_eq!(slot.expire_receiver().unwrap(), Some(5));
        assert!(slot.expire_deliverer().unwrap());
    }

    #[test]
    fn test_abandon_drops_value_once() {
        let slot = Match::new("c");
        slot.offer(3).unwrap();
        assert!(slot.abandon());
        assert_eq!(slot.phase(), MatchPhase::TimedOut);
        assert!(!slot.abandon());
        assert!(!slot.is_claimed().unwrap());
        assert!(matches!(slot.arrive().unwrap(), Arrival::Stale));

        let slot = Match::<u32>::new("c");
        slot.arrive().unwrap();
        slot.offer(1).unwrap();
        slot.pickup().unwrap();
        assert!(!slot.abandon());
        assert_eq!(slot.phase(), MatchPhase::Completed);
    }

    #[test]
    fn test_cancel_fails_both_sides() {
        let slot = Match::<u32>::new("c");
        slot.arrive().unwrap();
        slot.cancel("shutdown");
        assert!(slot.pickup().unwrap_err().is_cancelled());
        assert!(slot.offer(1).unwrap_err().is_cancelled());
        assert_eq!(slot.phase(), MatchPhase::Cancelled);
    }
}
