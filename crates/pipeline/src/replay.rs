//! Duplicate-delivery detection.
//!
//! [`ReplayGuard`] remembers recently seen [`DeliveryId`]s in a bounded,
//! time-expiring store. Membership test and insertion happen under a single
//! lock, so two concurrent deliveries with the same identifier can never both
//! be admitted.
//!
//! Eviction is best-effort: once an identifier has aged out, or been pushed
//! out by newer deliveries, a resubmission is admitted again.

use std::collections::{HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use crate::{DeliveryId, Timestamp};

/// Default number of identifiers remembered.
pub const DEFAULT_REPLAY_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

/// Default age after which an identifier is forgotten.
pub const DEFAULT_REPLAY_MAX_AGE: Duration = Duration::from_secs(3600);

/// Result of [`ReplayGuard::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First sighting within the window; the identifier is now recorded.
    Admitted,
    /// Already seen within the window.
    Duplicate,
}

/// An enabled guard was given a window that could never reject anything.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Replay window must be longer than zero.")]
pub struct ZeroReplayWindow;

#[derive(Debug, Default)]
struct SeenDeliveries {
    order: VecDeque<(DeliveryId, Timestamp)>,
    members: HashSet<DeliveryId>,
}

impl SeenDeliveries {
    fn expire(&mut self, now: Timestamp, max_age: Duration) {
        while let Some(&(id, seen_at)) = self.order.front() {
            if now.since(seen_at) < max_age {
                break;
            }
            self.order.pop_front();
            self.members.remove(&id);
        }
    }

    fn trim_to(&mut self, capacity: usize) {
        while self.order.len() > capacity {
            if let Some((id, _)) = self.order.pop_front() {
                self.members.remove(&id);
            }
        }
    }
}

/// Bounded, time-expiring record of recently seen delivery identifiers.
#[derive(Debug)]
pub struct ReplayGuard {
    capacity: usize,
    max_age: Duration,
    enabled: bool,
    seen: Mutex<SeenDeliveries>,
}

impl ReplayGuard {
    /// An enabled guard remembering up to `capacity` identifiers for
    /// `max_age` each. A zero `max_age` is refused.
    pub fn new(capacity: NonZeroUsize, max_age: Duration) -> Result<Self, ZeroReplayWindow> {
        if max_age.is_zero() {
            return Err(ZeroReplayWindow);
        }
        Ok(Self::enabled(capacity, max_age))
    }

    fn enabled(capacity: NonZeroUsize, max_age: Duration) -> Self {
        Self {
            capacity: capacity.get(),
            max_age,
            enabled: true,
            seen: Mutex::new(SeenDeliveries::default()),
        }
    }

    /// A guard that admits everything and keeps no state.
    pub fn disabled() -> Self {
        Self {
            capacity: 0,
            max_age: Duration::ZERO,
            enabled: false,
            seen: Mutex::new(SeenDeliveries::default()),
        }
    }

    /// Returns `true` unless the guard was built with [`ReplayGuard::disabled`].
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Records `id` and reports whether it was already present.
    pub fn admit(&self, id: DeliveryId) -> Admission {
        self.admit_at(id, Timestamp::now())
    }

    /// [`ReplayGuard::admit`] with an explicit clock reading.
    ///
    /// A duplicate does not refresh the age of the stored entry.
    pub fn admit_at(&self, id: DeliveryId, now: Timestamp) -> Admission {
        if !self.enabled {
            return Admission::Admitted;
        }

        let mut seen = self.seen.lock();
        seen.expire(now, self.max_age);

        if seen.members.contains(&id) {
            return Admission::Duplicate;
        }

        seen.members.insert(id);
        seen.order.push_back((id, now));
        seen.trim_to(self.capacity);
        Admission::Admitted
    }

    /// Number of identifiers currently remembered.
    pub fn len(&self) -> usize {
        self.seen.lock().order.len()
    }

    /// Returns `true` if no identifier is remembered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::enabled(DEFAULT_REPLAY_CAPACITY, DEFAULT_REPLAY_MAX_AGE)
    }
}
