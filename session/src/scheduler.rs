//! Logical-clock timers for the session core
//!
//! The core never sleeps. Waiting is expressed as a named timer with a
//! deadline; the owner of the session advances the clock from its periodic
//! tick and handles each timer as it comes due. Setting a timer that is
//! already pending replaces its deadline.

use log::{debug, trace};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerId {
    CountdownTick,
    SettleDelay,
    SettleTimeout,
    ResolveTick,
    RegistryCheck,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    now: Duration,
    timers: HashMap<TimerId, Duration>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed since the session was created
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn set_timer(&mut self, id: TimerId, delay: Duration) {
        let deadline = self.now + delay;
        if self.timers.insert(id, deadline).is_some() {
            trace!("Timer {:?} re-armed for {:?}", id, delay);
        } else {
            trace!("Timer {:?} set for {:?}", id, delay);
        }
    }

    /// No-op if the timer is not pending
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        let cancelled = self.timers.remove(&id).is_some();
        if cancelled {
            debug!("Timer {:?} cancelled", id);
        }
        cancelled
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn deadline(&self, id: TimerId) -> Option<Duration> {
        self.timers.get(&id).copied()
    }

    /// Removes and returns the earliest timer due at or before `horizon`,
    /// moving the clock to its deadline. Ties fire in `TimerId` order.
    pub fn pop_due(&mut self, horizon: Duration) -> Option<TimerId> {
        let (id, deadline) = self
            .timers
            .iter()
            .filter(|(_, deadline)| **deadline <= horizon)
            .min_by_key(|(id, deadline)| (**deadline, **id))
            .map(|(id, deadline)| (*id, *deadline))?;

        self.timers.remove(&id);
        self.now = self.now.max(deadline);
        Some(id)
    }

    pub fn settle_at(&mut self, horizon: Duration) {
        self.now = self.now.max(horizon);
    }
}
