use crate::relay::RelaySlot;
use crate::scheduler::Scheduler;
use shared::RelayMessage;

/// Services shared by the components of one session
pub struct SessionContext {
    pub scheduler: Scheduler,
    pub relay: RelaySlot,
    /// Whether the local participant decides transitions
    pub authority: bool,
}

impl SessionContext {
    pub fn new(relay_queue_capacity: usize) -> Self {
        Self {
            scheduler: Scheduler::new(),
            relay: RelaySlot::new(relay_queue_capacity),
            authority: false,
        }
    }

    /// Relays to every other participant when this participant is the
    /// authority; otherwise does nothing
    pub fn broadcast(&mut self, message: RelayMessage) {
        if self.authority {
            self.relay.notify(true, message);
        }
    }
}
