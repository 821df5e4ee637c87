//! Per-session publish/subscribe bus
//!
//! Every component of a session publishes its notifications here instead of
//! calling each other directly. Each subscriber owns an unbounded channel, so
//! `publish` never blocks and events reach every subscriber in publish order.
//! Only subscribers registered at publish time see an event; a subscriber that
//! drops its receiver is forgotten on the next publish.

use crate::winner::EndReason;
use log::debug;
use shared::SessionState;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Notifications emitted by the session core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ParticipantRegistered { participant_id: u32 },
    ParticipantUnregistered { participant_id: u32 },
    ParticipantCountChanged { count: usize },
    ScoreChanged { participant_id: u32, score: u32 },
    StateChanged { state: SessionState },
    CountdownUpdate { seconds_remaining: u32 },
    InputEnabled { enabled: bool },
    SettlementStarted { reason: EndReason },
    WinnerDetermined { message: String },
    RestartVoteCounted { participant_id: u32, votes: usize },
    ItemDeactivated { item_id: u32 },
    ItemsReset,
    RelayAvailable,
}

pub type Subscription = UnboundedReceiver<SessionEvent>;

/// Cheaply cloneable handle to one session's subscriber list
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<UnboundedSender<SessionEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: SessionEvent) {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());

        if subscribers.len() != before {
            debug!(
                "Dropped {} closed subscriber(s)",
                before - subscribers.len()
            );
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Drops every subscriber; their receivers observe a closed channel
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<UnboundedSender<SessionEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
