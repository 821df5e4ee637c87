use crate::bus::{EventBus, SessionEvent};
use log::{debug, info};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumOutcome {
    /// This participant already voted in the current lifecycle
    Duplicate,
    Counted { votes: usize },
    /// Fires once per lifecycle, on the vote that completes the quorum
    QuorumReached,
}

/// Restart votes for one game-over lifecycle
pub struct RestartQuorum {
    votes: BTreeSet<u32>,
    required: usize,
    triggered: bool,
    bus: EventBus,
}

impl RestartQuorum {
    pub fn new(bus: EventBus, required: usize) -> Self {
        Self {
            votes: BTreeSet::new(),
            required,
            triggered: false,
            bus,
        }
    }

    pub fn on_participant_ready(&mut self, participant_id: u32) -> QuorumOutcome {
        if !self.votes.insert(participant_id) {
            debug!("Participant {} already voted to restart", participant_id);
            return QuorumOutcome::Duplicate;
        }

        let votes = self.votes.len();
        info!(
            "Participant {} ready to restart ({}/{})",
            participant_id, votes, self.required
        );
        self.bus.publish(SessionEvent::RestartVoteCounted {
            participant_id,
            votes,
        });

        if votes == self.required && !self.triggered {
            self.triggered = true;
            QuorumOutcome::QuorumReached
        } else {
            QuorumOutcome::Counted { votes }
        }
    }

    pub fn reset(&mut self) {
        if !self.votes.is_empty() {
            debug!("Clearing {} restart vote(s)", self.votes.len());
        }
        self.votes.clear();
        self.triggered = false;
    }

    pub fn votes(&self) -> Vec<u32> {
        self.votes.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}
