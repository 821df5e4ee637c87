//! Participant roster and scores
//!
//! The registry is the only owner of participant records. It never decides
//! anything about the session; every mutation is reported on the bus:
//! - Registration is idempotent by identity
//! - Participants whose identity is not yet assigned are held as pending and
//!   retried on every check cycle
//! - Entries whose backing handle was dropped are reclaimed only after two
//!   consecutive failed checks, so one transient miss does not flap the count
//! - Readers always receive copies

use crate::bus::{EventBus, SessionEvent};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

/// Consecutive failed liveness checks before an entry is pruned
pub const STALE_CHECK_LIMIT: u8 = 2;

/// Backing object owned by the transport or gameplay layer
///
/// The registry holds only a weak reference. An identity of `0` means the
/// transport has not assigned one yet.
#[derive(Debug)]
pub struct ParticipantHandle {
    identity: AtomicU32,
    display_name: String,
    is_local: bool,
}

impl ParticipantHandle {
    pub fn new(identity: u32, display_name: impl Into<String>, is_local: bool) -> Arc<Self> {
        Arc::new(Self {
            identity: AtomicU32::new(identity),
            display_name: display_name.into(),
            is_local,
        })
    }

    pub fn unassigned(display_name: impl Into<String>, is_local: bool) -> Arc<Self> {
        Self::new(0, display_name, is_local)
    }

    pub fn identity(&self) -> u32 {
        self.identity.load(Ordering::Acquire)
    }

    pub fn assign_identity(&self, identity: u32) {
        self.identity.store(identity, Ordering::Release);
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub participant_id: u32,
    pub display_name: String,
    pub score: u32,
    pub has_authority: bool,
    pub is_local: bool,
}

#[derive(Debug)]
struct Entry {
    participant: Participant,
    handle: Weak<ParticipantHandle>,
    missed_checks: u8,
}

pub struct ParticipantRegistry {
    entries: BTreeMap<u32, Entry>,
    pending: Vec<Weak<ParticipantHandle>>,
    authority_id: Option<u32>,
    bus: EventBus,
}

impl ParticipantRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            entries: BTreeMap::new(),
            pending: Vec::new(),
            authority_id: None,
            bus,
        }
    }

    /// Returns true only when a new participant was inserted
    pub fn register(&mut self, handle: &Arc<ParticipantHandle>) -> bool {
        let participant_id = handle.identity();

        if participant_id == 0 {
            let already_pending = self
                .pending
                .iter()
                .any(|pending| pending.as_ptr() == Arc::as_ptr(handle));
            if !already_pending {
                info!(
                    "Participant '{}' has no identity yet, holding as pending",
                    handle.display_name()
                );
                self.pending.push(Arc::downgrade(handle));
            }
            return false;
        }

        if self.entries.contains_key(&participant_id) {
            debug!("Participant {} already registered", participant_id);
            return false;
        }

        let before = self.entries.len();
        let participant = Participant {
            participant_id,
            display_name: handle.display_name().to_string(),
            score: 0,
            has_authority: self.authority_id == Some(participant_id),
            is_local: handle.is_local(),
        };
        let score = participant.score;

        self.entries.insert(
            participant_id,
            Entry {
                participant,
                handle: Arc::downgrade(handle),
                missed_checks: 0,
            },
        );
        info!(
            "Registered participant {} ('{}')",
            participant_id,
            handle.display_name()
        );

        self.bus
            .publish(SessionEvent::ParticipantRegistered { participant_id });
        if self.entries.len() != before {
            self.bus.publish(SessionEvent::ParticipantCountChanged {
                count: self.entries.len(),
            });
        }
        // Late subscribers converge on the initial score
        self.bus.publish(SessionEvent::ScoreChanged {
            participant_id,
            score,
        });

        true
    }

    pub fn unregister(&mut self, participant_id: u32) -> bool {
        if self.entries.remove(&participant_id).is_none() {
            debug!("Participant {} not registered", participant_id);
            return false;
        }

        info!("Unregistered participant {}", participant_id);
        self.bus
            .publish(SessionEvent::ParticipantUnregistered { participant_id });
        self.bus.publish(SessionEvent::ParticipantCountChanged {
            count: self.entries.len(),
        });
        true
    }

    /// Returns the number of pending participants that were registered
    pub fn resolve_pending_identities(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let mut resolved = 0;

        for weak in pending {
            let Some(handle) = weak.upgrade() else {
                debug!("Pending participant dropped before identity assignment");
                continue;
            };

            if handle.identity() == 0 {
                self.pending.push(weak);
            } else if self.register(&handle) {
                resolved += 1;
            }
        }

        resolved
    }

    /// Returns the ids of pruned participants
    pub fn prune_stale(&mut self) -> Vec<u32> {
        let mut stale = Vec::new();

        for (participant_id, entry) in self.entries.iter_mut() {
            if entry.handle.strong_count() > 0 {
                entry.missed_checks = 0;
                continue;
            }

            entry.missed_checks = entry.missed_checks.saturating_add(1);
            if entry.missed_checks >= STALE_CHECK_LIMIT {
                stale.push(*participant_id);
            } else {
                debug!(
                    "Participant {} unreachable ({}/{})",
                    participant_id, entry.missed_checks, STALE_CHECK_LIMIT
                );
            }
        }

        for participant_id in &stale {
            warn!("Pruning stale participant {}", participant_id);
            self.unregister(*participant_id);
        }

        stale
    }

    /// One check cycle
    pub fn check(&mut self) {
        self.resolve_pending_identities();
        self.prune_stale();
    }

    /// Returns true if the score changed
    pub fn set_score(&mut self, participant_id: u32, score: u32) -> bool {
        let Some(entry) = self.entries.get_mut(&participant_id) else {
            warn!("Score update for unknown participant {}", participant_id);
            return false;
        };

        if entry.participant.score == score {
            return false;
        }

        entry.participant.score = score;
        self.bus.publish(SessionEvent::ScoreChanged {
            participant_id,
            score,
        });
        true
    }

    /// Returns the new score, or None if the participant is unknown
    pub fn add_score(&mut self, participant_id: u32, delta: u32) -> Option<u32> {
        let current = self.entries.get(&participant_id)?.participant.score;
        let score = current.saturating_add(delta);
        self.set_score(participant_id, score);
        Some(score)
    }

    pub fn reset_scores(&mut self) {
        let ids: Vec<u32> = self.entries.keys().copied().collect();
        for participant_id in ids {
            self.set_score(participant_id, 0);
        }
    }

    pub fn set_authority(&mut self, authority_id: Option<u32>) {
        self.authority_id = authority_id;
        for (participant_id, entry) in self.entries.iter_mut() {
            entry.participant.has_authority = Some(*participant_id) == authority_id;
        }
    }

    pub fn authority_id(&self) -> Option<u32> {
        self.authority_id
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn contains(&self, participant_id: u32) -> bool {
        self.entries.contains_key(&participant_id)
    }

    pub fn get(&self, participant_id: u32) -> Option<Participant> {
        self.entries
            .get(&participant_id)
            .map(|entry| entry.participant.clone())
    }

    /// Copy of every participant, ordered by id
    pub fn all(&self) -> Vec<Participant> {
        self.entries
            .values()
            .map(|entry| entry.participant.clone())
            .collect()
    }

    pub fn score_map(&self) -> BTreeMap<u32, u32> {
        self.entries
            .iter()
            .map(|(id, entry)| (*id, entry.participant.score))
            .collect()
    }

    pub fn display_name(&self, participant_id: u32) -> Option<String> {
        self.entries
            .get(&participant_id)
            .map(|entry| entry.participant.display_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Subscription;

    fn registry() -> (ParticipantRegistry, Subscription) {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        (ParticipantRegistry::new(bus), rx)
    }

    fn drain(rx: &mut Subscription) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_register_emits_membership_and_score() {
        let (mut registry, mut rx) = registry();
        let handle = ParticipantHandle::new(1, "alice", true);

        assert!(registry.register(&handle));
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::ParticipantRegistered { participant_id: 1 },
                SessionEvent::ParticipantCountChanged { count: 1 },
                SessionEvent::ScoreChanged {
                    participant_id: 1,
                    score: 0
                },
            ]
        );
    }

    #[test]
    fn test_register_is_idempotent() {
        let (mut registry, mut rx) = registry();
        let handle = ParticipantHandle::new(1, "alice", true);

        assert!(registry.register(&handle));
        assert!(!registry.register(&handle));
        assert_eq!(registry.count(), 1);

        let count_changes = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::ParticipantCountChanged { .. }))
            .count();
        assert_eq!(count_changes, 1);
    }

    #[test]
    fn test_unregister() {
        let (mut registry, mut rx) = registry();
        let handle = ParticipantHandle::new(2, "bob", false);
        registry.register(&handle);
        drain(&mut rx);

        assert!(registry.unregister(2));
        assert!(!registry.unregister(2));
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::ParticipantUnregistered { participant_id: 2 },
                SessionEvent::ParticipantCountChanged { count: 0 },
            ]
        );
    }

    #[test]
    fn test_pending_identity_resolution() {
        let (mut registry, _rx) = registry();
        let handle = ParticipantHandle::unassigned("alice", true);

        assert!(!registry.register(&handle));
        assert!(!registry.register(&handle));
        assert_eq!(registry.pending_count(), 1);
        assert_eq!(registry.count(), 0);

        assert_eq!(registry.resolve_pending_identities(), 0);
        assert_eq!(registry.pending_count(), 1);

        handle.assign_identity(7);
        assert_eq!(registry.resolve_pending_identities(), 1);
        assert_eq!(registry.pending_count(), 0);
        assert!(registry.contains(7));
    }

    #[test]
    fn test_dropped_pending_handle_is_forgotten() {
        let (mut registry, _rx) = registry();
        let handle = ParticipantHandle::unassigned("ghost", false);
        registry.register(&handle);
        drop(handle);

        registry.resolve_pending_identities();
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_prune_requires_two_consecutive_misses() {
        let (mut registry, _rx) = registry();
        let handle = ParticipantHandle::new(3, "carol", false);
        registry.register(&handle);
        drop(handle);

        assert!(registry.prune_stale().is_empty());
        assert_eq!(registry.count(), 1);

        assert_eq!(registry.prune_stale(), vec![3]);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_reachable_handle_resets_miss_counter() {
        let (mut registry, _rx) = registry();
        let handle = ParticipantHandle::new(4, "dave", false);
        registry.register(&handle);

        registry.prune_stale();
        registry.prune_stale();
        registry.prune_stale();
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_score_changes_only_emit_on_change() {
        let (mut registry, mut rx) = registry();
        let handle = ParticipantHandle::new(1, "alice", true);
        registry.register(&handle);
        drain(&mut rx);

        assert_eq!(registry.add_score(1, 2), Some(2));
        assert!(!registry.set_score(1, 2));
        assert_eq!(registry.add_score(99, 1), None);

        assert_eq!(
            drain(&mut rx),
            vec![SessionEvent::ScoreChanged {
                participant_id: 1,
                score: 2
            }]
        );

        registry.reset_scores();
        assert_eq!(registry.score_map().get(&1), Some(&0));
    }

    #[test]
    fn test_all_is_a_copy() {
        let (mut registry, _rx) = registry();
        let handle = ParticipantHandle::new(1, "alice", true);
        registry.register(&handle);

        let mut snapshot = registry.all();
        snapshot[0].score = 100;
        assert_eq!(registry.get(1).map(|p| p.score), Some(0));
    }

    #[test]
    fn test_authority_flag() {
        let (mut registry, _rx) = registry();
        let first = ParticipantHandle::new(1, "alice", true);
        let second = ParticipantHandle::new(2, "bob", false);
        registry.register(&first);
        registry.set_authority(Some(1));
        registry.register(&second);

        let flags: Vec<bool> = registry.all().iter().map(|p| p.has_authority).collect();
        assert_eq!(flags, vec![true, false]);
        assert_eq!(registry.authority_id(), Some(1));
    }
}
