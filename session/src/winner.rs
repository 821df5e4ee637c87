//! Winner resolution
//!
//! Runs on the authority only. Once the round ends the engine waits for
//! score updates to settle: every score change re-arms a short settle timer,
//! and a longer timeout forces resolution if no update arrives at all. The
//! result is computed one network tick later from a snapshot, then checked
//! against live scores. Live scores win when the two disagree.
//!
//! Phases: `Idle -> AwaitingSettlement -> Resolving -> Idle`

use crate::bus::{EventBus, SessionEvent};
use crate::registry::ParticipantRegistry;
use crate::scheduler::{Scheduler, TimerId};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    AllItemsCollected,
    EndRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementPhase {
    Idle,
    AwaitingSettlement,
    Resolving,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WinnerOutcome {
    /// None on a draw or when nobody scored
    pub winner_id: Option<u32>,
    pub highest_score: Option<u32>,
    /// Every participant at the highest score, in id order
    pub tied: Vec<u32>,
}

impl WinnerOutcome {
    pub fn is_draw(&self) -> bool {
        self.tied.len() > 1
    }
}

/// Linear scan in id order. A strictly higher score takes the lead and
/// resets the tie set; an equal score joins it.
pub fn determine_winner(scores: &BTreeMap<u32, u32>) -> WinnerOutcome {
    let mut winner_id = None;
    let mut highest: i64 = -1;
    let mut tied = Vec::new();

    for (&participant_id, &score) in scores {
        let score = i64::from(score);
        if score > highest {
            highest = score;
            winner_id = Some(participant_id);
            tied.clear();
            tied.push(participant_id);
        } else if score == highest && highest >= 0 {
            tied.push(participant_id);
        }
    }

    if tied.len() > 1 {
        winner_id = None;
    }

    WinnerOutcome {
        winner_id,
        highest_score: u32::try_from(highest).ok(),
        tied,
    }
}

pub fn describe_outcome(outcome: &WinnerOutcome, registry: &ParticipantRegistry) -> String {
    let name = |participant_id: u32| {
        registry
            .display_name(participant_id)
            .unwrap_or_else(|| format!("Player {}", participant_id))
    };
    let score = outcome.highest_score.unwrap_or(0);

    if outcome.is_draw() {
        let names: Vec<String> = outcome.tied.iter().map(|id| name(*id)).collect();
        format!("It's a draw! {} tied with {} points.", names.join(" and "), score)
    } else if let Some(winner_id) = outcome.winner_id {
        format!("{} wins with {} points!", name(winner_id), score)
    } else {
        "No participants to score.".to_string()
    }
}

pub struct WinnerResolver {
    phase: SettlementPhase,
    round_ended: bool,
    busy: bool,
    snapshot: BTreeMap<u32, u32>,
    settle_delay: Duration,
    settle_timeout: Duration,
    resolve_delay: Duration,
    bus: EventBus,
}

impl WinnerResolver {
    pub fn new(
        bus: EventBus,
        settle_delay: Duration,
        settle_timeout: Duration,
        resolve_delay: Duration,
    ) -> Self {
        Self {
            phase: SettlementPhase::Idle,
            round_ended: false,
            busy: false,
            snapshot: BTreeMap::new(),
            settle_delay,
            settle_timeout,
            resolve_delay,
            bus,
        }
    }

    pub fn phase(&self) -> SettlementPhase {
        self.phase
    }

    /// True from the end of a round until the next restart
    pub fn round_ended(&self) -> bool {
        self.round_ended
    }

    /// Returns false if the end signal was a duplicate
    pub fn begin_settlement(&mut self, reason: EndReason, scheduler: &mut Scheduler) -> bool {
        if self.phase != SettlementPhase::Idle || self.round_ended {
            debug!("Ignoring end signal {:?} in phase {:?}", reason, self.phase);
            return false;
        }

        info!("Round ended ({:?}), waiting for scores to settle", reason);
        self.phase = SettlementPhase::AwaitingSettlement;
        self.round_ended = true;
        scheduler.set_timer(TimerId::SettleTimeout, self.settle_timeout);
        self.bus.publish(SessionEvent::SettlementStarted { reason });
        true
    }

    pub fn on_score_changed(&mut self, scheduler: &mut Scheduler) {
        if self.phase == SettlementPhase::AwaitingSettlement {
            scheduler.set_timer(TimerId::SettleDelay, self.settle_delay);
        }
    }

    /// Returns the result message once a winner has been resolved
    pub fn on_timer(
        &mut self,
        id: TimerId,
        scheduler: &mut Scheduler,
        registry: &ParticipantRegistry,
    ) -> Option<String> {
        match id {
            TimerId::SettleDelay | TimerId::SettleTimeout => {
                if self.phase != SettlementPhase::AwaitingSettlement {
                    return None;
                }
                if id == TimerId::SettleTimeout {
                    warn!(
                        "No score update within {:?}, resolving with known scores",
                        self.settle_timeout
                    );
                }

                scheduler.cancel_timer(TimerId::SettleDelay);
                scheduler.cancel_timer(TimerId::SettleTimeout);
                self.snapshot = registry.score_map();
                self.phase = SettlementPhase::Resolving;
                scheduler.set_timer(TimerId::ResolveTick, self.resolve_delay);
                None
            }
            TimerId::ResolveTick if self.phase == SettlementPhase::Resolving => {
                self.resolve(registry)
            }
            _ => None,
        }
    }

    pub fn resolve(&mut self, registry: &ParticipantRegistry) -> Option<String> {
        if self.busy {
            warn!("Winner resolution already in progress");
            return None;
        }

        self.busy = true;
        let message = self.compute(registry);
        self.busy = false;
        self.phase = SettlementPhase::Idle;

        info!("{}", message);
        self.bus.publish(SessionEvent::WinnerDetermined {
            message: message.clone(),
        });
        Some(message)
    }

    fn compute(&self, registry: &ParticipantRegistry) -> String {
        let cached = determine_winner(&self.snapshot);
        let live_scores = registry.score_map();

        let outcome = if live_scores != self.snapshot {
            warn!(
                "Scores changed while resolving (cached {:?}, live {:?}), using live scores",
                self.snapshot, live_scores
            );
            determine_winner(&live_scores)
        } else {
            cached
        };

        describe_outcome(&outcome, registry)
    }

    pub fn reset(&mut self, scheduler: &mut Scheduler) {
        scheduler.cancel_timer(TimerId::SettleDelay);
        scheduler.cancel_timer(TimerId::SettleTimeout);
        scheduler.cancel_timer(TimerId::ResolveTick);
        self.phase = SettlementPhase::Idle;
        self.round_ended = false;
        self.busy = false;
        self.snapshot.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ParticipantHandle;
    use std::sync::Arc;

    fn scores(pairs: &[(u32, u32)]) -> BTreeMap<u32, u32> {
        pairs.iter().copied().collect()
    }

    struct Fixture {
        bus: EventBus,
        registry: ParticipantRegistry,
        scheduler: Scheduler,
        resolver: WinnerResolver,
        _handles: Vec<Arc<ParticipantHandle>>,
    }

    fn fixture() -> Fixture {
        let bus = EventBus::new();
        let mut registry = ParticipantRegistry::new(bus.clone());
        let handles = vec![
            ParticipantHandle::new(1, "alice", true),
            ParticipantHandle::new(2, "bob", false),
        ];
        for handle in &handles {
            registry.register(handle);
        }

        Fixture {
            resolver: WinnerResolver::new(
                bus.clone(),
                Duration::from_millis(100),
                Duration::from_secs(2),
                Duration::from_millis(50),
            ),
            bus,
            registry,
            scheduler: Scheduler::new(),
            _handles: handles,
        }
    }

    fn run_until(fx: &mut Fixture, horizon: Duration) -> Option<String> {
        let mut message = None;
        while let Some(id) = fx.scheduler.pop_due(horizon) {
            if let Some(m) = fx.resolver.on_timer(id, &mut fx.scheduler, &fx.registry) {
                message = Some(m);
            }
        }
        fx.scheduler.settle_at(horizon);
        message
    }

    #[test]
    fn test_tie_detection() {
        let outcome = determine_winner(&scores(&[(1, 5), (2, 5)]));
        assert_eq!(outcome.winner_id, None);
        assert_eq!(outcome.tied, vec![1, 2]);
        assert_eq!(outcome.highest_score, Some(5));
        assert!(outcome.is_draw());
    }

    #[test]
    fn test_single_winner() {
        let outcome = determine_winner(&scores(&[(1, 5), (2, 3)]));
        assert_eq!(outcome.winner_id, Some(1));
        assert_eq!(outcome.tied, vec![1]);
        assert_eq!(outcome.highest_score, Some(5));
    }

    #[test]
    fn test_later_higher_score_resets_ties() {
        let outcome = determine_winner(&scores(&[(1, 2), (2, 2), (3, 4)]));
        assert_eq!(outcome.winner_id, Some(3));
        assert_eq!(outcome.tied, vec![3]);
    }

    #[test]
    fn test_zero_zero_is_a_draw() {
        let outcome = determine_winner(&scores(&[(1, 0), (2, 0)]));
        assert_eq!(outcome.winner_id, None);
        assert_eq!(outcome.tied, vec![1, 2]);
        assert_eq!(outcome.highest_score, Some(0));
    }

    #[test]
    fn test_no_participants() {
        let outcome = determine_winner(&BTreeMap::new());
        assert_eq!(outcome.winner_id, None);
        assert!(outcome.tied.is_empty());
        assert_eq!(outcome.highest_score, None);
    }

    #[test]
    fn test_messages() {
        let fx = fixture();
        let draw = determine_winner(&scores(&[(1, 5), (2, 5)]));
        assert_eq!(
            describe_outcome(&draw, &fx.registry),
            "It's a draw! alice and bob tied with 5 points."
        );

        let win = determine_winner(&scores(&[(1, 1), (2, 3)]));
        assert_eq!(describe_outcome(&win, &fx.registry), "bob wins with 3 points!");
    }

    #[test]
    fn test_duplicate_end_signal_ignored() {
        let mut fx = fixture();
        assert!(fx
            .resolver
            .begin_settlement(EndReason::EndRequested, &mut fx.scheduler));
        assert!(!fx
            .resolver
            .begin_settlement(EndReason::AllItemsCollected, &mut fx.scheduler));
        assert_eq!(fx.resolver.phase(), SettlementPhase::AwaitingSettlement);
    }

    #[test]
    fn test_settlement_timeout_forces_resolution() {
        let mut fx = fixture();
        let mut rx = fx.bus.subscribe();
        fx.registry.set_score(1, 4);

        fx.resolver
            .begin_settlement(EndReason::EndRequested, &mut fx.scheduler);
        assert_eq!(run_until(&mut fx, Duration::from_millis(1999)), None);

        let message = run_until(&mut fx, Duration::from_millis(2050));
        assert_eq!(message.as_deref(), Some("alice wins with 4 points!"));
        assert_eq!(fx.resolver.phase(), SettlementPhase::Idle);
        assert!(fx.resolver.round_ended());

        let mut determined = false;
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::WinnerDetermined { message } = event {
                assert_eq!(message, "alice wins with 4 points!");
                determined = true;
            }
        }
        assert!(determined);
    }

    #[test]
    fn test_score_changes_rearm_settle_delay() {
        let mut fx = fixture();
        fx.resolver
            .begin_settlement(EndReason::AllItemsCollected, &mut fx.scheduler);

        fx.resolver.on_score_changed(&mut fx.scheduler);
        assert_eq!(run_until(&mut fx, Duration::from_millis(80)), None);
        fx.resolver.on_score_changed(&mut fx.scheduler);
        assert_eq!(run_until(&mut fx, Duration::from_millis(150)), None);
        assert_eq!(fx.resolver.phase(), SettlementPhase::AwaitingSettlement);

        assert_eq!(run_until(&mut fx, Duration::from_millis(180)), None);
        assert_eq!(fx.resolver.phase(), SettlementPhase::Resolving);
        assert!(!fx.scheduler.is_pending(TimerId::SettleTimeout));

        let message = run_until(&mut fx, Duration::from_millis(230));
        assert_eq!(
            message.as_deref(),
            Some("It's a draw! alice and bob tied with 0 points.")
        );
    }

    #[test]
    fn test_live_scores_override_snapshot() {
        let mut fx = fixture();
        fx.registry.set_score(1, 3);
        fx.resolver
            .begin_settlement(EndReason::EndRequested, &mut fx.scheduler);
        fx.resolver.on_score_changed(&mut fx.scheduler);
        run_until(&mut fx, Duration::from_millis(100));
        assert_eq!(fx.resolver.phase(), SettlementPhase::Resolving);

        fx.registry.set_score(2, 9);
        let message = run_until(&mut fx, Duration::from_millis(150));
        assert_eq!(message.as_deref(), Some("bob wins with 9 points!"));
    }

    #[test]
    fn test_busy_flag_blocks_reentrant_resolution() {
        let mut fx = fixture();
        fx.resolver.busy = true;
        assert_eq!(fx.resolver.resolve(&fx.registry), None);

        fx.resolver.busy = false;
        assert!(fx.resolver.resolve(&fx.registry).is_some());
        assert!(!fx.resolver.busy);
    }

    #[test]
    fn test_score_changes_ignored_when_idle() {
        let mut fx = fixture();
        fx.resolver.on_score_changed(&mut fx.scheduler);
        assert!(!fx.scheduler.is_pending(TimerId::SettleDelay));
    }

    #[test]
    fn test_reset_allows_next_round() {
        let mut fx = fixture();
        fx.resolver
            .begin_settlement(EndReason::EndRequested, &mut fx.scheduler);
        fx.resolver.reset(&mut fx.scheduler);

        assert!(!fx.resolver.round_ended());
        assert!(!fx.scheduler.is_pending(TimerId::SettleTimeout));
        assert!(fx
            .resolver
            .begin_settlement(EndReason::EndRequested, &mut fx.scheduler));
    }
}
