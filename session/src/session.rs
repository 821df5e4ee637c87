//! Composition root for one participant's view of a session
//!
//! `Session` builds every core component around a single per-session bus and
//! is the only object the transport, presentation and gameplay layers talk
//! to. Every entry point ends by pumping the internal subscription, so the
//! notifications it caused are routed to the other components before the
//! call returns.

use crate::bus::{EventBus, SessionEvent, Subscription};
use crate::config::SessionConfig;
use crate::context::SessionContext;
use crate::items::{Collection, ItemProgress};
use crate::machine::StateMachine;
use crate::quorum::{QuorumOutcome, RestartQuorum};
use crate::registry::{ParticipantHandle, ParticipantRegistry};
use crate::relay::SyncRelay;
use crate::scheduler::TimerId;
use crate::winner::{EndReason, SettlementPhase, WinnerResolver};
use log::{debug, info, warn};
use shared::{RelayMessage, SessionState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct Session {
    config: SessionConfig,
    bus: EventBus,
    inbox: Subscription,
    ctx: SessionContext,
    registry: ParticipantRegistry,
    items: ItemProgress,
    winner: WinnerResolver,
    quorum: RestartQuorum,
    machine: StateMachine,
    /// Handles created by `on_participant_joined`, owned here until
    /// `on_participant_left`. Handles passed to `on_participant_spawned` stay
    /// with the caller and are only weakly referenced by the registry.
    remotes: HashMap<u32, Arc<ParticipantHandle>>,
    local: Option<Arc<ParticipantHandle>>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let bus = EventBus::new();
        let inbox = bus.subscribe();
        let mut ctx = SessionContext::new(config.relay_queue_capacity);
        ctx.scheduler
            .set_timer(TimerId::RegistryCheck, config.registry_check_interval);

        Self {
            registry: ParticipantRegistry::new(bus.clone()),
            items: ItemProgress::new(config.total_items),
            winner: WinnerResolver::new(
                bus.clone(),
                config.settle_delay,
                config.settle_timeout,
                config.network_tick,
            ),
            quorum: RestartQuorum::new(bus.clone(), config.required_participants),
            machine: StateMachine::new(
                bus.clone(),
                config.required_participants,
                config.countdown_ticks,
                config.countdown_interval,
            ),
            remotes: HashMap::new(),
            local: None,
            config,
            bus,
            inbox,
            ctx,
        }
    }

    /// Presentation-side subscription to every session notification
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn input_enabled(&self) -> bool {
        self.machine.input_enabled()
    }

    pub fn has_authority(&self) -> bool {
        self.ctx.authority
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn items(&self) -> &ItemProgress {
        &self.items
    }

    pub fn restart_votes(&self) -> Vec<u32> {
        self.quorum.votes()
    }

    pub fn settlement_phase(&self) -> SettlementPhase {
        self.winner.phase()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn relay_attached(&self) -> bool {
        self.ctx.relay.is_attached()
    }

    pub fn local_id(&self) -> Option<u32> {
        self.local
            .as_ref()
            .map(|handle| handle.identity())
            .filter(|id| *id != 0)
    }

    /// Registers the local participant; an unassigned identity is retried on
    /// every registry check
    pub fn spawn_local(&mut self, handle: Arc<ParticipantHandle>) {
        self.registry.register(&handle);
        self.local = Some(handle);
        self.pump();
    }

    /// Runs one registry check cycle immediately
    pub fn check_registry(&mut self) {
        self.registry.check();
        self.pump();
    }

    pub fn on_participant_joined(&mut self, participant_id: u32, display_name: &str) {
        if participant_id == 0 {
            warn!("Ignoring join without an identity ('{}')", display_name);
            return;
        }
        if self.local_id() == Some(participant_id) || self.remotes.contains_key(&participant_id) {
            debug!("Participant {} already known", participant_id);
            return;
        }

        let handle = ParticipantHandle::new(participant_id, display_name, false);
        self.registry.register(&handle);
        self.remotes.insert(participant_id, handle);
        self.pump();
    }

    /// Registers a remote participant whose handle the caller owns; dropping
    /// it lets the registry prune the participant after two missed checks
    pub fn on_participant_spawned(&mut self, handle: &Arc<ParticipantHandle>) {
        let participant_id = handle.identity();
        if participant_id != 0
            && (self.local_id() == Some(participant_id) || self.registry.contains(participant_id))
        {
            debug!("Participant {} already known", participant_id);
            return;
        }

        self.registry.register(handle);
        self.pump();
    }

    pub fn on_participant_left(&mut self, participant_id: u32) {
        self.remotes.remove(&participant_id);
        self.registry.unregister(participant_id);
        self.pump();
    }

    pub fn on_authority_determined(&mut self, has_authority: bool) {
        self.ctx.authority = has_authority;
        if has_authority {
            info!("Local participant holds authority");
            self.registry.set_authority(self.local_id());
        }

        let count = self.registry.count();
        self.machine.on_participant_count(count, &mut self.ctx);
        self.pump();
    }

    /// Records which participant holds authority so roster flags are accurate
    pub fn mark_authority(&mut self, authority_id: u32) {
        self.registry.set_authority(Some(authority_id));
    }

    /// Late-binds the relay, flushing anything queued while it was absent
    pub fn attach_relay(&mut self, relay: SyncRelay) {
        self.ctx.relay.attach(relay, self.ctx.authority);
        self.bus.publish(SessionEvent::RelayAvailable);
        self.pump();
    }

    /// Advances the logical clock and runs every timer that comes due
    pub fn advance(&mut self, elapsed: Duration) {
        let horizon = self.ctx.scheduler.now() + elapsed;
        while let Some(id) = self.ctx.scheduler.pop_due(horizon) {
            self.on_timer(id);
            self.pump();
        }
        self.ctx.scheduler.settle_at(horizon);
    }

    /// Gameplay report of an item pickup
    pub fn on_item_collected(&mut self, participant_id: u32, item_id: u32, value: u32) {
        if self.ctx.authority {
            self.apply_item_collected(participant_id, item_id, value);
        } else {
            self.ctx.relay.request(RelayMessage::ItemCollected {
                participant_id,
                item_id,
                value,
            });
        }
        self.pump();
    }

    pub fn request_end_game(&mut self) {
        if self.ctx.authority {
            self.begin_end(EndReason::EndRequested);
        } else {
            self.ctx.relay.request(RelayMessage::EndGame);
        }
        self.pump();
    }

    pub fn request_restart_click(&mut self, participant_id: u32) {
        if self.ctx.authority {
            self.apply_restart_click(participant_id);
        } else if self.machine.state() != SessionState::GameOver {
            warn!(
                "Restart click from {} outside of game over ({:?})",
                participant_id,
                self.machine.state()
            );
        } else {
            self.ctx
                .relay
                .request(RelayMessage::RestartClick { participant_id });
        }
        self.pump();
    }

    /// Message delivered by the relay from participant `from`
    pub fn on_relay_message(&mut self, from: u32, message: RelayMessage) {
        if self.ctx.authority {
            self.handle_request(from, message);
        } else {
            self.handle_notification(from, message);
        }
        self.pump();
    }

    fn handle_request(&mut self, from: u32, message: RelayMessage) {
        match message {
            RelayMessage::ItemCollected {
                participant_id,
                item_id,
                value,
            } => self.apply_item_collected(participant_id, item_id, value),
            RelayMessage::EndGame => self.begin_end(EndReason::EndRequested),
            RelayMessage::RestartClick { participant_id } => {
                if participant_id != from {
                    warn!(
                        "Dropping restart click from {} on behalf of {}",
                        from, participant_id
                    );
                    return;
                }
                self.apply_restart_click(participant_id);
            }
            other => warn!("Authority ignoring {:?} from {}", other, from),
        }
    }

    fn handle_notification(&mut self, from: u32, message: RelayMessage) {
        match message {
            RelayMessage::State { state } => {
                self.machine.apply_relayed(state, &mut self.ctx);
            }
            RelayMessage::Countdown { seconds_remaining } => {
                self.machine.apply_countdown(seconds_remaining);
            }
            RelayMessage::InputEnabled { enabled } => {
                self.machine.set_input(enabled, &mut self.ctx);
            }
            RelayMessage::Winner { message } => {
                info!("{}", message);
                self.bus.publish(SessionEvent::WinnerDetermined { message });
            }
            RelayMessage::ScoreUpdate {
                participant_id,
                score,
            } => {
                self.registry.set_score(participant_id, score);
            }
            RelayMessage::ItemDeactivated { item_id } => {
                if matches!(
                    self.items.collect(item_id),
                    Collection::Counted { .. } | Collection::Completed
                ) {
                    self.bus.publish(SessionEvent::ItemDeactivated { item_id });
                }
            }
            RelayMessage::RestartVote { participant_id } => {
                self.quorum.on_participant_ready(participant_id);
            }
            RelayMessage::ExecuteRestart => self.reset_round(),
            other => warn!("Non-authority ignoring {:?} from {}", other, from),
        }
    }

    fn apply_item_collected(&mut self, participant_id: u32, item_id: u32, value: u32) {
        if self.machine.state() != SessionState::InGame {
            debug!(
                "Ignoring pickup of item {} outside of play ({:?})",
                item_id,
                self.machine.state()
            );
            return;
        }
        if !self.registry.contains(participant_id) {
            warn!("Pickup of item {} by unknown participant {}", item_id, participant_id);
            return;
        }

        let collection = self.items.collect(item_id);
        if matches!(collection, Collection::Duplicate | Collection::Unknown) {
            return;
        }

        if let Some(score) = self.registry.add_score(participant_id, value) {
            self.ctx.broadcast(RelayMessage::ScoreUpdate {
                participant_id,
                score,
            });
        }
        self.bus.publish(SessionEvent::ItemDeactivated { item_id });
        self.ctx.broadcast(RelayMessage::ItemDeactivated { item_id });

        if collection == Collection::Completed {
            info!("All {} items collected", self.items.total());
            self.begin_end(EndReason::AllItemsCollected);
        }
    }

    fn begin_end(&mut self, reason: EndReason) {
        if self.machine.state() != SessionState::InGame {
            warn!(
                "End signal {:?} outside of play ({:?})",
                reason,
                self.machine.state()
            );
            return;
        }
        self.winner.begin_settlement(reason, &mut self.ctx.scheduler);
    }

    fn apply_restart_click(&mut self, participant_id: u32) {
        if self.machine.state() != SessionState::GameOver {
            warn!(
                "Restart click from {} outside of game over ({:?})",
                participant_id,
                self.machine.state()
            );
            return;
        }
        if !self.registry.contains(participant_id) {
            warn!("Restart click from unknown participant {}", participant_id);
            return;
        }

        match self.quorum.on_participant_ready(participant_id) {
            QuorumOutcome::Duplicate => {}
            QuorumOutcome::Counted { .. } => {
                self.ctx
                    .broadcast(RelayMessage::RestartVote { participant_id });
            }
            QuorumOutcome::QuorumReached => {
                self.ctx
                    .broadcast(RelayMessage::RestartVote { participant_id });
                self.execute_restart();
            }
        }
    }

    fn execute_restart(&mut self) {
        info!("Restart quorum reached, resetting round");
        self.machine
            .set_state(SessionState::WaitingForRestart, &mut self.ctx);
        self.reset_round();
        self.ctx.broadcast(RelayMessage::ExecuteRestart);

        let next = if self.registry.count() >= self.config.required_participants {
            SessionState::CountdownToStart
        } else {
            SessionState::WaitingForPlayers
        };
        self.machine.set_state(next, &mut self.ctx);
    }

    fn round_dirty(&self) -> bool {
        self.winner.round_ended()
            || self.items.collected_count() > 0
            || self.registry.score_map().values().any(|score| *score > 0)
    }

    fn reset_round(&mut self) {
        self.quorum.reset();
        self.winner.reset(&mut self.ctx.scheduler);
        self.registry.reset_scores();
        self.items.reset();
        self.bus.publish(SessionEvent::ItemsReset);
    }

    fn on_timer(&mut self, id: TimerId) {
        match id {
            TimerId::CountdownTick => self.machine.on_countdown_tick(&mut self.ctx),
            TimerId::SettleDelay | TimerId::SettleTimeout | TimerId::ResolveTick => {
                if let Some(message) =
                    self.winner
                        .on_timer(id, &mut self.ctx.scheduler, &self.registry)
                {
                    self.ctx.broadcast(RelayMessage::Winner { message });
                }
            }
            TimerId::RegistryCheck => {
                self.registry.check();
                self.ctx
                    .scheduler
                    .set_timer(TimerId::RegistryCheck, self.config.registry_check_interval);
            }
        }
    }

    /// Routes queued notifications to the components that react to them
    fn pump(&mut self) {
        while let Ok(event) = self.inbox.try_recv() {
            self.route(event);
        }
    }

    fn route(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ParticipantCountChanged { count } => {
                self.machine.on_participant_count(count, &mut self.ctx);
            }
            SessionEvent::ParticipantRegistered { participant_id } => {
                if self.local_id() != Some(participant_id) {
                    self.machine.announce(&mut self.ctx);
                }
            }
            SessionEvent::ScoreChanged { .. } if self.ctx.authority => {
                self.winner.on_score_changed(&mut self.ctx.scheduler);
            }
            SessionEvent::SettlementStarted { .. } if self.ctx.authority => {
                self.machine.set_state(SessionState::GameOver, &mut self.ctx);
            }
            SessionEvent::StateChanged { state } => match state {
                SessionState::GameOver => self.quorum.reset(),
                SessionState::WaitingForPlayers => {
                    self.quorum.reset();
                    if self.ctx.authority && self.round_dirty() {
                        info!("Discarding unfinished round");
                        self.reset_round();
                        self.ctx.broadcast(RelayMessage::ExecuteRestart);
                    }
                }
                _ => {}
            },
            SessionEvent::RelayAvailable => {
                self.machine.announce(&mut self.ctx);
                let count = self.registry.count();
                self.machine.on_participant_count(count, &mut self.ctx);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{Envelope, MemoryTransport};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn drain_states(rx: &mut Subscription) -> Vec<SessionState> {
        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::StateChanged { state } = event {
                states.push(state);
            }
        }
        states
    }

    fn winner_messages(rx: &mut Subscription) -> Vec<String> {
        let mut messages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::WinnerDetermined { message } = event {
                messages.push(message);
            }
        }
        messages
    }

    fn authority_session() -> (Session, UnboundedReceiver<Envelope>) {
        let mut session = Session::new(SessionConfig::default());
        session.spawn_local(ParticipantHandle::new(1, "alice", true));
        session.on_authority_determined(true);
        let (tx, rx) = mpsc::unbounded_channel();
        session.attach_relay(SyncRelay::new(MemoryTransport::new(1, tx)));
        (session, rx)
    }

    fn run_countdown(session: &mut Session) {
        for _ in 0..session.config().countdown_ticks {
            session.advance(Duration::from_secs(1));
        }
    }

    #[test]
    fn test_countdown_waits_for_second_participant() {
        let (mut session, _relay) = authority_session();
        assert_eq!(session.state(), SessionState::WaitingForPlayers);

        session.on_participant_joined(2, "bob");
        assert_eq!(session.state(), SessionState::CountdownToStart);

        run_countdown(&mut session);
        assert_eq!(session.state(), SessionState::InGame);
        assert!(session.input_enabled());
    }

    #[test]
    fn test_full_round_on_authority() {
        let (mut session, _relay) = authority_session();
        let mut events = session.subscribe();
        session.on_participant_joined(2, "bob");
        run_countdown(&mut session);

        session.on_item_collected(1, 0, 1);
        session.on_item_collected(2, 1, 1);
        session.on_item_collected(1, 1, 1);
        session.on_item_collected(1, 2, 1);
        assert_eq!(session.state(), SessionState::GameOver);
        assert!(!session.input_enabled());

        session.advance(Duration::from_millis(150));
        assert_eq!(winner_messages(&mut events), vec!["alice wins with 2 points!"]);
        assert_eq!(session.settlement_phase(), SettlementPhase::Idle);
    }

    #[test]
    fn test_duplicate_item_pickup_ignored() {
        let (mut session, _relay) = authority_session();
        session.on_participant_joined(2, "bob");
        run_countdown(&mut session);

        session.on_item_collected(2, 0, 1);
        session.on_item_collected(1, 0, 1);
        assert_eq!(session.registry().score_map().get(&1), Some(&0));
        assert_eq!(session.registry().score_map().get(&2), Some(&1));
        assert_eq!(session.items().collected_count(), 1);
    }

    #[test]
    fn test_explicit_end_resolves_after_timeout() {
        let (mut session, _relay) = authority_session();
        let mut events = session.subscribe();
        session.on_participant_joined(2, "bob");
        run_countdown(&mut session);

        session.request_end_game();
        session.request_end_game();
        assert_eq!(session.state(), SessionState::GameOver);
        assert_eq!(
            session.settlement_phase(),
            SettlementPhase::AwaitingSettlement
        );

        session.advance(Duration::from_millis(1900));
        assert!(winner_messages(&mut events).is_empty());

        session.advance(Duration::from_millis(200));
        assert_eq!(
            winner_messages(&mut events),
            vec!["It's a draw! alice and bob tied with 0 points."]
        );
    }

    #[test]
    fn test_restart_quorum_runs_once() {
        let (mut session, _relay) = authority_session();
        let mut events = session.subscribe();
        session.on_participant_joined(2, "bob");
        run_countdown(&mut session);
        session.request_end_game();
        session.advance(Duration::from_secs(3));
        drain_states(&mut events);

        session.request_restart_click(1);
        session.request_restart_click(1);
        assert_eq!(session.state(), SessionState::GameOver);
        assert_eq!(session.restart_votes(), vec![1]);

        session.request_restart_click(2);
        assert_eq!(
            drain_states(&mut events),
            vec![
                SessionState::WaitingForRestart,
                SessionState::CountdownToStart
            ]
        );
        assert!(session.restart_votes().is_empty());

        session.request_restart_click(2);
        assert_eq!(session.state(), SessionState::CountdownToStart);
    }

    #[test]
    fn test_mirror_cannot_vote_for_another_participant() {
        let (mut session, _relay) = authority_session();
        session.on_participant_joined(2, "bob");
        run_countdown(&mut session);
        session.request_end_game();
        session.advance(Duration::from_secs(3));
        assert_eq!(session.state(), SessionState::GameOver);

        session.on_relay_message(2, RelayMessage::RestartClick { participant_id: 1 });
        session.on_relay_message(2, RelayMessage::RestartClick { participant_id: 2 });
        assert_eq!(session.restart_votes(), vec![2]);
        assert_eq!(session.state(), SessionState::GameOver);

        session.request_restart_click(1);
        assert_eq!(session.state(), SessionState::CountdownToStart);
    }

    #[test]
    fn test_dropped_remote_handle_is_pruned() {
        let (mut session, _relay) = authority_session();
        let bob = ParticipantHandle::new(2, "bob", false);
        session.on_participant_spawned(&bob);
        session.on_participant_spawned(&bob);
        assert_eq!(session.registry().count(), 2);
        assert_eq!(session.state(), SessionState::CountdownToStart);

        drop(bob);
        session.advance(Duration::from_secs(1));
        assert!(session.registry().contains(2));

        session.advance(Duration::from_secs(1));
        assert!(!session.registry().contains(2));
        assert_eq!(session.state(), SessionState::WaitingForPlayers);
    }

    #[test]
    fn test_restart_click_outside_game_over_ignored() {
        let (mut session, _relay) = authority_session();
        session.on_participant_joined(2, "bob");
        session.request_restart_click(1);
        assert!(session.restart_votes().is_empty());
    }

    #[test]
    fn test_membership_fallback_disables_input() {
        let (mut session, _relay) = authority_session();
        session.on_participant_joined(2, "bob");
        run_countdown(&mut session);
        session.on_item_collected(2, 0, 1);

        session.on_participant_left(2);
        assert_eq!(session.state(), SessionState::WaitingForPlayers);
        assert!(!session.input_enabled());
        assert_eq!(session.items().collected_count(), 0);
    }

    #[test]
    fn test_relay_absent_until_attached() {
        let mut session = Session::new(SessionConfig::default());
        session.spawn_local(ParticipantHandle::new(1, "alice", true));
        session.on_authority_determined(true);
        session.on_participant_joined(2, "bob");
        assert_eq!(session.state(), SessionState::CountdownToStart);
        assert!(!session.relay_attached());

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.attach_relay(SyncRelay::new(MemoryTransport::new(1, tx)));

        let mut relayed = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            relayed.push(envelope.message);
        }
        assert!(relayed.contains(&RelayMessage::State {
            state: SessionState::CountdownToStart
        }));
    }

    #[test]
    fn test_pending_local_identity_resolves_on_check() {
        let mut session = Session::new(SessionConfig::default());
        let local = ParticipantHandle::unassigned("alice", true);
        session.spawn_local(local.clone());
        assert_eq!(session.registry().count(), 0);
        assert_eq!(session.local_id(), None);

        local.assign_identity(4);
        session.advance(Duration::from_secs(1));
        assert_eq!(session.local_id(), Some(4));
        assert!(session.registry().contains(4));
    }

    #[test]
    fn test_non_authority_forwards_requests() {
        let mut session = Session::new(SessionConfig::default());
        session.spawn_local(ParticipantHandle::new(2, "bob", true));
        session.on_participant_joined(1, "alice");
        session.on_authority_determined(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.attach_relay(SyncRelay::new(MemoryTransport::new(2, tx)));

        session.on_relay_message(1, RelayMessage::State { state: SessionState::InGame });
        session.on_item_collected(2, 0, 1);

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.route, crate::relay::Route::Authority);
        assert_eq!(
            envelope.message,
            RelayMessage::ItemCollected {
                participant_id: 2,
                item_id: 0,
                value: 1
            }
        );
        assert_eq!(session.registry().score_map().get(&2), Some(&0));
    }
}
