//! Session state machine
//!
//! Every participant runs one. The authority decides transitions and relays
//! each of them; everyone else applies relayed transitions without deciding.
//! The single exception is the membership fallback: any participant that
//! sees the roster drop below quorum during play reverts itself to
//! `WaitingForPlayers` right away.
//!
//! Transitions to the current state are no-ops, and a transition requested
//! while another one is being applied is dropped rather than queued.

use crate::bus::{EventBus, SessionEvent};
use crate::context::SessionContext;
use crate::scheduler::TimerId;
use log::{debug, info, warn};
use shared::{RelayMessage, SessionState};
use std::time::Duration;

pub struct StateMachine {
    state: SessionState,
    applying: bool,
    countdown_remaining: Option<u32>,
    input_enabled: bool,
    required_participants: usize,
    countdown_ticks: u32,
    countdown_interval: Duration,
    bus: EventBus,
}

impl StateMachine {
    pub fn new(
        bus: EventBus,
        required_participants: usize,
        countdown_ticks: u32,
        countdown_interval: Duration,
    ) -> Self {
        Self {
            state: SessionState::WaitingForPlayers,
            applying: false,
            countdown_remaining: None,
            input_enabled: false,
            required_participants,
            countdown_ticks,
            countdown_interval,
            bus,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn input_enabled(&self) -> bool {
        self.input_enabled
    }

    pub fn countdown_remaining(&self) -> Option<u32> {
        self.countdown_remaining
    }

    /// Returns true if the transition was applied
    pub fn set_state(&mut self, next: SessionState, ctx: &mut SessionContext) -> bool {
        if self.applying {
            warn!(
                "Dropping transition to {:?} while a transition to {:?} is being applied",
                next, self.state
            );
            return false;
        }
        if next == self.state {
            debug!("Already in {:?}", next);
            return false;
        }

        self.applying = true;
        let previous = std::mem::replace(&mut self.state, next);
        info!("Session state {:?} -> {:?}", previous, next);

        self.bus.publish(SessionEvent::StateChanged { state: next });
        ctx.broadcast(RelayMessage::State { state: next });
        self.enter(previous, next, ctx);

        self.applying = false;
        true
    }

    /// Applies a transition decided by the authority
    pub fn apply_relayed(&mut self, state: SessionState, ctx: &mut SessionContext) -> bool {
        if ctx.authority {
            warn!("Authority ignoring relayed state {:?}", state);
            return false;
        }
        self.set_state(state, ctx)
    }

    fn enter(&mut self, previous: SessionState, next: SessionState, ctx: &mut SessionContext) {
        if previous == SessionState::CountdownToStart {
            self.cancel_countdown(ctx);
        }

        match next {
            SessionState::CountdownToStart => {
                self.set_input(false, ctx);
                if ctx.authority {
                    self.start_countdown(ctx);
                }
            }
            SessionState::InGame => {}
            SessionState::WaitingForPlayers
            | SessionState::GameOver
            | SessionState::WaitingForRestart => self.set_input(false, ctx),
        }
    }

    /// Reacts to a roster size change
    pub fn on_participant_count(&mut self, count: usize, ctx: &mut SessionContext) {
        let below_quorum = count < self.required_participants;

        match self.state {
            SessionState::WaitingForPlayers if ctx.authority && !below_quorum => {
                self.set_state(SessionState::CountdownToStart, ctx);
            }
            SessionState::CountdownToStart if ctx.authority && below_quorum => {
                info!("Participant left during countdown, cancelling");
                self.set_state(SessionState::WaitingForPlayers, ctx);
            }
            SessionState::InGame if below_quorum => {
                warn!(
                    "Only {} of {} participants remain, returning to lobby",
                    count, self.required_participants
                );
                self.set_state(SessionState::WaitingForPlayers, ctx);
            }
            SessionState::GameOver | SessionState::WaitingForRestart
                if ctx.authority && below_quorum =>
            {
                self.set_state(SessionState::WaitingForPlayers, ctx);
            }
            _ => {}
        }
    }

    /// Re-sends the current state so late joiners and fresh relays converge
    pub fn announce(&self, ctx: &mut SessionContext) {
        if !ctx.authority {
            return;
        }
        ctx.broadcast(RelayMessage::State { state: self.state });
        if let Some(seconds_remaining) = self.countdown_remaining {
            ctx.broadcast(RelayMessage::Countdown { seconds_remaining });
        }
        ctx.broadcast(RelayMessage::InputEnabled {
            enabled: self.input_enabled,
        });
    }

    fn start_countdown(&mut self, ctx: &mut SessionContext) {
        self.publish_countdown(self.countdown_ticks, ctx);
        ctx.scheduler
            .set_timer(TimerId::CountdownTick, self.countdown_interval);
    }

    fn cancel_countdown(&mut self, ctx: &mut SessionContext) {
        ctx.scheduler.cancel_timer(TimerId::CountdownTick);
        self.countdown_remaining = None;
    }

    pub fn on_countdown_tick(&mut self, ctx: &mut SessionContext) {
        if !ctx.authority || self.state != SessionState::CountdownToStart {
            debug!("Stale countdown tick in {:?}", self.state);
            return;
        }

        let remaining = self.countdown_remaining.unwrap_or(0).saturating_sub(1);
        self.publish_countdown(remaining, ctx);

        if remaining == 0 {
            self.set_state(SessionState::InGame, ctx);
            self.set_input(true, ctx);
        } else {
            ctx.scheduler
                .set_timer(TimerId::CountdownTick, self.countdown_interval);
        }
    }

    /// Mirrors a countdown value relayed by the authority
    pub fn apply_countdown(&mut self, seconds_remaining: u32) {
        self.countdown_remaining = Some(seconds_remaining);
        self.bus
            .publish(SessionEvent::CountdownUpdate { seconds_remaining });
    }

    fn publish_countdown(&mut self, seconds_remaining: u32, ctx: &mut SessionContext) {
        self.countdown_remaining = Some(seconds_remaining);
        self.bus
            .publish(SessionEvent::CountdownUpdate { seconds_remaining });
        ctx.broadcast(RelayMessage::Countdown { seconds_remaining });
    }

    /// Local input gate; the authority relays every change
    pub fn set_input(&mut self, enabled: bool, ctx: &mut SessionContext) {
        if self.input_enabled == enabled {
            return;
        }
        self.input_enabled = enabled;
        self.bus.publish(SessionEvent::InputEnabled { enabled });
        ctx.broadcast(RelayMessage::InputEnabled { enabled });
    }
}
