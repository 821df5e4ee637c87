//! Console presentation of session notifications

use log::{debug, info};
use session::{SessionEvent, Subscription};
use shared::SessionState;

/// Formats session notifications for the console and remembers the latest
/// values a status display needs
#[derive(Debug, Default)]
pub struct Presenter {
    state: SessionState,
    countdown: Option<u32>,
    winner_message: Option<String>,
    input_enabled: bool,
}

impl Presenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn countdown(&self) -> Option<u32> {
        self.countdown
    }

    pub fn winner_message(&self) -> Option<&str> {
        self.winner_message.as_deref()
    }

    pub fn input_enabled(&self) -> bool {
        self.input_enabled
    }

    /// Consumes every queued notification
    pub fn drain(&mut self, events: &mut Subscription) {
        while let Ok(event) = events.try_recv() {
            self.present(&event);
        }
    }

    pub fn present(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::StateChanged { state } => {
                self.state = *state;
                if *state != SessionState::CountdownToStart {
                    self.countdown = None;
                }
                if *state == SessionState::CountdownToStart {
                    self.winner_message = None;
                }
            }
            SessionEvent::CountdownUpdate { seconds_remaining } => {
                self.countdown = Some(*seconds_remaining);
            }
            SessionEvent::WinnerDetermined { message } => {
                self.winner_message = Some(message.clone());
            }
            SessionEvent::InputEnabled { enabled } => self.input_enabled = *enabled,
            _ => {}
        }

        match describe(event) {
            Some(line) => info!("{}", line),
            None => debug!("{:?}", event),
        }
    }
}

/// Human-readable line for the notifications worth showing
pub fn describe(event: &SessionEvent) -> Option<String> {
    let line = match event {
        SessionEvent::StateChanged { state } => match state {
            SessionState::WaitingForPlayers => "Waiting for players...".to_string(),
            SessionState::CountdownToStart => "Get ready!".to_string(),
            SessionState::InGame => "Go! Collect the items.".to_string(),
            SessionState::GameOver => "Game over. Type 'r' to play again.".to_string(),
            SessionState::WaitingForRestart => "Restarting...".to_string(),
        },
        SessionEvent::CountdownUpdate { seconds_remaining } if *seconds_remaining > 0 => {
            format!("{}...", seconds_remaining)
        }
        SessionEvent::ScoreChanged {
            participant_id,
            score,
        } if *score > 0 => format!("Participant {} now has {} points", participant_id, score),
        SessionEvent::ParticipantCountChanged { count } => {
            format!("{} participant(s) in session", count)
        }
        SessionEvent::WinnerDetermined { message } => message.clone(),
        SessionEvent::RestartVoteCounted {
            participant_id,
            votes,
        } => format!(
            "Participant {} wants a rematch ({} vote(s))",
            participant_id, votes
        ),
        SessionEvent::ItemDeactivated { item_id } => format!("Item {} collected", item_id),
        SessionEvent::ItemsReset => "Items respawned".to_string(),
        _ => return None,
    };
    Some(line)
}
