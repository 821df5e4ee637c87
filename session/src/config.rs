use shared::{COUNTDOWN_TICKS, REQUIRED_PARTICIPANTS, TOTAL_ITEMS};
use std::time::Duration;

/// Tunables for one session. Every participant must run with the same values.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Participants needed before a countdown may start, and votes needed to restart
    pub required_participants: usize,
    /// Countdown length in ticks
    pub countdown_ticks: u32,
    pub countdown_interval: Duration,
    /// Quiet period after the last score change before a winner is computed
    pub settle_delay: Duration,
    /// Upper bound on waiting for any score change after the round ends
    pub settle_timeout: Duration,
    /// One network tick; the winner is resolved one tick after settling
    pub network_tick: Duration,
    /// Cadence of pending-identity resolution and stale-entry pruning
    pub registry_check_interval: Duration,
    /// Static item population of the arena
    pub total_items: usize,
    /// Outbound relay messages kept while no relay is attached
    pub relay_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            required_participants: REQUIRED_PARTICIPANTS,
            countdown_ticks: COUNTDOWN_TICKS,
            countdown_interval: Duration::from_secs(1),
            settle_delay: Duration::from_millis(100),
            settle_timeout: Duration::from_secs(2),
            network_tick: Duration::from_millis(50),
            registry_check_interval: Duration::from_secs(1),
            total_items: TOTAL_ITEMS,
            relay_queue_capacity: 64,
        }
    }
}

impl SessionConfig {
    pub fn with_total_items(mut self, total_items: usize) -> Self {
        self.total_items = total_items;
        self
    }

    pub fn with_network_tick(mut self, network_tick: Duration) -> Self {
        self.network_tick = network_tick;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = SessionConfig::default();
        assert_eq!(config.required_participants, 2);
        assert_eq!(config.countdown_ticks, 5);
        assert_eq!(config.total_items, 3);
        assert!(config.settle_delay < config.settle_timeout);
    }

    #[test]
    fn test_builders() {
        let config = SessionConfig::default()
            .with_total_items(7)
            .with_network_tick(Duration::from_millis(20));
        assert_eq!(config.total_items, 7);
        assert_eq!(config.network_tick, Duration::from_millis(20));
    }
}
