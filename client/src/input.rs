//! Console commands and the automated pickup bot

use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use session::Session;
use std::time::Duration;

/// Score awarded for one item when no explicit value is given
pub const DEFAULT_ITEM_VALUE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Vote to play again once the round is over
    Restart,
    /// Ask the authority to end the round now
    End,
    /// Report that the local participant picked up an item
    Pickup { item_id: u32, value: u32 },
    Status,
    Quit,
}

/// Parses one line of console input. Returns None for anything unrecognized.
pub fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let verb = words.next()?.to_ascii_lowercase();

    let command = match verb.as_str() {
        "r" | "restart" => Command::Restart,
        "e" | "end" => Command::End,
        "s" | "status" => Command::Status,
        "q" | "quit" => Command::Quit,
        "p" | "pickup" => {
            let item_id = words.next()?.parse().ok()?;
            let value = match words.next() {
                Some(word) => word.parse().ok()?,
                None => DEFAULT_ITEM_VALUE,
            };
            Command::Pickup { item_id, value }
        }
        _ => return None,
    };

    if words.next().is_some() {
        return None;
    }
    Some(command)
}

/// Picks up a random remaining item at random intervals while input is enabled
pub struct PickupBot {
    rng: StdRng,
    min_delay: Duration,
    max_delay: Duration,
    cooldown: Duration,
}

impl PickupBot {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(rng, Duration::from_millis(300), Duration::from_millis(1500))
    }

    pub fn with_rng(rng: StdRng, min_delay: Duration, max_delay: Duration) -> Self {
        let mut bot = Self {
            rng,
            min_delay,
            max_delay: max_delay.max(min_delay),
            cooldown: Duration::ZERO,
        };
        bot.cooldown = bot.next_delay();
        bot
    }

    fn next_delay(&mut self) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        Duration::from_millis(self.rng.gen_range(min..=max))
    }

    /// Returns the item to pick up this tick, if any
    pub fn on_tick(&mut self, elapsed: Duration, session: &Session) -> Option<u32> {
        if !session.input_enabled() {
            return None;
        }

        self.cooldown = self.cooldown.saturating_sub(elapsed);
        if !self.cooldown.is_zero() {
            return None;
        }
        self.cooldown = self.next_delay();

        let items = session.items();
        let remaining: Vec<u32> = (0..items.total() as u32)
            .filter(|item_id| !items.is_collected(*item_id))
            .collect();

        let item_id = *remaining.choose(&mut self.rng)?;
        debug!("Bot reaching for item {}", item_id);
        Some(item_id)
    }
}
