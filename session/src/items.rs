use log::{debug, warn};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    /// Item id already counted this round
    Duplicate,
    /// Item id outside the arena's population
    Unknown,
    Counted { collected: usize },
    /// The last outstanding item was collected
    Completed,
}

/// Collected item ids for the current round. Items are numbered
/// `0..total` by the scene's static population.
#[derive(Debug, Clone)]
pub struct ItemProgress {
    total: usize,
    collected: BTreeSet<u32>,
}

impl ItemProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            collected: BTreeSet::new(),
        }
    }

    pub fn collect(&mut self, item_id: u32) -> Collection {
        if item_id as usize >= self.total {
            warn!("Item {} is not part of this arena ({} items)", item_id, self.total);
            return Collection::Unknown;
        }

        if !self.collected.insert(item_id) {
            debug!("Item {} already collected", item_id);
            return Collection::Duplicate;
        }

        if self.is_complete() {
            Collection::Completed
        } else {
            Collection::Counted {
                collected: self.collected.len(),
            }
        }
    }

    pub fn reset(&mut self) {
        self.collected.clear();
    }

    pub fn collected_count(&self) -> usize {
        self.collected.len()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.collected.len() >= self.total
    }

    pub fn is_collected(&self, item_id: u32) -> bool {
        self.collected.contains(&item_id)
    }

    pub fn collected_ids(&self) -> Vec<u32> {
        self.collected.iter().copied().collect()
    }
}
