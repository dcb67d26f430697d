use std::collections::HashSet;

use tether_core::constants::NOVELTY_WINDOW;

/// How the novelty window classified an inbound reliable ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Novelty {
    /// The ID is ahead of everything seen so far; deliver it.
    New,
    /// The ID fills a previously observed gap; deliver it.
    Recovered,
    /// The ID was already delivered or fell out of the window; drop it.
    Stale,
}

impl Novelty {
    /// True when the packet carrying this ID should reach the next layer.
    pub fn is_deliverable(&self) -> bool {
        !matches!(self, Novelty::Stale)
    }
}

/// Tracks which reliable IDs have already been delivered, across 16-bit wrap.
///
/// IDs are accepted inside a 32768-wide forward window anchored at the
/// highest ID seen. Skipped IDs stay eligible in `missing` until they arrive
/// late or the window moves past them.
#[derive(Debug)]
pub struct NoveltyWindow {
    last_received_id: u16,
    missing: HashSet<u16>,
}

impl Default for NoveltyWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl NoveltyWindow {
    /// Creates a window positioned so that ID 0, the first ID a fresh peer
    /// allocates, is classified as new.
    pub fn new() -> Self {
        Self { last_received_id: u16::MAX, missing: HashSet::new() }
    }

    /// The highest ID accepted so far.
    pub fn last_received_id(&self) -> u16 {
        self.last_received_id
    }

    /// True when the ID was skipped over and has not arrived yet.
    ///
    /// The ack bitmask is built from this: a prior ID is asserted as
    /// received exactly when it is not missing.
    pub fn is_missing(&self, id: u16) -> bool {
        self.missing.contains(&id)
    }

    /// Number of IDs currently eligible for late delivery.
    pub fn missing_len(&self) -> usize {
        self.missing.len()
    }

    /// Classifies an inbound ID and advances the window.
    ///
    /// A new ID marks every skipped ID between the previous head and itself
    /// as missing, then becomes the head. IDs behind the head are delivered
    /// once if they fill a gap and dropped otherwise.
    pub fn classify(&mut self, id: u16) -> Novelty {
        let last = self.last_received_id;
        let overwrite = last.wrapping_sub(NOVELTY_WINDOW);

        let is_new = if overwrite < last {
            id > last || id <= overwrite
        } else {
            id > last && id <= overwrite
        };

        if is_new {
            let mut skipped = last.wrapping_add(1);
            while skipped != id {
                self.missing.insert(skipped);
                skipped = skipped.wrapping_add(1);
            }
            self.last_received_id = id;
            // entries the window moved past are no longer eligible
            self.missing.retain(|&m| id.wrapping_sub(m) < NOVELTY_WINDOW);
            Novelty::New
        } else if self.missing.remove(&id) {
            Novelty::Recovered
        } else {
            Novelty::Stale
        }
    }

    /// Restores the fresh-connection state.
    pub fn reset(&mut self) {
        self.last_received_id = u16::MAX;
        self.missing.clear();
    }
}
