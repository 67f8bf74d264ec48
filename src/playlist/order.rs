//! Flattened playback order and its rebuild logic.
//!
//! A [`PlayQueue`] is the snapshot the scheduler actually steps through:
//! the leaves under the active root in stable depth-first order, optionally
//! shuffled, plus the cursor state. Any tree mutation under the active root
//! makes the snapshot stale until the next rebuild.

use log::debug;
use rand::rngs::StdRng;
use rand::RngExt;

use crate::playlist::tree::{NodeId, PlaylistTree};

/// Playback-order snapshot and cursor state for one active root.
#[derive(Debug)]
pub struct PlayQueue {
    order: Vec<NodeId>,
    /// Cursor into `order`; `None` plays the role of the classic -1 sentinel.
    pub current_index: Option<usize>,
    /// Leaf whose item is currently playing (or last played).
    pub current_item: Option<NodeId>,
    /// Container the order is built from.
    pub current_root: NodeId,
    /// The snapshot is stale and must be rebuilt before the next decision.
    pub rebuild_required: bool,
}

impl PlayQueue {
    pub fn new(root: NodeId) -> Self {
        Self {
            order: Vec::new(),
            current_index: None,
            current_item: None,
            current_root: root,
            rebuild_required: true,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.order.get(index).copied()
    }

    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Entry under the cursor, if the cursor is placed.
    pub fn current(&self) -> Option<NodeId> {
        self.current_index.and_then(|index| self.get(index))
    }

    pub fn position_of(&self, node: NodeId) -> Option<usize> {
        self.order.iter().position(|entry| *entry == node)
    }

    /// Fully replaces the order from the active root: stable depth-first
    /// leaf enumeration, then one Fisher-Yates pass when `random` is set.
    /// The cursor is repositioned on `keep` by identity, or cleared.
    pub fn rebuild(
        &mut self,
        tree: &PlaylistTree,
        keep: Option<NodeId>,
        random: bool,
        rng: &mut StdRng,
    ) {
        self.order = tree.leaves_under(self.current_root);
        if random {
            for i in (1..self.order.len()).rev() {
                let j = rng.random_range(0..=i);
                self.order.swap(i, j);
            }
        }
        self.current_index = keep.and_then(|node| self.position_of(node));
        self.rebuild_required = false;
        debug!(
            "rebuild done - {} items, index {}",
            self.order.len(),
            self.current_index.map_or(-1, |index| index as i64)
        );
    }

    /// Repositions the cursor on `current` by linear search.
    pub fn resync(&mut self, current: NodeId) {
        self.current_index = self.position_of(current);
        debug!(
            "resynced to index {}",
            self.current_index.map_or(-1, |index| index as i64)
        );
    }

    /// Advances the cursor one entry, wrapping to the beginning.
    pub fn step_forward(&mut self) {
        debug_assert!(!self.is_empty());
        let next = match self.current_index {
            Some(index) => index + 1,
            None => 0,
        };
        if next >= self.len() {
            debug!("looping - restarting at beginning");
            self.current_index = Some(0);
        } else {
            self.current_index = Some(next);
        }
    }

    /// Retreats the cursor one entry, wrapping to the end.
    pub fn step_backward(&mut self) {
        debug_assert!(!self.is_empty());
        match self.current_index {
            Some(index) if index > 0 => self.current_index = Some(index - 1),
            _ => {
                debug!("looping - restarting at end");
                self.current_index = Some(self.len() - 1);
            }
        }
    }
}
